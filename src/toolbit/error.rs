//! Error types for tool bit parsing, conversion, and shape storage.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result type for tool bit operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Coarse classification of a [`ToolError`].
///
/// Batch callers use this to tally per-entity failures without matching on
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input document could not be read or understood.
    Parse,
    /// The input was well-formed but cannot be converted.
    Validation,
    /// A referenced file does not exist.
    NotFound,
    /// Writing output failed.
    Io,
}

/// Errors that can occur while handling tool data.
#[derive(Debug, Error)]
pub enum ToolError {
    /// One or more required top-level keys are absent.
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields {
        /// Every missing key, in the order they were checked.
        fields: Vec<String>,
    },

    /// A field is present but has the wrong shape.
    #[error("Invalid field '{field}': {message}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Description of what's wrong.
        message: String,
    },

    /// The document is not valid JSON.
    #[error("Invalid JSON in {context}")]
    InvalidJson {
        /// File path or other description of the input.
        context: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to open or read a file.
    #[error("Failed to read file: {path}")]
    FileRead {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write file: {path}")]
    FileWrite {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A dimensional geometry value has no unit sibling.
    #[error("Dimensional parameter '{field}' missing required unit field '{unit_field}'")]
    MissingUnit {
        /// Geometry key holding the value.
        field: String,
        /// The expected `<field>_unit` key.
        unit_field: String,
    },

    /// A tool set member has no tool data to export.
    #[error("Tool number {tool_number} not found in tool map")]
    MissingTool {
        /// The unmatched tool number.
        tool_number: i64,
    },

    /// A path taken from document data would leave its base directory.
    #[error("Unsafe {field} '{path}': only plain relative paths are allowed")]
    UnsafePath {
        /// Where the path came from, e.g. `tool_path`.
        field: String,
        /// The offending path.
        path: String,
    },

    /// A shape file to upload does not exist.
    #[error("Shape file not found: {path}")]
    ShapeNotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// An inline attachment payload could not be decoded.
    #[error("Invalid shape content: {message}")]
    InvalidContent {
        /// Description of what's wrong.
        message: String,
    },
}

impl ToolError {
    /// Creates a missing fields error.
    pub fn missing_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingFields {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid JSON error.
    pub fn invalid_json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidJson {
            context: context.into(),
            source,
        }
    }

    /// Creates a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a missing unit error for a geometry key.
    pub fn missing_unit(field: impl Into<String>) -> Self {
        let field = field.into();
        let unit_field = format!("{field}_unit");
        Self::MissingUnit { field, unit_field }
    }

    /// Creates an unsafe path error.
    pub fn unsafe_path(field: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnsafePath {
            field: field.into(),
            path: path.into(),
        }
    }

    /// Creates a shape not found error.
    pub fn shape_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ShapeNotFound { path: path.into() }
    }

    /// Creates an invalid content error.
    pub fn invalid_content(message: impl Into<String>) -> Self {
        Self::InvalidContent {
            message: message.into(),
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingFields { .. }
            | Self::InvalidField { .. }
            | Self::InvalidJson { .. }
            | Self::FileRead { .. }
            | Self::InvalidContent { .. } => ErrorKind::Parse,
            Self::MissingUnit { .. } | Self::MissingTool { .. } | Self::UnsafePath { .. } => {
                ErrorKind::Validation
            }
            Self::ShapeNotFound { .. } => ErrorKind::NotFound,
            Self::FileWrite { .. } => ErrorKind::Io,
        }
    }
}
