//! FreeCAD tool bit handling and conversion.
//!
//! FreeCAD keeps its CAM tools as JSON documents on disk:
//!
//! - `.fctb` tool bits, one per tool, referencing a binary shape file
//! - `.fctl` tool libraries, a numbered table of relative tool bit paths
//!
//! The tool-exchange service models the same data as tool items and tool
//! sets. This module reads and writes the native documents and converts
//! between the two models, losslessly where the service model allows.
//!
//! # Layout
//!
//! Tools live under one root directory with `Bit/`, `Library/` and `Shape/`
//! subdirectories. Library entries are resolved against `Bit/`; shape
//! references are looked up in the root, then `Bit/`, then `Shape/`.

use std::path::{Component, Path};

pub mod convert;
pub mod duplicates;
pub mod error;
pub mod exchange;
pub mod native;
pub mod shape;
pub mod units;

pub use convert::{
    exchange_item_to_native, exchange_to_native_library, export_tool_set, library_to_presets,
    native_to_exchange_item, native_to_exchange_library, tools_to_native_library,
};
pub use duplicates::{DuplicateIndex, DuplicateMatch, DuplicateReason};
pub use error::{ErrorKind, ToolError, ToolResult};
pub use exchange::{ShapeAttachment, ToolItem, ToolPreset, ToolSet, ToolType};
pub use native::{ResolvedTool, ToolBit, ToolLibrary, ToolStatus};
pub use shape::{ContentHash, SaveOutcome, ShapeUpload};
pub use units::ParamValue;

/// File extension of native tool bits.
pub const TOOL_BIT_EXTENSION: &str = "fctb";

/// File extension of native tool libraries.
pub const TOOL_LIBRARY_EXTENSION: &str = "fctl";

/// Stem used for imported tools that carry no native id.
const UNKNOWN_TOOL_STEM: &str = "unknown";

/// Returns `true` if `path` is relative and made only of normal components.
///
/// Paths read from documents are joined onto a base directory; anything with
/// a root, a drive prefix, `.` or `..` could resolve outside of it.
#[must_use]
pub fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Returns the file name an imported tool bit is written to.
///
/// Path separators in the id are replaced so the file always lands in the
/// target directory.
#[must_use]
pub fn tool_bit_file_name(native_id: Option<&str>) -> String {
    let stem = native_id
        .filter(|id| !id.trim().is_empty())
        .map_or_else(
            || UNKNOWN_TOOL_STEM.to_string(),
            |id| id.replace(['/', '\\'], "_"),
        );
    format!("{stem}.{TOOL_BIT_EXTENSION}")
}
