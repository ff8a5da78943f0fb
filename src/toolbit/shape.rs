//! Shape file attachments.
//!
//! Tool bits reference a binary shape file (usually a FreeCAD `.fcstd`
//! document). On the exchange side the file travels as a [`ShapeAttachment`]
//! that either points at a local path or URL, or embeds the content as
//! base64. Content is identified by a `sha256:<hex>` hash.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::exchange::{ReferenceKind, ShapeAttachment, ShapeReference, SOURCE_SYSTEM};
use super::{is_plain_relative, ToolError, ToolResult};

/// Read size used while hashing.
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Hash algorithm used for shape content.
pub const HASH_ALGORITHM: &str = "sha256";

/// Format assumed when a shape file has no extension.
pub const DEFAULT_SHAPE_FORMAT: &str = "fcstd";

/// A content hash in `algorithm:hexdigest` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    /// Algorithm name, e.g. `sha256`.
    pub algorithm: String,
    /// Lower-case hex digest.
    pub digest: String,
}

impl ContentHash {
    /// Creates a SHA-256 hash value from a hex digest.
    pub fn sha256(digest: impl Into<String>) -> Self {
        Self {
            algorithm: HASH_ALGORITHM.to_string(),
            digest: digest.into(),
        }
    }

    /// Splits at the first `:`. A bare digest is taken as SHA-256.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((algorithm, digest)) => Self {
                algorithm: algorithm.to_string(),
                digest: digest.to_string(),
            },
            None => Self::sha256(s),
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for ContentHash {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Hashes everything readable from `reader` in fixed-size chunks.
///
/// # Errors
///
/// Returns any I/O error from the reader.
pub fn content_hash<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash::sha256(hex::encode(hasher.finalize())))
}

/// Hashes an in-memory byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::sha256(hex::encode(Sha256::digest(bytes)))
}

/// Hashes a file without loading it into memory.
///
/// # Errors
///
/// Returns [`ToolError::FileRead`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> ToolResult<ContentHash> {
    let file = File::open(path).map_err(|e| ToolError::file_read(path, e))?;
    content_hash(file).map_err(|e| ToolError::file_read(path, e))
}

/// A shape file ready to embed in an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeUpload {
    /// File name without directories.
    pub filename: String,
    /// Lower-case extension.
    pub format: String,
    /// Base64-encoded content.
    pub content: String,
    /// Content hash, `sha256:<hex>`.
    pub hash: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Reads a shape file and prepares it for upload.
///
/// # Errors
///
/// Returns [`ToolError::ShapeNotFound`] if the path does not exist, or
/// [`ToolError::FileRead`] if it cannot be read.
pub fn prepare_upload(path: &Path) -> ToolResult<ShapeUpload> {
    if !path.exists() {
        return Err(ToolError::shape_not_found(path));
    }

    let content = std::fs::read(path).map_err(|e| ToolError::file_read(path, e))?;
    let hash = content_hash(content.as_slice()).map_err(|e| ToolError::file_read(path, e))?;

    Ok(ShapeUpload {
        filename: file_name(path),
        format: shape_format(path),
        hash: hash.to_string(),
        size_bytes: content.len() as u64,
        content: BASE64_STANDARD.encode(&content),
    })
}

/// Returns the lower-case extension of a shape path, or `fcstd`.
#[must_use]
pub fn shape_format(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map_or_else(|| DEFAULT_SHAPE_FORMAT.to_string(), str::to_lowercase)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builds a local-path attachment stub for a tool bit's shape reference.
#[must_use]
pub fn local_reference(shape_file: &str, shape_type: &str) -> ShapeAttachment {
    let mut metadata = Map::new();
    metadata.insert("shape_type".into(), Value::from(shape_type));
    metadata.insert("original_reference".into(), Value::from(shape_file));

    ShapeAttachment {
        format: shape_format(Path::new(shape_file)),
        source_system: SOURCE_SYSTEM.to_string(),
        reference: ShapeReference {
            kind: ReferenceKind::LocalPath,
            value: Some(shape_file.to_string()),
            content: None,
            hash: None,
            size_bytes: None,
        },
        metadata,
    }
}

/// Describes a shape file as an attachment.
///
/// A missing file yields a plain local-path stub. An existing file is
/// hashed and sized; the reference points at `upload_url` when given and at
/// the local path otherwise.
///
/// # Errors
///
/// Returns [`ToolError::FileRead`] if an existing file cannot be read.
pub fn describe(
    path: &Path,
    shape_type: &str,
    upload_url: Option<&str>,
) -> ToolResult<ShapeAttachment> {
    let display = path.display().to_string();
    let mut attachment = local_reference(&display, shape_type);
    if !path.exists() {
        return Ok(attachment);
    }

    let hash = hash_file(path)?;
    let size = std::fs::metadata(path)
        .map_err(|e| ToolError::file_read(path, e))?
        .len();

    attachment.reference = ShapeReference {
        kind: if upload_url.is_some() {
            ReferenceKind::Url
        } else {
            ReferenceKind::LocalPath
        },
        value: Some(upload_url.map_or(display, str::to_string)),
        content: None,
        hash: Some(hash.to_string()),
        size_bytes: Some(size),
    };
    attachment
        .metadata
        .insert("filename".into(), Value::from(file_name(path)));
    Ok(attachment)
}

impl ShapeAttachment {
    /// Returns this attachment with its content embedded inline.
    #[must_use]
    pub fn embed_upload(mut self, upload: &ShapeUpload) -> Self {
        self.reference.kind = ReferenceKind::Inline;
        self.reference.content = Some(upload.content.clone());
        self.reference.hash = Some(upload.hash.clone());
        self.reference.size_bytes = Some(upload.size_bytes);
        self
    }
}

/// Result of materialising a downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The content was written to this path.
    Saved(PathBuf),
    /// The attachment carries no inline content; nothing was written.
    NoContent,
}

/// Writes an inline attachment's content into `output_dir`.
///
/// Only inline references carry content. Anything else returns
/// [`SaveOutcome::NoContent`] without touching the filesystem. The file name
/// is `filename`, else `metadata.filename`, else `shape.<format>`; any
/// directory part of it is dropped.
///
/// # Errors
///
/// Returns [`ToolError::InvalidContent`] if the payload is not valid base64,
/// or [`ToolError::FileWrite`] if writing fails.
pub fn save_downloaded(
    attachment: &ShapeAttachment,
    output_dir: &Path,
    filename: Option<&str>,
) -> ToolResult<SaveOutcome> {
    let content = match (&attachment.reference.kind, &attachment.reference.content) {
        (ReferenceKind::Inline, Some(content)) => content,
        _ => return Ok(SaveOutcome::NoContent),
    };

    let bytes = BASE64_STANDARD
        .decode(content)
        .map_err(|e| ToolError::invalid_content(e.to_string()))?;

    let name = filename
        .map(str::to_string)
        .or_else(|| attachment.metadata_str("filename").map(str::to_string))
        .unwrap_or_else(|| format!("shape.{}", attachment.format));
    let name = Path::new(&name).file_name().map_or_else(
        || format!("shape.{}", attachment.format),
        |n| n.to_string_lossy().into_owned(),
    );

    std::fs::create_dir_all(output_dir).map_err(|e| ToolError::file_write(output_dir, e))?;
    let output_path = output_dir.join(name);
    std::fs::write(&output_path, &bytes).map_err(|e| ToolError::file_write(&output_path, e))?;

    tracing::info!(path = %output_path.display(), size = bytes.len(), "Saved shape file");
    Ok(SaveOutcome::Saved(output_path))
}

/// Checks a file against an `algorithm:digest` hash.
///
/// Only the digest is compared. A missing or unreadable file fails the check.
#[must_use]
pub fn verify_integrity(path: &Path, expected: &str) -> bool {
    let expected = ContentHash::parse(expected);
    match hash_file(path) {
        Ok(actual) => actual.digest.eq_ignore_ascii_case(&expected.digest),
        Err(e) => {
            tracing::debug!(error = %e, "Integrity check could not hash file");
            false
        }
    }
}

/// Finds a shape reference under `primary_dir`, then each of `search_dirs`.
///
/// Absolute references and references containing `.` or `..` never match.
#[must_use]
pub fn resolve_local_path(
    reference: &str,
    primary_dir: &Path,
    search_dirs: &[PathBuf],
) -> Option<PathBuf> {
    if !is_plain_relative(reference) {
        tracing::warn!(reference, "Shape reference is not a plain relative path");
        return None;
    }
    std::iter::once(primary_dir)
        .chain(search_dirs.iter().map(PathBuf::as_path))
        .map(|dir| dir.join(reference))
        .find(|candidate| candidate.exists())
}
