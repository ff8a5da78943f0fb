//! Tool-exchange service records.
//!
//! These types mirror the service's JSON payloads field for field. They are
//! built by the converter from native records, or deserialised from service
//! responses, and are serialised back to the same wire shape.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source system tag written into attachments and tool set activation.
pub const SOURCE_SYSTEM: &str = "freecad";

/// Name used when an item carries no description.
pub const UNNAMED_TOOL: &str = "Unnamed Tool";

/// Exchange-side tool classification.
///
/// The service only distinguishes a handful of kinds; unknown kinds are kept
/// verbatim so they survive a round trip through this crate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolType {
    /// Any cutting tool.
    #[default]
    CuttingTool,
    /// A touch probe.
    Probe,
    /// A kind this crate does not know about.
    Other(String),
}

impl ToolType {
    /// Returns the wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CuttingTool => "cutting_tool",
            Self::Probe => "probe",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ToolType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "cutting_tool" => Self::CuttingTool,
            "probe" => Self::Probe,
            _ => Self::Other(value),
        }
    }
}

impl From<ToolType> for String {
    fn from(value: ToolType) -> Self {
        match value {
            ToolType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Tool material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    /// Material name, e.g. `HSS` or `Carbide`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Native fields that the exchange classification cannot reconstruct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NativeMetadata {
    /// Shape file reference.
    #[serde(rename = "shape", default)]
    pub shape_file: Option<String>,
    /// Exact native shape kind.
    #[serde(default)]
    pub shape_type: Option<String>,
    /// Native tool id.
    #[serde(default)]
    pub id: Option<String>,
    /// Native document version.
    #[serde(default)]
    pub version: Option<i64>,
}

/// A service tool item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolItem {
    /// Service-assigned identifier, if the item came from the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool classification.
    #[serde(rename = "type", default)]
    pub tool_type: ToolType,
    /// Human-readable name.
    #[serde(default = "default_description")]
    pub description: String,
    /// Geometry values; unit-decorated values use `<key>` and `<key>_unit`.
    #[serde(default)]
    pub geometry: IndexMap<String, Value>,
    /// Tool material.
    #[serde(default)]
    pub material: Option<Material>,
    /// Shape file attachment.
    #[serde(rename = "shape_data", default)]
    pub shape_attachment: Option<ShapeAttachment>,
    /// Lossless native side-channel.
    #[serde(rename = "freecad_metadata", default)]
    pub native_metadata: Option<NativeMetadata>,
}

fn default_description() -> String {
    UNNAMED_TOOL.to_string()
}

impl ToolItem {
    /// Returns the native id from metadata, else the top-level id.
    #[must_use]
    pub fn native_id(&self) -> Option<&str> {
        self.native_metadata
            .as_ref()
            .and_then(|meta| meta.id.as_deref())
            .or(self.id.as_deref())
    }

    /// Returns the value and unit of a geometry key, if both are present.
    #[must_use]
    pub fn dimension(&self, key: &str) -> Option<(f64, &str)> {
        let value = self.geometry.get(key)?.as_f64()?;
        let unit = self.geometry.get(&format!("{key}_unit"))?.as_str()?;
        Some((value, unit))
    }
}

/// How a shape attachment locates its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A path on the machine that produced the record.
    LocalPath,
    /// A URL the content was uploaded to.
    Url,
    /// Base64 content embedded in the record.
    Inline,
}

/// Location and integrity data of a shape file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeReference {
    /// Reference kind.
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    /// Path or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Base64 content for inline references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Content hash in `algorithm:hexdigest` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// File size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// A binary shape file attached to a tool item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeAttachment {
    /// File extension, lower-case, e.g. `fcstd`.
    pub format: String,
    /// System that produced the shape.
    #[serde(default = "default_source_system")]
    pub source_system: String,
    /// Content location.
    pub reference: ShapeReference,
    /// Free-form metadata (`shape_type`, `original_reference`, `filename`).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_source_system() -> String {
    SOURCE_SYSTEM.to_string()
}

impl ShapeAttachment {
    /// Returns a string metadata entry.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A tool set member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSetMember {
    /// Tool number.
    pub tool_number: i64,
    /// Relative path of the native tool bit file.
    #[serde(default)]
    pub tool_path: Option<String>,
    /// Tool name, when the tool bit could be loaded.
    #[serde(default)]
    pub description: Option<String>,
}

/// Provenance of a tool set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Source system tag.
    pub source: String,
    /// Library file name the set was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_file: Option<String>,
}

impl Default for Activation {
    fn default() -> Self {
        Self {
            source: SOURCE_SYSTEM.to_string(),
            library_file: None,
        }
    }
}

/// Native library fields kept for round trips.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibraryMetadata {
    /// Native library version.
    #[serde(default)]
    pub version: Option<i64>,
    /// Label as it appeared in the library file.
    #[serde(default)]
    pub original_label: Option<String>,
}

/// A service tool set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSet {
    /// Service-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Set name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Set type, e.g. `template`.
    #[serde(rename = "type", default = "default_set_type")]
    pub set_type: String,
    /// Members in tool table order.
    #[serde(default)]
    pub members: Vec<ToolSetMember>,
    /// Lifecycle status, e.g. `active`.
    #[serde(default = "default_status")]
    pub status: String,
    /// Provenance.
    #[serde(default)]
    pub activation: Activation,
    /// Native library side-channel.
    #[serde(rename = "freecad_metadata", default, skip_serializing_if = "Option::is_none")]
    pub native_metadata: Option<LibraryMetadata>,
}

/// A tool bound to a machine's tool table slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPreset {
    /// Machine the preset belongs to.
    pub machine_id: String,
    /// Tool table slot.
    pub tool_number: i64,
    /// Tool name.
    pub description: String,
    /// The tool, as an exchange item.
    pub tool_data: ToolItem,
    /// Source system tag.
    #[serde(default = "default_source_system")]
    pub source: String,
    /// Library-relative path of the native tool bit.
    pub source_path: String,
    /// Label of the library the preset came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_name: Option<String>,
}

fn default_set_type() -> String {
    "template".to_string()
}

fn default_status() -> String {
    "active".to_string()
}
