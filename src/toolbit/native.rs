//! FreeCAD tool bit (`.fctb`) and tool library (`.fctl`) documents.
//!
//! Both formats are plain JSON. A tool bit looks like:
//!
//! ```text
//! {
//!   "version": 2,
//!   "id": "5mm_Drill",
//!   "name": "5mm Drill",
//!   "shape": "drill.fcstd",
//!   "shape-type": "Drill",
//!   "parameter": { "Diameter": "5.00 mm", "TipAngle": "119.00°", "Material": "HSS" },
//!   "attribute": {}
//! }
//! ```
//!
//! and a library references tool bits by number and relative path:
//!
//! ```text
//! { "version": 1, "label": "Default", "tools": [ { "nr": 1, "path": "5mm_Drill.fctb" } ] }
//! ```
//!
//! Parsing normalises the document into a typed record and keeps the whole
//! input as `raw_document`, which is what gets written back on save.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use super::units::{self, ParamValue};
use super::{is_plain_relative, ToolError, ToolResult};

/// Required top-level keys of a tool bit document.
pub const TOOL_BIT_REQUIRED: [&str; 5] = ["version", "name", "shape", "shape-type", "parameter"];

/// Required top-level keys of a tool library document.
pub const TOOL_LIBRARY_REQUIRED: [&str; 2] = ["version", "tools"];

/// A single FreeCAD tool bit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolBit {
    /// Document format version.
    pub version: i64,
    /// Stable tool identifier, absent in some files.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Shape file reference, e.g. `endmill.fcstd`.
    pub shape_file: String,
    /// Shape kind, e.g. `Drill`, `Endmill`, `VBit`, `Probe`.
    pub shape_type: String,
    /// Parameters in document order, with unit-decorated values split.
    pub parameters: IndexMap<String, ParamValue>,
    /// Opaque attribute mapping.
    pub attributes: Map<String, Value>,
    /// The document this record was parsed from.
    #[serde(skip)]
    pub raw_document: Value,
}

impl ToolBit {
    /// Opens and parses a `.fctb` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// lacks required fields.
    pub fn open(path: impl AsRef<Path>) -> ToolResult<Self> {
        let doc = read_document(path.as_ref())?;
        parse_tool_bit(&doc)
    }

    /// Writes the retained document to a `.fctb` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ToolResult<()> {
        write_document(path.as_ref(), &self.raw_document)
    }

    /// Returns the native JSON document for this tool bit.
    #[must_use]
    pub fn to_document(&self) -> Value {
        self.raw_document.clone()
    }

    /// Gets a parameter by its FreeCAD name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }
}

/// A tool library entry: tool number and bit path relative to the bit directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    /// Tool number (`nr`).
    pub number: i64,
    /// Relative path of the `.fctb` file.
    pub path: String,
}

/// A FreeCAD tool library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolLibrary {
    /// Document format version.
    pub version: i64,
    /// Library label, from `label` or else `name`.
    pub label: Option<String>,
    /// Tool entries in document order.
    pub tools: Vec<LibraryEntry>,
    /// The document this record was parsed from.
    #[serde(skip)]
    pub raw_document: Value,
}

impl ToolLibrary {
    /// Opens and parses a `.fctl` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// lacks required fields.
    pub fn open(path: impl AsRef<Path>) -> ToolResult<Self> {
        let doc = read_document(path.as_ref())?;
        parse_tool_library(&doc)
    }

    /// Writes the retained document to a `.fctl` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ToolResult<()> {
        write_document(path.as_ref(), &self.raw_document)
    }

    /// Returns the native JSON document for this library.
    #[must_use]
    pub fn to_document(&self) -> Value {
        self.raw_document.clone()
    }

    /// Returns the first entry with the given tool number.
    #[must_use]
    pub fn tool_by_number(&self, number: i64) -> Option<&LibraryEntry> {
        self.tools.iter().find(|entry| entry.number == number)
    }

    /// Loads every referenced tool bit relative to `bits_dir`.
    ///
    /// Entries that cannot be loaded are kept and marked, so the result always
    /// has one item per library entry. Entries whose path is not a plain
    /// relative path are marked failed without touching the filesystem.
    #[must_use]
    pub fn resolve_tools(&self, bits_dir: &Path) -> Vec<ResolvedTool> {
        self.resolve_tools_with(bits_dir, |_| Ok(()))
    }

    /// Like [`resolve_tools`](Self::resolve_tools), but runs `check` on each
    /// resolved path before reading it. A rejected path is marked failed
    /// with the returned message.
    #[must_use]
    pub fn resolve_tools_with<F>(&self, bits_dir: &Path, check: F) -> Vec<ResolvedTool>
    where
        F: Fn(&Path) -> Result<(), String>,
    {
        self.tools
            .iter()
            .map(|entry| ResolvedTool {
                entry: entry.clone(),
                status: resolve_entry(entry, bits_dir, &check),
            })
            .collect()
    }
}

fn resolve_entry<F>(entry: &LibraryEntry, bits_dir: &Path, check: &F) -> ToolStatus
where
    F: Fn(&Path) -> Result<(), String>,
{
    if !is_plain_relative(&entry.path) {
        let err = ToolError::unsafe_path("tool path", entry.path.clone());
        tracing::warn!(nr = entry.number, error = %err, "Tool bit path rejected");
        return ToolStatus::Failed(err.to_string());
    }

    let path = bits_dir.join(&entry.path);
    if !path.exists() {
        tracing::warn!(nr = entry.number, path = %path.display(), "Tool bit not found");
        return ToolStatus::Missing;
    }
    if let Err(message) = check(&path) {
        tracing::warn!(nr = entry.number, %message, "Tool bit path rejected");
        return ToolStatus::Failed(message);
    }

    match ToolBit::open(&path) {
        Ok(bit) => ToolStatus::Loaded(Box::new(bit)),
        Err(e) => {
            tracing::warn!(nr = entry.number, error = %e, "Tool bit could not be parsed");
            ToolStatus::Failed(e.to_string())
        }
    }
}

/// Outcome of loading one library entry's tool bit.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolStatus {
    /// The tool bit was parsed.
    Loaded(Box<ToolBit>),
    /// No file exists at the entry's path.
    Missing,
    /// The file exists but could not be parsed.
    Failed(String),
}

/// A library entry together with its loaded tool bit, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    /// The library entry.
    pub entry: LibraryEntry,
    /// Load outcome.
    pub status: ToolStatus,
}

impl ResolvedTool {
    /// Returns the tool bit if it was loaded.
    #[must_use]
    pub fn tool(&self) -> Option<&ToolBit> {
        match &self.status {
            ToolStatus::Loaded(bit) => Some(bit),
            _ => None,
        }
    }
}

/// Parses a tool bit document.
///
/// Every entry under `parameter` is passed through [`units::parse_value`].
///
/// # Errors
///
/// Returns [`ToolError::MissingFields`] listing every absent required key, or
/// [`ToolError::InvalidField`] if a field has the wrong type.
pub fn parse_tool_bit(doc: &Value) -> ToolResult<ToolBit> {
    let obj = as_document(doc)?;
    require_fields(obj, &TOOL_BIT_REQUIRED)?;

    let parameter = obj["parameter"]
        .as_object()
        .ok_or_else(|| ToolError::invalid_field("parameter", "expected an object"))?;
    let parameters = parameter
        .iter()
        .map(|(key, raw)| (key.clone(), units::parse_value(raw)))
        .collect();

    let attributes = match obj.get("attribute") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(ToolError::invalid_field("attribute", "expected an object")),
    };

    let bit = ToolBit {
        version: integer_field(obj, "version")?,
        id: optional_text(obj, "id"),
        name: text_field(obj, "name")?,
        shape_file: text_field(obj, "shape")?,
        shape_type: text_field(obj, "shape-type")?,
        parameters,
        attributes,
        raw_document: doc.clone(),
    };

    tracing::debug!(name = %bit.name, shape_type = %bit.shape_type, "Parsed tool bit");
    Ok(bit)
}

/// Parses a tool library document.
///
/// # Errors
///
/// Returns [`ToolError::MissingFields`] listing every absent required key, or
/// [`ToolError::InvalidField`] if `tools` is not a list of `{nr, path}` entries.
pub fn parse_tool_library(doc: &Value) -> ToolResult<ToolLibrary> {
    let obj = as_document(doc)?;
    require_fields(obj, &TOOL_LIBRARY_REQUIRED)?;

    let entries = obj["tools"]
        .as_array()
        .ok_or_else(|| ToolError::invalid_field("tools", "'tools' field must be a list"))?;

    let tools = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_entry(index, entry))
        .collect::<ToolResult<Vec<_>>>()?;

    let label = non_empty_text(obj, "label").or_else(|| non_empty_text(obj, "name"));

    let library = ToolLibrary {
        version: integer_field(obj, "version")?,
        label,
        tools,
        raw_document: doc.clone(),
    };

    tracing::debug!(label = ?library.label, tools = library.tools.len(), "Parsed tool library");
    Ok(library)
}

fn parse_entry(index: usize, entry: &Value) -> ToolResult<LibraryEntry> {
    let field = format!("tools[{index}]");
    let number = entry
        .get("nr")
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolError::invalid_field(&field, "expected an integer 'nr'"))?;
    let path = entry
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_field(&field, "expected a string 'path'"))?;
    Ok(LibraryEntry {
        number,
        path: path.to_string(),
    })
}

/// Reads a JSON document from disk.
///
/// # Errors
///
/// Returns [`ToolError::FileRead`] or [`ToolError::InvalidJson`].
pub fn read_document(path: &Path) -> ToolResult<Value> {
    let file = File::open(path).map_err(|e| ToolError::file_read(path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ToolError::invalid_json(path.display().to_string(), e))
}

/// Writes a JSON document as pretty-printed UTF-8.
///
/// # Errors
///
/// Returns [`ToolError::FileWrite`] if serialisation or writing fails.
pub fn write_document(path: &Path, doc: &Value) -> ToolResult<()> {
    let bytes = serde_json::to_vec_pretty(doc)
        .map_err(|e| ToolError::file_write(path, io::Error::other(e)))?;
    std::fs::write(path, bytes).map_err(|e| ToolError::file_write(path, e))?;
    tracing::info!(path = %path.display(), "Wrote document");
    Ok(())
}

fn as_document(doc: &Value) -> ToolResult<&Map<String, Value>> {
    doc.as_object()
        .ok_or_else(|| ToolError::invalid_field("document", "expected a JSON object"))
}

fn require_fields(obj: &Map<String, Value>, required: &[&str]) -> ToolResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !obj.contains_key(*field))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::missing_fields(missing))
    }
}

fn integer_field(obj: &Map<String, Value>, field: &str) -> ToolResult<i64> {
    obj.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolError::invalid_field(field, "expected an integer"))
}

fn text_field(obj: &Map<String, Value>, field: &str) -> ToolResult<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::invalid_field(field, "expected a string"))
}

fn optional_text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => Some(units::plain_string(value)),
    }
}

fn non_empty_text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drill_document() -> Value {
        json!({
            "version": 2,
            "id": "5mm_Drill",
            "name": "5mm Drill",
            "shape": "drill.fcstd",
            "shape-type": "Drill",
            "parameter": {
                "Diameter": "5.00 mm",
                "TipAngle": "119.00°",
                "Material": "HSS",
                "Flutes": 2
            },
            "attribute": {}
        })
    }

    #[test]
    fn parse_drill() {
        let bit = parse_tool_bit(&drill_document()).unwrap();
        assert_eq!(bit.version, 2);
        assert_eq!(bit.id.as_deref(), Some("5mm_Drill"));
        assert_eq!(bit.name, "5mm Drill");
        assert_eq!(bit.shape_file, "drill.fcstd");
        assert_eq!(bit.shape_type, "Drill");
        assert_eq!(bit.parameter("Diameter").unwrap().as_quantity(), Some((5.0, "mm")));
        assert_eq!(bit.parameter("TipAngle").unwrap().as_quantity(), Some((119.0, "°")));
        assert_eq!(bit.parameter("Material"), Some(&ParamValue::Text("HSS".into())));
        assert_eq!(bit.parameter("Flutes"), Some(&ParamValue::Number(2.into())));
        assert_eq!(bit.raw_document, drill_document());
    }

    #[test]
    fn parameter_order_is_preserved() {
        let bit = parse_tool_bit(&drill_document()).unwrap();
        let keys: Vec<_> = bit.parameters.keys().map(String::as_str).collect();
        assert_eq!(keys, ["Diameter", "TipAngle", "Material", "Flutes"]);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let err = parse_tool_bit(&json!({"version": 2, "shape": "x.fcstd"})).unwrap_err();
        match err {
            ToolError::MissingFields { fields } => {
                assert_eq!(fields, ["name", "shape-type", "parameter"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn attribute_defaults_to_empty() {
        let mut doc = drill_document();
        doc.as_object_mut().unwrap().remove("attribute");
        let bit = parse_tool_bit(&doc).unwrap();
        assert!(bit.attributes.is_empty());
    }

    #[test]
    fn id_is_optional() {
        let mut doc = drill_document();
        doc.as_object_mut().unwrap().remove("id");
        assert_eq!(parse_tool_bit(&doc).unwrap().id, None);
    }

    #[test]
    fn parameter_must_be_object() {
        let mut doc = drill_document();
        doc["parameter"] = json!([]);
        assert!(matches!(
            parse_tool_bit(&doc),
            Err(ToolError::InvalidField { ref field, .. }) if field == "parameter"
        ));
    }

    #[test]
    fn library_label_falls_back_to_name() {
        let lib = parse_tool_library(&json!({"version": 1, "name": "Shop", "tools": []})).unwrap();
        assert_eq!(lib.label.as_deref(), Some("Shop"));

        let lib = parse_tool_library(&json!({"version": 1, "tools": []})).unwrap();
        assert_eq!(lib.label, None);
    }

    #[test]
    fn library_tools_must_be_list() {
        let err = parse_tool_library(&json!({"version": 1, "tools": {}})).unwrap_err();
        assert!(err.to_string().contains("must be a list"));
    }

    #[test]
    fn library_missing_fields() {
        let err = parse_tool_library(&json!({"label": "x"})).unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: version, tools");
    }

    #[test]
    fn library_entries_in_order() {
        let lib = parse_tool_library(&json!({
            "version": 1,
            "label": "Default",
            "tools": [{"nr": 3, "path": "c.fctb"}, {"nr": 1, "path": "a.fctb"}]
        }))
        .unwrap();
        assert_eq!(lib.tools[0], LibraryEntry { number: 3, path: "c.fctb".into() });
        assert_eq!(lib.tools[1].number, 1);
        assert_eq!(lib.tool_by_number(1).map(|e| e.path.as_str()), Some("a.fctb"));
        assert!(lib.tool_by_number(7).is_none());
    }
}
