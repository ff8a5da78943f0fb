//! Conversion between FreeCAD records and tool-exchange records.
//!
//! # Tool bits
//!
//! | FreeCAD                       | Exchange                                    |
//! |-------------------------------|---------------------------------------------|
//! | `parameter.Material`          | `material.type`                             |
//! | `parameter.TipAngle: "60.00°"`| `geometry.tip_angle: 60.0`, `tip_angle_unit`|
//! | `parameter.Flutes: 2`         | `geometry.flutes: 2`                        |
//! | `shape-type`                  | `type` (many-to-one) and `freecad_metadata` |
//! | `shape`                       | `shape_data` stub and `freecad_metadata`    |
//!
//! The `type` classification folds every cutting shape into `cutting_tool`,
//! so the reverse direction reads the exact shape kind from
//! `freecad_metadata` and only falls back to a coarse default without it.
//!
//! # Libraries
//!
//! A library maps onto a tool set member by member, keeping order, tool
//! numbers and relative paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::exchange::{
    Activation, LibraryMetadata, Material, NativeMetadata, ToolItem, ToolPreset, ToolSet,
    ToolSetMember, ToolType, SOURCE_SYSTEM,
};
use super::native::{self, LibraryEntry, ResolvedTool, ToolBit, ToolLibrary};
use super::shape;
use super::units::{self, ParamValue};
use super::{is_plain_relative, ToolError, ToolResult, TOOL_LIBRARY_EXTENSION};

/// Geometry keys that must carry a `<key>_unit` sibling.
pub const DIMENSIONAL_KEYS: [&str; 7] = [
    "diameter",
    "length",
    "height",
    "angle",
    "tip_angle",
    "cutting_edge_height",
    "shank_diameter",
];

/// Parameter name that maps to `material.type`.
pub const MATERIAL_PARAMETER: &str = "Material";

/// Tool bit version used when an item carries no native metadata.
pub const DEFAULT_TOOL_BIT_VERSION: i64 = 2;

/// Library version used when a tool set carries no native metadata.
pub const DEFAULT_LIBRARY_VERSION: i64 = 1;

/// Label used when a tool set has no name.
pub const UNNAMED_LIBRARY: &str = "Unnamed Library";

/// Suffix of geometry keys holding a unit.
const UNIT_SUFFIX: &str = "_unit";

/// Classifies a FreeCAD shape kind for the exchange service.
///
/// Unknown kinds are treated as cutting tools.
#[must_use]
#[allow(clippy::match_same_arms)] // Known cutting kinds listed explicitly
pub fn classify_shape_type(shape_type: &str) -> ToolType {
    match shape_type {
        "Probe" => ToolType::Probe,
        "Drill" | "Endmill" | "Ballend" | "VBit" | "ThreadMill" | "ChamferMill"
        | "CornerRound" | "Reamer" | "SpottingDrill" | "SurfacingBit" => ToolType::CuttingTool,
        _ => ToolType::CuttingTool,
    }
}

/// Picks a FreeCAD shape kind for an exchange type with no native metadata.
///
/// The forward classification is lossy, so every non-probe type maps to
/// `Endmill`.
#[must_use]
pub const fn default_shape_type(tool_type: &ToolType) -> &'static str {
    match tool_type {
        ToolType::Probe => "Probe",
        _ => "Endmill",
    }
}

/// Converts a FreeCAD parameter name to a geometry key.
///
/// An underscore is inserted before each run of capitals and the result is
/// lower-cased: `CuttingEdgeHeight` → `cutting_edge_height`,
/// `SpindleRPM` → `spindle_rpm`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut in_capital_run = true;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if !in_capital_run && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            in_capital_run = true;
        } else {
            out.push(ch);
            in_capital_run = false;
        }
    }
    out
}

/// Converts a geometry key back to a FreeCAD parameter name.
///
/// `tip_angle` → `TipAngle`.
#[must_use]
pub fn to_pascal_case(key: &str) -> String {
    key.split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect()
}

/// Converts a FreeCAD tool bit to an exchange tool item.
#[must_use]
pub fn native_to_exchange_item(bit: &ToolBit) -> ToolItem {
    let mut geometry = IndexMap::new();
    let mut material = None;

    for (name, value) in &bit.parameters {
        if name == MATERIAL_PARAMETER {
            material = Some(Material {
                kind: Some(value.to_native_string()),
            });
            continue;
        }

        let key = to_snake_case(name);
        match value {
            ParamValue::Quantity { value, unit } => {
                let unit_key = format!("{key}{UNIT_SUFFIX}");
                geometry.insert(key, Value::from(*value));
                geometry.insert(unit_key, Value::String(unit.clone()));
            }
            ParamValue::Text(text) => {
                geometry.insert(key, Value::String(text.clone()));
            }
            ParamValue::Number(number) => {
                geometry.insert(key, Value::Number(number.clone()));
            }
            ParamValue::Other(other) => {
                geometry.insert(key, other.clone());
            }
        }
    }

    let shape_attachment = (!bit.shape_file.is_empty())
        .then(|| shape::local_reference(&bit.shape_file, &bit.shape_type));

    tracing::debug!(name = %bit.name, geometry = geometry.len(), "Converted tool bit to exchange item");

    ToolItem {
        id: None,
        tool_type: classify_shape_type(&bit.shape_type),
        description: bit.name.clone(),
        geometry,
        material,
        shape_attachment,
        native_metadata: Some(NativeMetadata {
            shape_file: Some(bit.shape_file.clone()),
            shape_type: Some(bit.shape_type.clone()),
            id: bit.id.clone(),
            version: Some(bit.version),
        }),
    }
}

/// Converts an exchange tool item to a FreeCAD tool bit.
///
/// `default_shape` names the shape file (without extension) used when
/// neither the metadata nor the attachment reference one.
///
/// # Errors
///
/// Returns [`ToolError::MissingUnit`] if a dimensional geometry key has no
/// `<key>_unit` sibling.
pub fn exchange_item_to_native(item: &ToolItem, default_shape: &str) -> ToolResult<ToolBit> {
    let metadata = item.native_metadata.clone().unwrap_or_default();

    let mut parameters = Map::new();
    for (key, value) in &item.geometry {
        if key.ends_with(UNIT_SUFFIX) {
            continue;
        }

        let native_value = match item.geometry.get(&format!("{key}{UNIT_SUFFIX}")) {
            Some(unit) => {
                let unit = match unit {
                    Value::Null => None,
                    other => Some(units::plain_string(other)),
                };
                Value::String(units::format_value(value, unit.as_deref()))
            }
            None if DIMENSIONAL_KEYS.contains(&key.as_str()) => {
                return Err(ToolError::missing_unit(key));
            }
            None => match value {
                Value::Number(_) => value.clone(),
                other => Value::String(units::plain_string(other)),
            },
        };
        parameters.insert(to_pascal_case(key), native_value);
    }

    if let Some(kind) = item
        .material
        .as_ref()
        .and_then(|material| material.kind.as_deref())
        .filter(|kind| !kind.is_empty())
    {
        parameters.insert(MATERIAL_PARAMETER.to_string(), Value::String(kind.to_string()));
    }

    let shape_type = metadata
        .shape_type
        .clone()
        .unwrap_or_else(|| default_shape_type(&item.tool_type).to_string());

    let shape_file = resolve_shape_file(item, &metadata)
        .unwrap_or_else(|| format!("{default_shape}.fcstd"));

    let mut doc = Map::new();
    doc.insert(
        "version".into(),
        json!(metadata.version.unwrap_or(DEFAULT_TOOL_BIT_VERSION)),
    );
    if let Some(id) = metadata.id.as_deref().or(item.id.as_deref()) {
        doc.insert("id".into(), json!(id));
    }
    doc.insert("name".into(), json!(item.description));
    doc.insert("shape".into(), json!(shape_file));
    doc.insert("shape-type".into(), json!(shape_type));
    doc.insert("parameter".into(), Value::Object(parameters));
    doc.insert("attribute".into(), json!({}));

    tracing::debug!(name = %item.description, shape_type = %shape_type, "Converted exchange item to tool bit");
    native::parse_tool_bit(&Value::Object(doc))
}

fn resolve_shape_file(item: &ToolItem, metadata: &NativeMetadata) -> Option<String> {
    let non_empty = |s: &&str| !s.is_empty();

    if let Some(shape) = metadata.shape_file.as_deref().filter(non_empty) {
        return Some(shape.to_string());
    }

    let attachment = item.shape_attachment.as_ref()?;
    attachment
        .reference
        .value
        .as_deref()
        .filter(non_empty)
        .or_else(|| attachment.metadata_str("original_reference").filter(non_empty))
        .map(str::to_string)
}

/// Converts a FreeCAD library to an exchange tool set.
///
/// `fallback_name` is used when the library has no label, typically the
/// library file stem. Member descriptions come from `resolved` tool bits
/// when present; pass an empty slice to leave them unset.
#[must_use]
pub fn native_to_exchange_library(
    library: &ToolLibrary,
    fallback_name: &str,
    resolved: &[ResolvedTool],
) -> ToolSet {
    let name = library
        .label
        .clone()
        .unwrap_or_else(|| fallback_name.to_string());

    let members = library
        .tools
        .iter()
        .map(|entry| ToolSetMember {
            tool_number: entry.number,
            tool_path: Some(entry.path.clone()),
            description: resolved
                .iter()
                .find(|r| r.entry == *entry)
                .and_then(ResolvedTool::tool)
                .map(|bit| bit.name.clone()),
        })
        .collect();

    ToolSet {
        id: None,
        description: format!("FreeCAD library: {name}"),
        set_type: "template".to_string(),
        members,
        status: "active".to_string(),
        activation: Activation::default(),
        native_metadata: Some(LibraryMetadata {
            version: Some(library.version),
            original_label: library.label.clone(),
        }),
        name,
    }
}

/// Binds every loaded tool of a library to `machine_id`, one preset per entry.
///
/// Entries are taken in library order. Entries whose tool bit is missing or
/// failed to load have no tool data and are skipped.
#[must_use]
pub fn library_to_presets(
    library: &ToolLibrary,
    resolved: &[ResolvedTool],
    machine_id: &str,
) -> Vec<ToolPreset> {
    let presets: Vec<ToolPreset> = library
        .tools
        .iter()
        .filter_map(|entry| {
            let bit = resolved
                .iter()
                .find(|r| r.entry == *entry)
                .and_then(ResolvedTool::tool)?;
            Some(ToolPreset {
                machine_id: machine_id.to_string(),
                tool_number: entry.number,
                description: bit.name.clone(),
                tool_data: native_to_exchange_item(bit),
                source: SOURCE_SYSTEM.to_string(),
                source_path: entry.path.clone(),
                library_name: library.label.clone(),
            })
        })
        .collect();

    let skipped = library.tools.len() - presets.len();
    if skipped > 0 {
        tracing::debug!(skipped, machine_id, "Skipped unresolved library entries");
    }
    presets
}

/// Converts an exchange tool set to a FreeCAD library.
///
/// Members without a tool path get `tool_<nr>.fctb`.
///
/// # Errors
///
/// Returns an error only if the generated document fails to parse, which
/// indicates a bug.
pub fn exchange_to_native_library(set: &ToolSet) -> ToolResult<ToolLibrary> {
    let tools = set
        .members
        .iter()
        .map(|member| LibraryEntry {
            number: member.tool_number,
            path: member
                .tool_path
                .clone()
                .filter(|path| !path.is_empty())
                .unwrap_or_else(|| synthesised_path(member.tool_number)),
        })
        .collect::<Vec<_>>();

    let version = set
        .native_metadata
        .as_ref()
        .and_then(|meta| meta.version)
        .unwrap_or(DEFAULT_LIBRARY_VERSION);
    let label = if set.name.is_empty() {
        UNNAMED_LIBRARY
    } else {
        set.name.as_str()
    };

    library_from_entries(version, label, &tools)
}

/// Builds a FreeCAD library from a tool-number → item mapping.
///
/// Entries are ordered by tool number and every path is synthesised.
///
/// # Errors
///
/// Returns an error only if the generated document fails to parse.
pub fn tools_to_native_library(
    name: &str,
    tools: &BTreeMap<i64, ToolItem>,
) -> ToolResult<ToolLibrary> {
    let entries = tools
        .keys()
        .map(|&number| LibraryEntry {
            number,
            path: synthesised_path(number),
        })
        .collect::<Vec<_>>();
    let label = if name.is_empty() { UNNAMED_LIBRARY } else { name };
    library_from_entries(DEFAULT_LIBRARY_VERSION, label, &entries)
}

fn library_from_entries(
    version: i64,
    label: &str,
    tools: &[LibraryEntry],
) -> ToolResult<ToolLibrary> {
    let doc = json!({
        "version": version,
        "label": label,
        "tools": tools
            .iter()
            .map(|entry| json!({"nr": entry.number, "path": entry.path}))
            .collect::<Vec<_>>(),
    });
    native::parse_tool_library(&doc)
}

fn synthesised_path(number: i64) -> String {
    format!("tool_{number}.fctb")
}

/// `<name lower-cased, spaces as underscores>.fctl`, or `library.fctl`.
fn library_file_name(name: &str) -> String {
    let stem = if name.is_empty() {
        "library".to_string()
    } else {
        name.replace(' ', "_").to_lowercase()
    };
    format!("{stem}.{TOOL_LIBRARY_EXTENSION}")
}

/// Returns the tool numbers that occur more than once in a library.
///
/// This is advisory; callers decide whether duplicates block an operation.
#[must_use]
pub fn tool_number_duplicates(library: &ToolLibrary) -> BTreeSet<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for entry in &library.tools {
        *counts.entry(entry.number).or_default() += 1;
    }
    counts
        .into_iter()
        .filter_map(|(number, count)| (count > 1).then_some(number))
        .collect()
}

/// Writes a tool set and its tools as a FreeCAD library plus tool bit files.
///
/// `output_dir` is created if needed. Each member's tool bit is written at its
/// library path, and the library itself at `<name>.fctl` with the name
/// lower-cased and spaces replaced by underscores.
///
/// # Errors
///
/// Returns [`ToolError::MissingTool`] if a member has no entry in `tools`,
/// [`ToolError::UnsafePath`] if a member path or the set name would leave
/// `output_dir`, any conversion error, or a write error. Nothing is written
/// unless every member converts.
pub fn export_tool_set(
    set: &ToolSet,
    tools: &BTreeMap<i64, ToolItem>,
    output_dir: &Path,
    default_shape: &str,
) -> ToolResult<PathBuf> {
    let library = if set.members.is_empty() {
        tools_to_native_library(&set.name, tools)?
    } else {
        exchange_to_native_library(set)?
    };

    let file_name = library_file_name(&set.name);
    if !is_plain_relative(&file_name) || Path::new(&file_name).components().count() != 1 {
        return Err(ToolError::unsafe_path("tool set name", set.name.clone()));
    }

    // Everything is checked and converted before the first write.
    let bits = library
        .tools
        .iter()
        .map(|entry| {
            if !is_plain_relative(&entry.path) {
                return Err(ToolError::unsafe_path("tool_path", entry.path.clone()));
            }
            let item = tools.get(&entry.number).ok_or(ToolError::MissingTool {
                tool_number: entry.number,
            })?;
            Ok((&entry.path, exchange_item_to_native(item, default_shape)?))
        })
        .collect::<ToolResult<Vec<_>>>()?;

    std::fs::create_dir_all(output_dir).map_err(|e| ToolError::file_write(output_dir, e))?;
    for (path, bit) in &bits {
        bit.save(output_dir.join(path))?;
    }

    let library_path = output_dir.join(file_name);
    library.save(&library_path)?;

    tracing::info!(
        path = %library_path.display(),
        tools = library.tools.len(),
        source = SOURCE_SYSTEM,
        "Exported tool set"
    );
    Ok(library_path)
}
