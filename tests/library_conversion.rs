//! Tool library conversion tests.
//!
//! These tests lay out a FreeCAD tools directory (`Bit/`, `Library/`) on
//! disk and exercise library parsing, tool resolution, tool set conversion
//! and tool set export.

use std::collections::BTreeMap;
use std::path::Path;

use cam_tool_exchange::toolbit::convert::{
    exchange_to_native_library, export_tool_set, library_to_presets, native_to_exchange_item,
    native_to_exchange_library, tool_number_duplicates, tools_to_native_library,
};
use cam_tool_exchange::toolbit::{ErrorKind, ToolError, ToolItem, ToolLibrary, ToolSet, ToolStatus};
use serde_json::{json, Value};
use tempfile::TempDir;

/// Creates a temporary directory inside `.tmp/` for test isolation.
fn test_temp_dir() -> TempDir {
    let tmp_root = std::path::Path::new(".tmp");
    std::fs::create_dir_all(tmp_root).expect("Failed to create .tmp directory");
    let tmp_root = tmp_root
        .canonicalize()
        .expect("Failed to canonicalize .tmp path");
    tempfile::tempdir_in(&tmp_root).expect("Failed to create temp dir")
}

fn write_json(path: &Path, doc: &Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(doc).unwrap()).unwrap();
}

fn bit(name: &str, shape_type: &str, diameter: &str) -> Value {
    json!({
        "version": 2,
        "name": name,
        "shape": format!("{}.fcstd", shape_type.to_lowercase()),
        "shape-type": shape_type,
        "parameter": {"Diameter": diameter},
        "attribute": {}
    })
}

/// Tools root with two good bits, one broken bit and a library referencing
/// those plus one missing file.
fn tools_root() -> TempDir {
    let root = test_temp_dir();
    let bits = root.path().join("Bit");
    write_json(&bits.join("drill.fctb"), &bit("5mm Drill", "Drill", "5.00 mm"));
    write_json(&bits.join("endmill.fctb"), &bit("6mm Endmill", "Endmill", "6.00 mm"));
    write_json(&bits.join("broken.fctb"), &json!({"version": 2}));
    write_json(
        &root.path().join("Library").join("shop.fctl"),
        &json!({
            "version": 1,
            "label": "Shop Tools",
            "tools": [
                {"nr": 1, "path": "drill.fctb"},
                {"nr": 2, "path": "endmill.fctb"},
                {"nr": 3, "path": "missing.fctb"},
                {"nr": 4, "path": "broken.fctb"}
            ]
        }),
    );
    root
}

// =============================================================================
// Parsing and resolution
// =============================================================================

#[test]
fn open_and_resolve_library() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    assert_eq!(library.version, 1);
    assert_eq!(library.label.as_deref(), Some("Shop Tools"));
    assert_eq!(library.tools.len(), 4);
    assert_eq!(library.tool_by_number(2).unwrap().path, "endmill.fctb");
    assert!(library.tool_by_number(9).is_none());

    let resolved = library.resolve_tools(&root.path().join("Bit"));
    assert_eq!(resolved.len(), 4);
    assert_eq!(resolved[0].tool().unwrap().name, "5mm Drill");
    assert_eq!(resolved[1].tool().unwrap().name, "6mm Endmill");
    assert_eq!(resolved[2].status, ToolStatus::Missing);
    assert!(matches!(&resolved[3].status, ToolStatus::Failed(msg) if msg.contains("name")));
}

#[test]
fn entries_leaving_bits_dir_are_not_read() {
    let root = tools_root();
    let library = cam_tool_exchange::toolbit::native::parse_tool_library(&json!({
        "version": 1,
        "tools": [
            {"nr": 1, "path": "../Bit/drill.fctb"},
            {"nr": 2, "path": root.path().join("Bit/drill.fctb")},
            {"nr": 3, "path": "drill.fctb"}
        ]
    }))
    .unwrap();

    let resolved = library.resolve_tools(&root.path().join("Bit"));
    assert!(matches!(
        &resolved[0].status,
        ToolStatus::Failed(msg) if msg.contains("../Bit/drill.fctb")
    ));
    assert!(matches!(resolved[1].status, ToolStatus::Failed(_)));
    assert!(resolved[2].tool().is_some());
}

#[test]
fn resolution_check_can_reject_paths() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    let resolved = library.resolve_tools_with(&root.path().join("Bit"), |path| {
        if path.ends_with("endmill.fctb") {
            Err("denied".to_string())
        } else {
            Ok(())
        }
    });
    assert!(resolved[0].tool().is_some());
    assert_eq!(resolved[1].status, ToolStatus::Failed("denied".into()));
    assert_eq!(resolved[2].status, ToolStatus::Missing);
}

#[test]
fn label_falls_back_to_name() {
    let root = test_temp_dir();
    let path = root.path().join("named.fctl");
    write_json(&path, &json!({"version": 1, "label": "", "name": "Legacy", "tools": []}));
    assert_eq!(ToolLibrary::open(&path).unwrap().label.as_deref(), Some("Legacy"));
}

#[test]
fn malformed_entries_are_rejected() {
    let root = test_temp_dir();
    let path = root.path().join("bad.fctl");
    write_json(&path, &json!({"version": 1, "tools": [{"nr": "one", "path": "x.fctb"}]}));

    let err = ToolLibrary::open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(matches!(err, ToolError::InvalidField { ref field, .. } if field == "tools[0]"));
}

#[test]
fn missing_library_fields() {
    let root = test_temp_dir();
    let path = root.path().join("empty.fctl");
    write_json(&path, &json!({}));
    assert_eq!(
        ToolLibrary::open(&path).unwrap_err().to_string(),
        "Missing required fields: version, tools"
    );
}

// =============================================================================
// Library <-> tool set
// =============================================================================

#[test]
fn library_to_tool_set() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    let resolved = library.resolve_tools(&root.path().join("Bit"));

    let set = native_to_exchange_library(&library, "shop", &resolved);
    assert_eq!(set.name, "Shop Tools");
    assert_eq!(set.description, "FreeCAD library: Shop Tools");
    assert_eq!(set.set_type, "template");
    assert_eq!(set.status, "active");
    assert_eq!(set.activation.source, "freecad");

    let numbers: Vec<i64> = set.members.iter().map(|m| m.tool_number).collect();
    assert_eq!(numbers, [1, 2, 3, 4]);
    assert_eq!(set.members[0].tool_path.as_deref(), Some("drill.fctb"));
    assert_eq!(set.members[1].description.as_deref(), Some("6mm Endmill"));
    assert_eq!(set.members[2].description, None);

    let meta = set.native_metadata.as_ref().unwrap();
    assert_eq!(meta.version, Some(1));
    assert_eq!(meta.original_label.as_deref(), Some("Shop Tools"));
}

#[test]
fn unlabelled_library_uses_fallback_name() {
    let library = cam_tool_exchange::toolbit::native::parse_tool_library(&json!({
        "version": 1,
        "tools": [{"nr": 1, "path": "a.fctb"}]
    }))
    .unwrap();
    let set = native_to_exchange_library(&library, "from_file", &[]);
    assert_eq!(set.name, "from_file");
    assert_eq!(set.members[0].description, None);
}

#[test]
fn tool_set_to_library_round_trip() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    let set = native_to_exchange_library(&library, "shop", &[]);

    let wire = serde_json::to_value(&set).unwrap();
    let set: ToolSet = serde_json::from_value(wire).unwrap();
    let back = exchange_to_native_library(&set).unwrap();

    assert_eq!(back.version, library.version);
    assert_eq!(back.label, library.label);
    assert_eq!(back.tools, library.tools);
}

#[test]
fn tool_set_defaults_when_converting_back() {
    let set: ToolSet = serde_json::from_value(json!({
        "members": [
            {"tool_number": 5},
            {"tool_number": 2, "tool_path": "custom.fctb"}
        ]
    }))
    .unwrap();

    let library = exchange_to_native_library(&set).unwrap();
    assert_eq!(library.version, 1);
    assert_eq!(library.label.as_deref(), Some("Unnamed Library"));
    assert_eq!(library.tools[0].path, "tool_5.fctb");
    assert_eq!(library.tools[1].path, "custom.fctb");
    assert_eq!(library.to_document()["tools"][0]["nr"], 5);
}

#[test]
fn tool_map_is_sorted_by_number() {
    let mut tools = BTreeMap::new();
    tools.insert(10, ToolItem::default_named("ten"));
    tools.insert(3, ToolItem::default_named("three"));

    let library = tools_to_native_library("Map", &tools).unwrap();
    let numbers: Vec<i64> = library.tools.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [3, 10]);
    assert_eq!(library.tools[0].path, "tool_3.fctb");
}

#[test]
fn duplicate_tool_numbers_are_reported_not_rejected() {
    let library = cam_tool_exchange::toolbit::native::parse_tool_library(&json!({
        "version": 1,
        "tools": [
            {"nr": 1, "path": "a.fctb"},
            {"nr": 1, "path": "b.fctb"},
            {"nr": 2, "path": "c.fctb"}
        ]
    }))
    .unwrap();
    assert_eq!(tool_number_duplicates(&library).into_iter().collect::<Vec<_>>(), [1]);
}

// =============================================================================
// Tool presets
// =============================================================================

#[test]
fn presets_bind_loaded_tools_to_machine() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    let resolved = library.resolve_tools(&root.path().join("Bit"));

    let presets = library_to_presets(&library, &resolved, "router-1");
    let numbers: Vec<i64> = presets.iter().map(|p| p.tool_number).collect();
    assert_eq!(numbers, [1, 2]);

    let drill = &presets[0];
    assert_eq!(drill.machine_id, "router-1");
    assert_eq!(drill.description, "5mm Drill");
    assert_eq!(drill.source, "freecad");
    assert_eq!(drill.source_path, "drill.fctb");
    assert_eq!(drill.library_name.as_deref(), Some("Shop Tools"));
    assert_eq!(drill.tool_data.dimension("diameter"), Some((5.0, "mm")));

    let wire = serde_json::to_value(drill).unwrap();
    assert_eq!(wire["tool_data"]["type"], "cutting_tool");
}

#[test]
fn presets_without_resolution_are_empty() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    assert!(library_to_presets(&library, &[], "router-1").is_empty());
}

// =============================================================================
// Tool set export
// =============================================================================

trait NamedItem {
    fn default_named(name: &str) -> Self;
}

impl NamedItem for ToolItem {
    fn default_named(name: &str) -> Self {
        serde_json::from_value(json!({
            "description": name,
            "geometry": {"diameter": 4.0, "diameter_unit": "mm"}
        }))
        .unwrap()
    }
}

#[test]
fn export_writes_library_and_bits() {
    let root = tools_root();
    let library = ToolLibrary::open(root.path().join("Library/shop.fctl")).unwrap();
    let resolved = library.resolve_tools(&root.path().join("Bit"));
    let mut set = native_to_exchange_library(&library, "shop", &resolved);
    set.members.truncate(2);

    let tools: BTreeMap<i64, ToolItem> = resolved
        .iter()
        .filter_map(|r| r.tool().map(|bit| (r.entry.number, native_to_exchange_item(bit))))
        .collect();

    let out = test_temp_dir();
    let library_path = export_tool_set(&set, &tools, &out.path().join("export"), "endmill").unwrap();
    assert_eq!(library_path, out.path().join("export").join("shop_tools.fctl"));

    let exported = ToolLibrary::open(&library_path).unwrap();
    assert_eq!(exported.tools.len(), 2);

    let drill: Value =
        serde_json::from_slice(&std::fs::read(out.path().join("export/drill.fctb")).unwrap())
            .unwrap();
    assert_eq!(drill["shape-type"], "Drill");
    assert_eq!(drill["parameter"]["Diameter"], "5.00 mm");
}

#[test]
fn export_without_tool_fails() {
    let set: ToolSet = serde_json::from_value(json!({
        "name": "Partial",
        "members": [{"tool_number": 1}, {"tool_number": 2}]
    }))
    .unwrap();
    let mut tools = BTreeMap::new();
    tools.insert(1, ToolItem::default_named("one"));

    let out = test_temp_dir();
    let err = export_tool_set(&set, &tools, out.path(), "endmill").unwrap_err();
    assert!(matches!(err, ToolError::MissingTool { tool_number: 2 }));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn export_without_members_uses_tool_map() {
    let set: ToolSet = serde_json::from_value(json!({"name": "From Map"})).unwrap();
    let mut tools = BTreeMap::new();
    tools.insert(7, ToolItem::default_named("seven"));

    let out = test_temp_dir();
    let library_path = export_tool_set(&set, &tools, out.path(), "endmill").unwrap();
    assert!(library_path.ends_with("from_map.fctl"));
    assert!(out.path().join("tool_7.fctb").exists());
}

#[test]
fn export_rejects_paths_outside_output_dir() {
    let mut tools = BTreeMap::new();
    tools.insert(1, ToolItem::default_named("one"));
    let parent = test_temp_dir();
    let out = parent.path().join("out");

    let set: ToolSet = serde_json::from_value(json!({
        "name": "Shop",
        "members": [{"tool_number": 1, "tool_path": "../outside.fctb"}]
    }))
    .unwrap();
    let err = export_tool_set(&set, &tools, &out, "endmill").unwrap_err();
    assert!(matches!(err, ToolError::UnsafePath { ref path, .. } if path == "../outside.fctb"));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!parent.path().join("outside.fctb").exists());
    assert!(!out.exists());

    let set: ToolSet = serde_json::from_value(json!({"name": "../escaped"})).unwrap();
    let err = export_tool_set(&set, &tools, &out, "endmill").unwrap_err();
    assert!(matches!(err, ToolError::UnsafePath { .. }));
    assert!(!parent.path().join("escaped.fctl").exists());
    assert!(!out.exists());
}
