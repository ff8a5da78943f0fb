//! Duplicate detection tests against realistic service payloads.

use cam_tool_exchange::toolbit::convert::native_to_exchange_item;
use cam_tool_exchange::toolbit::duplicates::signature;
use cam_tool_exchange::toolbit::native::parse_tool_bit;
use cam_tool_exchange::toolbit::{DuplicateIndex, DuplicateReason, ToolItem};
use serde_json::{json, Value};

fn existing_items() -> Vec<Value> {
    vec![
        json!({
            "id": "svc-001",
            "type": "cutting_tool",
            "description": "6mm Endmill",
            "geometry": {"diameter": 6.0, "diameter_unit": "mm"},
            "freecad_metadata": {"id": "6mm_Endmill", "shape_type": "Endmill"}
        }),
        json!({
            "id": "svc-002",
            "type": "cutting_tool",
            "description": "5mm Drill",
            "geometry": {"diameter": 5.0, "diameter_unit": "mm"}
        }),
        json!({
            "id": "svc-003",
            "type": "probe",
            "description": "Touch Probe",
            "geometry": {}
        }),
    ]
}

fn tool_bit(id: &str, name: &str, diameter: &str) -> ToolItem {
    let bit = parse_tool_bit(&json!({
        "version": 2,
        "id": id,
        "name": name,
        "shape": "endmill.fcstd",
        "shape-type": "Endmill",
        "parameter": {"Diameter": diameter}
    }))
    .unwrap();
    native_to_exchange_item(&bit)
}

#[test]
fn matches_on_native_id() {
    let index = DuplicateIndex::from_json(&existing_items());
    assert_eq!(index.len(), 3);

    let candidate = tool_bit("6mm_Endmill", "Renamed Endmill", "8.00 mm");
    let found = index.check(&candidate).unwrap();
    assert_eq!(found.reason, DuplicateReason::NativeId);
    assert_eq!(found.existing.id.as_deref(), Some("svc-001"));
}

#[test]
fn matches_on_description_and_diameter() {
    let index = DuplicateIndex::from_json(&existing_items());
    let candidate = tool_bit("new_drill", "5mm Drill", "5.00 mm");
    let found = index.check(&candidate).unwrap();
    assert_eq!(found.reason, DuplicateReason::Signature);
    assert_eq!(found.existing.id.as_deref(), Some("svc-002"));
}

#[test]
fn different_diameter_is_not_a_duplicate() {
    let index = DuplicateIndex::from_json(&existing_items());
    let candidate = tool_bit("new_drill", "5mm Drill", "5.50 mm");
    assert!(index.check(&candidate).is_none());
}

#[test]
fn items_without_diameter_have_no_signature() {
    let probe: ToolItem = serde_json::from_value(existing_items()[2].clone()).unwrap();
    assert!(signature(&probe).is_none());

    let index = DuplicateIndex::from_json(&existing_items());
    let candidate: ToolItem =
        serde_json::from_value(json!({"description": "Touch Probe", "type": "probe"})).unwrap();
    assert!(index.check(&candidate).is_none());
}

#[test]
fn first_existing_item_wins() {
    let mut items = existing_items();
    items.push(json!({
        "id": "svc-004",
        "description": "5mm Drill",
        "geometry": {"diameter": 5.0, "diameter_unit": "mm"}
    }));
    let index = DuplicateIndex::from_json(&items);
    let found = index.check(&tool_bit("x", "5mm Drill", "5.00 mm")).unwrap();
    assert_eq!(found.existing.id.as_deref(), Some("svc-002"));
}

#[test]
fn match_serialises_for_callers() {
    let index = DuplicateIndex::from_json(&existing_items());
    let found = index.check(&tool_bit("6mm_Endmill", "x", "1.00 mm")).unwrap();
    let value = serde_json::to_value(&found).unwrap();
    assert_eq!(value["reason"], "FreeCAD ID");
    assert_eq!(value["existing"]["id"], "svc-001");
}
