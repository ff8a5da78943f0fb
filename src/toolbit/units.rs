//! Unit-decorated parameter values.
//!
//! FreeCAD stores dimensional tool bit parameters as text with a unit suffix
//! (`"5.00 mm"`, `"119.00°"`). Other parameters are free text (`"HSS"`) or
//! plain numbers (`2`). This module splits the decorated form into a number
//! and a unit, and renders it back.
//!
//! Unit detection is a loose substring heuristic, not a unit table: any
//! remainder after the leading number that contains one of
//! [`UNIT_INDICATORS`] counts as a unit. A remainder such as `"mystery"`
//! is therefore treated as a unit because it contains `m`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Substrings whose presence marks a remainder as a unit.
pub const UNIT_INDICATORS: [&str; 4] = ["m", "°", "in", "deg"];

/// The degree symbol, rendered without a separating space.
pub const DEGREE: &str = "°";

/// A parsed tool bit parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A number with a unit suffix, e.g. `5.00 mm`.
    Quantity {
        /// Numeric part.
        value: f64,
        /// Trimmed unit text.
        unit: String,
    },
    /// Free text that does not look like a quantity.
    Text(String),
    /// A plain JSON number.
    Number(Number),
    /// Any other JSON value, kept as-is.
    Other(Value),
}

impl ParamValue {
    /// Returns the numeric part and unit if this is a quantity.
    #[must_use]
    pub fn as_quantity(&self) -> Option<(f64, &str)> {
        match self {
            Self::Quantity { value, unit } => Some((*value, unit)),
            _ => None,
        }
    }

    /// Returns the value in FreeCAD's textual form.
    #[must_use]
    pub fn to_native_string(&self) -> String {
        match self {
            Self::Quantity { value, unit } => format_value(&Value::from(*value), Some(unit)),
            Self::Text(text) => text.clone(),
            Self::Number(number) => number.to_string(),
            Self::Other(value) => plain_string(value),
        }
    }
}

fn quantity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([-+]?[0-9]*\.?[0-9]+)\s*(.+)$").expect("quantity pattern is valid")
    })
}

/// Parses a raw parameter value that may carry a unit.
///
/// Non-text values are returned unchanged. Text is split into a number and a
/// unit only when the remainder after the number contains a unit indicator;
/// everything else stays text.
#[must_use]
pub fn parse_value(raw: &Value) -> ParamValue {
    match raw {
        Value::String(text) => parse_text(text),
        Value::Number(number) => ParamValue::Number(number.clone()),
        other => ParamValue::Other(other.clone()),
    }
}

fn parse_text(text: &str) -> ParamValue {
    let Some(captures) = quantity_pattern().captures(text.trim()) else {
        return ParamValue::Text(text.to_string());
    };

    let unit = &captures[2];
    if !UNIT_INDICATORS.iter().any(|marker| unit.contains(marker)) {
        return ParamValue::Text(text.to_string());
    }

    // Digit strings beyond f64 range parse to infinity, which JSON cannot hold.
    match captures[1].parse::<f64>() {
        Ok(value) if value.is_finite() => ParamValue::Quantity {
            value,
            unit: unit.trim().to_string(),
        },
        _ => ParamValue::Text(text.to_string()),
    }
}

/// Formats a value with an optional unit in FreeCAD's textual form.
///
/// Numbers are rendered with two decimals. The degree symbol is appended
/// directly, other units are separated by one space. A non-numeric value
/// drops the unit.
#[must_use]
pub fn format_value(value: &Value, unit: Option<&str>) -> String {
    let Some(unit) = unit else {
        return plain_string(value);
    };

    match value.as_f64() {
        Some(number) if unit == DEGREE => format!("{number:.2}{DEGREE}"),
        Some(number) => format!("{number:.2} {unit}"),
        None => plain_string(value),
    }
}

/// Renders a JSON value as plain text, without quotes around strings.
#[must_use]
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
