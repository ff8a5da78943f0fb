//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// Subdirectory of the tools root holding `.fctb` tool bits.
pub const BIT_SUBDIR: &str = "Bit";

/// Subdirectory of the tools root holding shape files.
pub const SHAPE_SUBDIR: &str = "Shape";

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Directories the server may read from and write to.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// FreeCAD tools root containing `Bit/`, `Library/` and `Shape/`.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,

    /// Explicit shape search directories, replacing the derived ones.
    #[serde(default)]
    pub shape_search_dirs: Option<Vec<PathBuf>>,

    /// Conversion defaults.
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversion.default_shape.trim().is_empty() {
            return Err(ConfigError::invalid("conversion.default_shape", "must not be empty"));
        }
        if self.conversion.machine_id.trim().is_empty() {
            return Err(ConfigError::invalid("conversion.machine_id", "must not be empty"));
        }
        Ok(())
    }

    /// Directory library entries are resolved against.
    #[must_use]
    pub fn bits_dir(&self) -> Option<PathBuf> {
        self.tools_dir.as_ref().map(|root| root.join(BIT_SUBDIR))
    }

    /// Directory imported shape attachments are written to.
    #[must_use]
    pub fn shapes_dir(&self) -> Option<PathBuf> {
        self.tools_dir.as_ref().map(|root| root.join(SHAPE_SUBDIR))
    }

    /// Directories searched for a shape reference, in order.
    ///
    /// `shape_search_dirs` wins when set. Otherwise the tools root, then
    /// `Bit/`, then `Shape/`.
    #[must_use]
    pub fn shape_search_order(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.shape_search_dirs {
            return dirs.clone();
        }
        self.tools_dir.as_ref().map_or_else(Vec::new, |root| {
            vec![
                root.clone(),
                root.join(BIT_SUBDIR),
                root.join(SHAPE_SUBDIR),
            ]
        })
    }
}

/// Conversion defaults passed into the converter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionConfig {
    /// Shape used for items that carry no shape reference.
    /// Default: "endmill"
    #[serde(default = "default_shape")]
    pub default_shape: String,

    /// Machine the exchange service associates synced tools with.
    /// Default: "freecad_default"
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            default_shape: default_shape(),
            machine_id: default_machine_id(),
        }
    }
}

fn default_shape() -> String {
    "endmill".to_string()
}

fn default_machine_id() -> String {
    "freecad_default".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert!(config.allowed_paths.is_empty());
        assert_eq!(config.conversion.default_shape, "endmill");
        assert_eq!(config.conversion.machine_id, "freecad_default");
        assert!(config.shape_search_order().is_empty());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "allowed_paths": ["/tools"],
            "tools_dir": "/tools",
            "conversion": {
                "default_shape": "ballend",
                "machine_id": "router-1"
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.allowed_paths, vec![PathBuf::from("/tools")]);
        assert_eq!(config.conversion.default_shape, "ballend");
        assert_eq!(config.conversion.machine_id, "router-1");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.bits_dir(), Some(PathBuf::from("/tools/Bit")));
        assert_eq!(config.shapes_dir(), Some(PathBuf::from("/tools/Shape")));
    }

    #[test]
    fn derived_shape_search_order() {
        let config: Config = serde_json::from_str(r#"{"tools_dir": "/t"}"#).unwrap();
        assert_eq!(
            config.shape_search_order(),
            vec![
                PathBuf::from("/t"),
                PathBuf::from("/t/Bit"),
                PathBuf::from("/t/Shape"),
            ]
        );
    }

    #[test]
    fn explicit_shape_search_dirs_win() {
        let config: Config =
            serde_json::from_str(r#"{"tools_dir": "/t", "shape_search_dirs": ["/s"]}"#).unwrap();
        assert_eq!(config.shape_search_order(), vec![PathBuf::from("/s")]);
    }

    #[test]
    fn reject_empty_default_shape() {
        let json = r#"{"conversion": {"default_shape": ""}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_empty_machine_id() {
        let json = r#"{"conversion": {"machine_id": "  "}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { key, .. }) if key == "conversion.machine_id"
        ));
    }

    #[test]
    fn logging_config_defaults() {
        assert_eq!(LoggingConfig::default().level, "warn");
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"unknown_field": "value"}"#);
        assert!(result.is_err());
    }
}
