//! cam-tool-exchange: FreeCAD CAM tool bits ↔ tool-exchange service records.
//!
//! Converts FreeCAD's on-disk tool bits (`.fctb`) and tool libraries
//! (`.fctl`) to the JSON records of a tool-exchange service and back, and
//! manages the binary shape files tool bits refer to.
//!
//! # Modules
//!
//! - [`toolbit`]: native documents, exchange records, conversion, shapes,
//!   duplicate detection
//! - [`config`]: configuration loading and validation
//! - [`error`]: configuration errors
//! - [`mcp`]: MCP stdio server exposing the conversions as tools

pub mod config;
pub mod error;
pub mod mcp;
pub mod toolbit;
