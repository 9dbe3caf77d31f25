//! Import boundary for ability trees.
//!
//! Reads tree documents and editor configuration from RON, JSON or TOML
//! files, normalizes the older prerequisite shapes once, and seeds a
//! persistence gateway with the result.

pub mod config;
pub mod loader;
pub mod schema;

pub use config::{EditorConfig, load_editor_config};
pub use loader::{DataLoadError, import_tree, load_tree_document};
