//! Serde structs mirroring the tree document files.
//!
//! Abilities refer to each other by name. Names are resolved into ids by
//! [`crate::loader::resolve_document`]; nothing here is validated beyond
//! what serde checks.

use abilitree_core::graph::Logic;
use serde::Deserialize;

// ===========================================================================
// Documents
// ===========================================================================

/// A whole tree as written in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeDocument {
    pub name: String,
    pub tier_count: i64,
    #[serde(default)]
    pub tree_type: Option<String>,
    #[serde(default)]
    pub abilities: Vec<AbilityData>,
}

/// One ability entry. `name` is its key within the document.
#[derive(Debug, Clone, Deserialize)]
pub struct AbilityData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub tier: u32,
    /// Grid column; used when no explicit `x` is given.
    #[serde(default)]
    pub column: Option<i32>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteData>,
    /// Present for socket abilities.
    #[serde(default)]
    pub socket: Option<SocketData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocketData {
    #[serde(default)]
    pub allowed_type: Option<String>,
}

// ===========================================================================
// Prerequisites
// ===========================================================================

/// Group logic as spelled in files. Accepts any casing seen in older data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LogicData {
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

impl From<LogicData> for Logic {
    fn from(logic: LogicData) -> Self {
        match logic {
            LogicData::And => Logic::And,
            LogicData::Or => Logic::Or,
        }
    }
}

/// A prerequisite group in any of the shapes found in tree files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PrerequisiteData {
    /// Oldest form: a bare list of names, all required.
    Names(Vec<String>),
    /// Older form: `{ type = "OR", ids = [...] }`.
    Typed {
        #[serde(rename = "type")]
        logic: LogicData,
        ids: Vec<String>,
    },
    /// Current form: `{ logic = "OR", members = [...] }`.
    Group {
        logic: LogicData,
        members: Vec<String>,
    },
}

impl PrerequisiteData {
    /// Collapse every shape into a logic and its member names.
    pub fn normalize(self) -> (Logic, Vec<String>) {
        match self {
            PrerequisiteData::Names(names) => (Logic::And, names),
            PrerequisiteData::Typed { logic, ids } => (logic.into(), ids),
            PrerequisiteData::Group { logic, members } => (logic.into(), members),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
