//! The persistence boundary.
//!
//! Storage is an external collaborator reached through a narrow CRUD trait.
//! Each call is atomic for a single entity; the session is responsible for
//! sequencing writes that span several entities.

use abilitree_core::attachment::AttachmentPoint;
use abilitree_core::graph::PrerequisiteGroup;
use abilitree_core::id::{AbilityId, TreeId};
use abilitree_core::tree::{Ability, AbilityDraft, AbilityKind, AbilityPatch, TreeRecord};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("backend failure: {0}")]
    Backend(String),
}

impl GatewayError {
    pub fn ability_not_found(id: AbilityId) -> Self {
        GatewayError::NotFound {
            resource: "ability",
            id: id.0.to_string(),
        }
    }

    pub fn tree_not_found(id: TreeId) -> Self {
        GatewayError::NotFound {
            resource: "tree",
            id: id.0.to_string(),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Write payloads
// ---------------------------------------------------------------------------

/// Data for a new tree record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTree {
    pub name: String,
    pub tier_count: u32,
    #[serde(default)]
    pub tree_type: Option<String>,
}

/// Partial tree update. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreePatch {
    pub name: Option<String>,
    pub tier_count: Option<u32>,
    pub tree_type: Option<Option<String>>,
}

impl TreePatch {
    pub fn tier_count(tier_count: u32) -> Self {
        Self {
            tier_count: Some(tier_count),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, record: &mut TreeRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(tier_count) = self.tier_count {
            record.tier_count = tier_count;
        }
        if let Some(tree_type) = &self.tree_type {
            record.tree_type = tree_type.clone();
        }
    }
}

/// Partial ability update. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AbilityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<Option<String>>,
    pub tier: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub prerequisites: Option<Vec<PrerequisiteGroup>>,
    /// Replacement socket state. Ignored for plain abilities.
    pub attachment: Option<AttachmentPoint>,
}

impl AbilityUpdate {
    pub fn placement(tier: u32, x: f64, y: f64) -> Self {
        Self {
            tier: Some(tier),
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn prerequisites(groups: Vec<PrerequisiteGroup>) -> Self {
        Self {
            prerequisites: Some(groups),
            ..Self::default()
        }
    }

    pub fn attachment(point: AttachmentPoint) -> Self {
        Self {
            attachment: Some(point),
            ..Self::default()
        }
    }

    /// Apply the update to a stored record.
    pub fn apply_to(&self, ability: &mut Ability) {
        if let Some(name) = &self.name {
            ability.name = name.clone();
        }
        if let Some(description) = &self.description {
            ability.description = description.clone();
        }
        if let Some(icon) = &self.icon {
            ability.icon = icon.clone();
        }
        if let Some(tier) = self.tier {
            ability.tier = tier;
        }
        if let Some(x) = self.x {
            ability.x = x;
        }
        if let Some(y) = self.y {
            ability.y = y;
        }
        if let Some(groups) = &self.prerequisites {
            ability.prerequisites = groups.clone();
        }
        if let (Some(point), AbilityKind::Socket(current)) = (&self.attachment, &mut ability.kind) {
            *current = point.clone();
        }
    }
}

impl From<AbilityPatch> for AbilityUpdate {
    fn from(patch: AbilityPatch) -> Self {
        Self {
            name: patch.name,
            description: patch.description,
            icon: patch.icon,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Record store used by [`crate::TreeSession`].
///
/// Calls are synchronous: the session waits for each write before applying
/// the change in memory or issuing the next write.
pub trait PersistenceGateway {
    fn create_tree(&self, tree: &NewTree) -> GatewayResult<TreeId>;

    fn get_tree(&self, id: TreeId) -> GatewayResult<TreeRecord>;

    fn update_tree(&self, id: TreeId, patch: &TreePatch) -> GatewayResult<()>;

    /// Delete a tree and every ability it owns.
    fn delete_tree(&self, id: TreeId) -> GatewayResult<()>;

    /// Store a new ability and return the id assigned to it.
    fn create_ability(&self, tree: TreeId, draft: &AbilityDraft) -> GatewayResult<AbilityId>;

    fn update_ability(&self, id: AbilityId, update: &AbilityUpdate) -> GatewayResult<()>;

    fn delete_ability(&self, id: AbilityId) -> GatewayResult<()>;

    /// Every ability of a tree, in id order.
    fn list_abilities(&self, tree: TreeId) -> GatewayResult<Vec<Ability>>;
}
