//! The ability tree aggregate.
//!
//! An [`AbilityTree`] composes the per-ability display and placement data
//! with the [`PrerequisiteGraph`] and the [`AttachmentRegistry`], and keeps
//! the tree-level invariant that every ability's tier lies in
//! `[1, tier_count]`.
//!
//! Records handed to and loaded from persistence are flat [`Ability`]
//! values; socket-ness is the closed [`AbilityKind`] variant, fixed when the
//! ability is created.

use crate::attachment::{AttachmentError, AttachmentPoint, AttachmentRegistry};
use crate::geometry::{ConfigurationError, GridConfig, validate_tier_count};
use crate::graph::{GraphError, Logic, PrerequisiteGraph, PrerequisiteGroup};
use crate::id::{AbilityId, AttachmentPointId, GroupId, TreeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from tree-level operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error("tier {tier} is outside 1..={tier_count}")]
    TierOutOfRange { tier: u32, tier_count: u32 },
    #[error("cannot shrink to {requested} tiers: {ability} sits in tier {tier}")]
    TierCountConflict {
        ability: AbilityId,
        tier: u32,
        requested: u32,
    },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Tree-level record as stored by persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub id: TreeId,
    pub name: String,
    pub tier_count: u32,
    /// Type tag sockets in other trees match against.
    #[serde(default)]
    pub tree_type: Option<String>,
}

/// Plain ability or socket. Chosen at creation, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbilityKind {
    #[default]
    Plain,
    Socket(AttachmentPoint),
}

impl AbilityKind {
    pub fn attachment_point(&self) -> Option<&AttachmentPoint> {
        match self {
            AbilityKind::Plain => None,
            AbilityKind::Socket(point) => Some(point),
        }
    }
}

/// A complete ability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    pub id: AbilityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Opaque icon reference.
    #[serde(default)]
    pub icon: Option<String>,
    pub tier: u32,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteGroup>,
    #[serde(default)]
    pub kind: AbilityKind,
}

/// What the caller supplies to create an ability.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewAbility {
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub tier: u32,
    pub x: f64,
    pub y: f64,
    /// `Some` makes the ability a socket accepting the given type tag
    /// (`Some(None)` accepts any tree).
    pub socket: Option<Option<String>>,
}

/// An ability record before persistence has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDraft {
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub tier: u32,
    pub x: f64,
    pub y: f64,
    pub kind: AbilityKind,
}

/// Edits to display fields. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbilityPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<Option<String>>,
}

impl AbilityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.icon.is_none()
    }
}

/// Display and placement data the tree keeps per ability.
#[derive(Debug, Clone, PartialEq)]
struct AbilityDetails {
    name: String,
    description: String,
    icon: Option<String>,
    tier: u32,
    x: f64,
    y: f64,
}

/// Outcome of deleting an ability.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    /// The record as it was before deletion.
    pub removed: Ability,
    /// Abilities whose prerequisite groups lost the removed id.
    pub affected: Vec<AbilityId>,
}

// ---------------------------------------------------------------------------
// AbilityTree
// ---------------------------------------------------------------------------

/// One tree: its record, abilities, prerequisite graph and sockets.
#[derive(Debug, Clone)]
pub struct AbilityTree {
    record: TreeRecord,
    details: BTreeMap<AbilityId, AbilityDetails>,
    graph: PrerequisiteGraph,
    sockets: AttachmentRegistry,
}

impl AbilityTree {
    /// Create an empty tree. The record's tier count must be at least 1.
    pub fn new(record: TreeRecord) -> Result<Self, TreeError> {
        validate_tier_count(i64::from(record.tier_count))?;
        Ok(Self {
            record,
            details: BTreeMap::new(),
            graph: PrerequisiteGraph::new(),
            sockets: AttachmentRegistry::new(),
        })
    }

    /// Rebuild a tree from persisted records, validating every invariant.
    pub fn from_records(
        record: TreeRecord,
        abilities: impl IntoIterator<Item = Ability>,
    ) -> Result<Self, TreeError> {
        let tier_count = validate_tier_count(i64::from(record.tier_count))?;

        let mut details = BTreeMap::new();
        let mut groups = Vec::new();
        let mut points = Vec::new();
        for ability in abilities {
            check_tier(ability.tier, tier_count)?;
            if let AbilityKind::Socket(point) = ability.kind {
                points.push((ability.id, point));
            }
            groups.push((ability.id, ability.prerequisites));
            details.insert(
                ability.id,
                AbilityDetails {
                    name: ability.name,
                    description: ability.description,
                    icon: ability.icon,
                    tier: ability.tier,
                    x: ability.x,
                    y: ability.y,
                },
            );
        }

        Ok(Self {
            record,
            details,
            graph: PrerequisiteGraph::from_groups(groups)?,
            sockets: AttachmentRegistry::from_points(points)?,
        })
    }

    // -- Accessors --

    pub fn id(&self) -> TreeId {
        self.record.id
    }

    pub fn record(&self) -> &TreeRecord {
        &self.record
    }

    pub fn tier_count(&self) -> u32 {
        self.record.tier_count
    }

    pub fn graph(&self) -> &PrerequisiteGraph {
        &self.graph
    }

    pub fn sockets(&self) -> &AttachmentRegistry {
        &self.sockets
    }

    pub fn contains(&self, id: AbilityId) -> bool {
        self.details.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Assemble the full record of one ability.
    pub fn ability(&self, id: AbilityId) -> Option<Ability> {
        let d = self.details.get(&id)?;
        Some(Ability {
            id,
            name: d.name.clone(),
            description: d.description.clone(),
            icon: d.icon.clone(),
            tier: d.tier,
            x: d.x,
            y: d.y,
            prerequisites: self.graph.groups(id).map(<[_]>::to_vec).unwrap_or_default(),
            kind: self
                .sockets
                .socket(id)
                .cloned()
                .map_or(AbilityKind::Plain, AbilityKind::Socket),
        })
    }

    /// All ability records in id order.
    pub fn abilities(&self) -> Vec<Ability> {
        self.details
            .keys()
            .filter_map(|&id| self.ability(id))
            .collect()
    }

    /// The column an ability's committed x position falls in.
    pub fn column_of(&self, id: AbilityId, grid: &GridConfig) -> Option<i32> {
        self.details.get(&id).map(|d| grid.column_of(d.x))
    }

    // -- Creation --

    /// Validate a creation request and produce the record to persist.
    ///
    /// Socket requests reserve their attachment point id here, so the point
    /// is part of the very first write.
    pub fn draft_ability(&mut self, new: NewAbility) -> Result<AbilityDraft, TreeError> {
        check_tier(new.tier, self.tier_count())?;
        let kind = match new.socket {
            None => AbilityKind::Plain,
            Some(allowed_type) => AbilityKind::Socket(AttachmentPoint {
                id: self.sockets.reserve_point()?,
                allowed_type,
                attached_tree: None,
            }),
        };
        Ok(AbilityDraft {
            name: new.name,
            description: new.description,
            icon: new.icon,
            tier: new.tier,
            x: new.x,
            y: new.y,
            kind,
        })
    }

    /// Insert a drafted ability under the id persistence assigned to it.
    pub fn insert_ability(&mut self, id: AbilityId, draft: AbilityDraft) -> Result<Ability, TreeError> {
        check_tier(draft.tier, self.tier_count())?;
        self.graph.add_node(id)?;
        if let AbilityKind::Socket(point) = draft.kind
            && let Err(e) = self.sockets.install(&self.graph, id, point)
        {
            // Keep the node set and socket set in step. The node was added
            // just above with no links, so this cannot fail.
            self.graph.remove_node(id)?;
            return Err(e.into());
        }
        self.details.insert(
            id,
            AbilityDetails {
                name: draft.name,
                description: draft.description,
                icon: draft.icon,
                tier: draft.tier,
                x: draft.x,
                y: draft.y,
            },
        );
        self.ability(id).ok_or(TreeError::Graph(GraphError::UnknownNode(id)))
    }

    // -- Edits --

    /// Commit a new tier and pixel position.
    pub fn set_position(&mut self, id: AbilityId, tier: u32, x: f64, y: f64) -> Result<(), TreeError> {
        check_tier(tier, self.tier_count())?;
        let d = self.details_mut(id)?;
        d.tier = tier;
        d.x = x;
        d.y = y;
        Ok(())
    }

    /// Apply display field edits.
    pub fn edit_details(&mut self, id: AbilityId, patch: AbilityPatch) -> Result<(), TreeError> {
        let d = self.details_mut(id)?;
        if let Some(name) = patch.name {
            d.name = name;
        }
        if let Some(description) = patch.description {
            d.description = description;
        }
        if let Some(icon) = patch.icon {
            d.icon = icon;
        }
        Ok(())
    }

    /// Change the number of tiers. Shrinking below an occupied tier fails.
    pub fn set_tier_count(&mut self, tier_count: i64) -> Result<(), TreeError> {
        let requested = validate_tier_count(tier_count)?;
        if let Some((&ability, d)) = self
            .details
            .iter()
            .filter(|(_, d)| d.tier > requested)
            .max_by_key(|(_, d)| d.tier)
        {
            return Err(TreeError::TierCountConflict {
                ability,
                tier: d.tier,
                requested,
            });
        }
        self.record.tier_count = requested;
        Ok(())
    }

    pub fn rename(&mut self, name: String) {
        self.record.name = name;
    }

    // -- Prerequisites --

    pub fn add_prerequisite_link(
        &mut self,
        target: AbilityId,
        source: AbilityId,
        logic: Logic,
    ) -> Result<GroupId, TreeError> {
        Ok(self.graph.add_prerequisite_link(target, source, logic)?)
    }

    pub fn check_link(&self, target: AbilityId, source: AbilityId) -> Result<(), TreeError> {
        Ok(self.graph.check_link(target, source)?)
    }

    pub fn remove_link(&mut self, target: AbilityId, source: AbilityId) -> bool {
        self.graph.remove_link(target, source)
    }

    pub fn remove_group(&mut self, target: AbilityId, group: GroupId) -> bool {
        self.graph.remove_group(target, group)
    }

    /// Delete an ability, cascading through prerequisites and its socket.
    pub fn remove_ability(&mut self, id: AbilityId) -> Result<Removal, TreeError> {
        let removed = self
            .ability(id)
            .ok_or(TreeError::Graph(GraphError::UnknownNode(id)))?;
        let affected = self.graph.remove_node(id)?;
        self.sockets.remove_owner(id);
        self.details.remove(&id);
        Ok(Removal { removed, affected })
    }

    pub fn is_satisfied(
        &self,
        id: AbilityId,
        unlocked: &BTreeSet<AbilityId>,
    ) -> Result<bool, TreeError> {
        Ok(self.graph.is_satisfied(id, unlocked)?)
    }

    pub fn unlockable(&self, unlocked: &BTreeSet<AbilityId>) -> Vec<AbilityId> {
        self.graph.unlockable(unlocked)
    }

    // -- Sockets --

    pub fn mark_as_socket(
        &mut self,
        id: AbilityId,
        allowed_type: Option<String>,
    ) -> Result<AttachmentPointId, TreeError> {
        Ok(self.sockets.mark_as_socket(&self.graph, id, allowed_type)?)
    }

    pub fn attach(
        &mut self,
        socket: AttachmentPointId,
        candidate: TreeId,
        candidate_type: Option<&str>,
    ) -> Result<(), TreeError> {
        Ok(self.sockets.attach(socket, candidate, candidate_type)?)
    }

    pub fn detach(&mut self, socket: AttachmentPointId) -> Result<Option<TreeId>, TreeError> {
        Ok(self.sockets.detach(socket)?)
    }

    fn details_mut(&mut self, id: AbilityId) -> Result<&mut AbilityDetails, TreeError> {
        self.details
            .get_mut(&id)
            .ok_or(TreeError::Graph(GraphError::UnknownNode(id)))
    }
}

fn check_tier(tier: u32, tier_count: u32) -> Result<(), TreeError> {
    if tier < 1 || tier > tier_count {
        return Err(TreeError::TierOutOfRange { tier, tier_count });
    }
    Ok(())
}
