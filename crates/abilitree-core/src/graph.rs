//! Prerequisite graph: which abilities must be unlocked before which.
//!
//! Every ability carries an ordered list of [`PrerequisiteGroup`]s. The full
//! unlock condition is the conjunction of all groups; within a group the
//! members are combined with AND or OR according to the group's [`Logic`].
//!
//! The prerequisite relation is kept acyclic: a link is rejected if the new
//! source already (transitively) requires the target. Deleting a node strips
//! it from every group that mentions it and drops groups left empty, in one
//! step, so callers never observe dangling member ids.

use crate::id::{AbilityId, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during prerequisite graph operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("ability not found: {0}")]
    UnknownNode(AbilityId),
    #[error("{0} cannot be its own prerequisite")]
    SelfReference(AbilityId),
    #[error("making {target} require {prerequisite} would create a prerequisite cycle")]
    Cycle {
        target: AbilityId,
        prerequisite: AbilityId,
    },
    #[error("ability already present: {0}")]
    DuplicateNode(AbilityId),
    #[error("{group} on {target} has no members")]
    EmptyGroup { target: AbilityId, group: GroupId },
    #[error("{0} is used by more than one prerequisite group")]
    DuplicateGroup(GroupId),
    #[error("no prerequisite group ids left in this tree")]
    GroupIdsExhausted,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// How the members of a prerequisite group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    /// Every member must be unlocked.
    And,
    /// At least one member must be unlocked.
    Or,
}

/// One AND/OR-bounded set of predecessor abilities.
///
/// `members` is never empty once the group lives in a graph. A group with a
/// single member behaves the same under either logic; it is kept as created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteGroup {
    pub id: GroupId,
    pub logic: Logic,
    pub members: BTreeSet<AbilityId>,
}

impl PrerequisiteGroup {
    /// Whether this group holds under the given unlocked set.
    pub fn is_satisfied(&self, unlocked: &BTreeSet<AbilityId>) -> bool {
        match self.logic {
            Logic::And => self.members.iter().all(|m| unlocked.contains(m)),
            Logic::Or => self.members.iter().any(|m| unlocked.contains(m)),
        }
    }
}

/// A single source -> target link as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    pub source: AbilityId,
    pub target: AbilityId,
    pub group: GroupId,
    pub logic: Logic,
}

// ---------------------------------------------------------------------------
// PrerequisiteGraph
// ---------------------------------------------------------------------------

/// The node set of one tree plus each node's prerequisite groups.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    nodes: BTreeMap<AbilityId, Vec<PrerequisiteGroup>>,
    /// Next group id to hand out. Always above every id in use; past
    /// `u32::MAX` once the last id has been given out.
    next_group: u64,
}

impl PrerequisiteGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from loaded group lists.
    ///
    /// Validates that every member exists, no group is empty or self-referential,
    /// group ids are unique, and the result is acyclic.
    pub fn from_groups(
        entries: impl IntoIterator<Item = (AbilityId, Vec<PrerequisiteGroup>)>,
    ) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();
        for (id, groups) in entries {
            if nodes.insert(id, groups).is_some() {
                return Err(GraphError::DuplicateNode(id));
            }
        }

        let mut seen_groups = BTreeSet::new();
        for (&target, groups) in &nodes {
            for group in groups {
                if !seen_groups.insert(group.id) {
                    return Err(GraphError::DuplicateGroup(group.id));
                }
                if group.members.is_empty() {
                    return Err(GraphError::EmptyGroup {
                        target,
                        group: group.id,
                    });
                }
                for member in &group.members {
                    if *member == target {
                        return Err(GraphError::SelfReference(target));
                    }
                    if !nodes.contains_key(member) {
                        return Err(GraphError::UnknownNode(*member));
                    }
                }
            }
        }

        let next_group = seen_groups.last().map_or(0, |g| u64::from(g.0) + 1);
        let graph = Self { nodes, next_group };

        let order = graph.unlock_order();
        if order.len() != graph.nodes.len() {
            // Any node missing from the order sits on a cycle.
            let ordered: BTreeSet<AbilityId> = order.into_iter().collect();
            for (&target, groups) in &graph.nodes {
                if ordered.contains(&target) {
                    continue;
                }
                if let Some(source) = groups
                    .iter()
                    .flat_map(|g| g.members.iter())
                    .find(|m| !ordered.contains(m))
                {
                    return Err(GraphError::Cycle {
                        target,
                        prerequisite: *source,
                    });
                }
            }
        }

        Ok(graph)
    }

    // -- Node set --

    /// Add a node with no prerequisites.
    pub fn add_node(&mut self, id: AbilityId) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id, Vec::new());
        Ok(())
    }

    pub fn contains(&self, id: AbilityId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = AbilityId> + '_ {
        self.nodes.keys().copied()
    }

    /// The prerequisite groups of a node, in creation order.
    pub fn groups(&self, id: AbilityId) -> Option<&[PrerequisiteGroup]> {
        self.nodes.get(&id).map(Vec::as_slice)
    }

    /// Every link in the graph, ordered by target then group order.
    pub fn edges(&self) -> impl Iterator<Item = PrerequisiteEdge> + '_ {
        self.nodes.iter().flat_map(|(&target, groups)| {
            groups.iter().flat_map(move |group| {
                group.members.iter().map(move |&source| PrerequisiteEdge {
                    source,
                    target,
                    group: group.id,
                    logic: group.logic,
                })
            })
        })
    }

    // -- Structural edits --

    /// Make `target` require `source` through a new group with the given logic.
    ///
    /// Each call creates its own group; existing groups are never merged into.
    #[instrument(level = "trace", skip(self))]
    pub fn add_prerequisite_link(
        &mut self,
        target: AbilityId,
        source: AbilityId,
        logic: Logic,
    ) -> Result<GroupId, GraphError> {
        self.check_link(target, source)?;

        let id = u32::try_from(self.next_group)
            .map(GroupId)
            .map_err(|_| GraphError::GroupIdsExhausted)?;
        let group = PrerequisiteGroup {
            id,
            logic,
            members: BTreeSet::from([source]),
        };
        self.nodes
            .get_mut(&target)
            .ok_or(GraphError::UnknownNode(target))?
            .push(group);
        self.next_group += 1;
        Ok(id)
    }

    /// Check whether `target` may require `source` without changing anything.
    pub fn check_link(&self, target: AbilityId, source: AbilityId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::UnknownNode(target));
        }
        if !self.nodes.contains_key(&source) {
            return Err(GraphError::UnknownNode(source));
        }
        if source == target {
            return Err(GraphError::SelfReference(source));
        }
        // The link is acyclic unless source already requires target.
        if self.requires(source, target) {
            return Err(GraphError::Cycle {
                target,
                prerequisite: source,
            });
        }
        Ok(())
    }

    /// Remove `source` from every group on `target`, dropping emptied groups.
    ///
    /// Returns whether anything changed. Missing links are not an error.
    pub fn remove_link(&mut self, target: AbilityId, source: AbilityId) -> bool {
        let Some(groups) = self.nodes.get_mut(&target) else {
            return false;
        };
        strip_member(groups, source)
    }

    /// Remove one whole group from `target`. Returns whether it existed.
    pub fn remove_group(&mut self, target: AbilityId, group: GroupId) -> bool {
        let Some(groups) = self.nodes.get_mut(&target) else {
            return false;
        };
        let before = groups.len();
        groups.retain(|g| g.id != group);
        groups.len() != before
    }

    /// Delete a node and strip it from every other node's groups.
    ///
    /// Returns the ids of the nodes whose prerequisites changed.
    pub fn remove_node(&mut self, id: AbilityId) -> Result<Vec<AbilityId>, GraphError> {
        if self.nodes.remove(&id).is_none() {
            return Err(GraphError::UnknownNode(id));
        }

        let mut affected = Vec::new();
        for (&other, groups) in self.nodes.iter_mut() {
            if strip_member(groups, id) {
                affected.push(other);
            }
        }
        debug!(node = %id, affected = affected.len(), "removed node from prerequisite graph");
        Ok(affected)
    }

    // -- Queries --

    /// Evaluate a node's unlock condition against an unlocked set.
    ///
    /// A node without groups is always satisfied.
    pub fn is_satisfied(
        &self,
        id: AbilityId,
        unlocked: &BTreeSet<AbilityId>,
    ) -> Result<bool, GraphError> {
        let groups = self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))?;
        Ok(groups.iter().all(|g| g.is_satisfied(unlocked)))
    }

    /// Nodes that are not yet unlocked but whose condition now holds.
    pub fn unlockable(&self, unlocked: &BTreeSet<AbilityId>) -> Vec<AbilityId> {
        self.nodes
            .iter()
            .filter(|(id, groups)| {
                !unlocked.contains(id) && groups.iter().all(|g| g.is_satisfied(unlocked))
            })
            .map(|(&id, _)| id)
            .collect()
    }

    /// Nodes that list `id` as a member of any group.
    pub fn dependents(&self, id: AbilityId) -> Vec<AbilityId> {
        self.nodes
            .iter()
            .filter(|(_, groups)| groups.iter().any(|g| g.members.contains(&id)))
            .map(|(&other, _)| other)
            .collect()
    }

    /// Every node `id` transitively requires.
    pub fn ancestors(&self, id: AbilityId) -> BTreeSet<AbilityId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(groups) = self.nodes.get(&current) else {
                continue;
            };
            for member in groups.iter().flat_map(|g| g.members.iter()) {
                if seen.insert(*member) {
                    stack.push(*member);
                }
            }
        }
        seen
    }

    /// A topological order where every node follows all of its members.
    ///
    /// Kahn's algorithm with ties broken by ascending id, so the order is
    /// deterministic. On a cyclic graph (only reachable through
    /// deserialization) the nodes on cycles are left out.
    pub fn unlock_order(&self) -> Vec<AbilityId> {
        let mut in_degree: BTreeMap<AbilityId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<AbilityId, Vec<AbilityId>> = BTreeMap::new();

        for (&target, groups) in &self.nodes {
            let members: BTreeSet<AbilityId> = groups
                .iter()
                .flat_map(|g| g.members.iter().copied())
                .filter(|m| self.nodes.contains_key(m))
                .collect();
            in_degree.insert(target, members.len());
            for member in members {
                dependents.entry(member).or_default().push(target);
            }
        }

        let mut ready: VecDeque<AbilityId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            let mut released = Vec::new();
            for next in dependents.get(&id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        released.push(*next);
                    }
                }
            }
            released.sort();
            ready.extend(released);
        }

        order
    }

    /// Whether `from` transitively requires `to` (depth-first).
    fn requires(&self, from: AbilityId, to: AbilityId) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(groups) = self.nodes.get(&current) else {
                continue;
            };
            for member in groups.iter().flat_map(|g| g.members.iter()) {
                if *member == to {
                    return true;
                }
                stack.push(*member);
            }
        }
        false
    }
}

/// Strip a member from a group list. Returns whether anything changed.
fn strip_member(groups: &mut Vec<PrerequisiteGroup>, member: AbilityId) -> bool {
    let mut changed = false;
    for group in groups.iter_mut() {
        changed |= group.members.remove(&member);
    }
    if changed {
        groups.retain(|g| !g.members.is_empty());
    }
    changed
}

// ===========================================================================
// Tests
// ===========================================================================
