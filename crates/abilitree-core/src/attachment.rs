//! Attachment points (sockets): abilities that hold a reference to a whole
//! other tree.
//!
//! A socket is declared once, right after its ability is created, and lives
//! until that ability is deleted. Attaching stores the other tree's id only;
//! nothing is copied or merged into this tree's graph. Compatibility is a
//! plain tag comparison between the socket's `allowed_type` and the
//! candidate tree's type.

use crate::graph::PrerequisiteGraph;
use crate::id::{AbilityId, AttachmentPointId, TreeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Errors that can occur during attachment operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("ability not found: {0}")]
    UnknownNode(AbilityId),
    #[error("attachment point not found: {0}")]
    UnknownSocket(AttachmentPointId),
    #[error("{0} is a plain ability, not a socket")]
    NotASocket(AbilityId),
    #[error("{0} already has prerequisites or is already a socket")]
    AlreadyConfigured(AbilityId),
    #[error("{socket} accepts '{expected}' trees, got {}", .found.as_deref().unwrap_or("an untyped tree"))]
    TypeMismatch {
        socket: AttachmentPointId,
        expected: String,
        found: Option<String>,
    },
    #[error("{socket} already holds {tree}; detach it first")]
    AlreadyAttached {
        socket: AttachmentPointId,
        tree: TreeId,
    },
    #[error("{0} is used by more than one socket")]
    DuplicateSocket(AttachmentPointId),
    #[error("no attachment point ids left in this tree")]
    PointIdsExhausted,
}

/// Socket metadata carried by a socket ability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPoint {
    pub id: AttachmentPointId,
    /// Tree type tag this socket accepts. `None` accepts any tree.
    #[serde(default)]
    pub allowed_type: Option<String>,
    /// The attached tree, or `None` for an empty socket.
    #[serde(default)]
    pub attached_tree: Option<TreeId>,
}

impl AttachmentPoint {
    /// Whether a tree with the given type tag may be attached here.
    pub fn accepts(&self, candidate_type: Option<&str>) -> bool {
        match &self.allowed_type {
            None => true,
            Some(expected) => candidate_type == Some(expected.as_str()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attached_tree.is_none()
    }
}

/// All sockets of one tree, keyed by their owning ability.
#[derive(Debug, Clone, Default)]
pub struct AttachmentRegistry {
    points: BTreeMap<AbilityId, AttachmentPoint>,
    /// Past `u32::MAX` once the last point id has been given out.
    next_point: u64,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from loaded socket records.
    pub fn from_points(
        entries: impl IntoIterator<Item = (AbilityId, AttachmentPoint)>,
    ) -> Result<Self, AttachmentError> {
        let mut points = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for (owner, point) in entries {
            if !seen.insert(point.id) {
                return Err(AttachmentError::DuplicateSocket(point.id));
            }
            if points.insert(owner, point).is_some() {
                return Err(AttachmentError::AlreadyConfigured(owner));
            }
        }
        let next_point = seen.last().map_or(0, |p| u64::from(p.0) + 1);
        Ok(Self { points, next_point })
    }

    /// Turn a freshly created ability into a socket.
    ///
    /// Fails if the ability already has prerequisites or is already a socket.
    pub fn mark_as_socket(
        &mut self,
        graph: &PrerequisiteGraph,
        node: AbilityId,
        allowed_type: Option<String>,
    ) -> Result<AttachmentPointId, AttachmentError> {
        self.check_fresh(graph, node)?;
        let id = self.reserve_point()?;
        self.points.insert(
            node,
            AttachmentPoint {
                id,
                allowed_type,
                attached_tree: None,
            },
        );
        Ok(id)
    }

    /// Hand out the next attachment point id without installing a socket.
    pub fn reserve_point(&mut self) -> Result<AttachmentPointId, AttachmentError> {
        let id = u32::try_from(self.next_point)
            .map(AttachmentPointId)
            .map_err(|_| AttachmentError::PointIdsExhausted)?;
        self.next_point += 1;
        Ok(id)
    }

    /// Install a socket whose point id was reserved earlier.
    ///
    /// Same freshness rules as [`AttachmentRegistry::mark_as_socket`].
    pub fn install(
        &mut self,
        graph: &PrerequisiteGraph,
        node: AbilityId,
        point: AttachmentPoint,
    ) -> Result<(), AttachmentError> {
        self.check_fresh(graph, node)?;
        if self.points.values().any(|p| p.id == point.id) {
            return Err(AttachmentError::DuplicateSocket(point.id));
        }
        self.next_point = self.next_point.max(u64::from(point.id.0) + 1);
        self.points.insert(node, point);
        Ok(())
    }

    /// Attach a tree to an empty socket whose type tag it matches.
    pub fn attach(
        &mut self,
        socket: AttachmentPointId,
        candidate: TreeId,
        candidate_type: Option<&str>,
    ) -> Result<(), AttachmentError> {
        let point = self.point_mut(socket)?;
        if let Some(tree) = point.attached_tree {
            return Err(AttachmentError::AlreadyAttached { socket, tree });
        }
        if !point.accepts(candidate_type) {
            return Err(AttachmentError::TypeMismatch {
                socket,
                expected: point.allowed_type.clone().unwrap_or_default(),
                found: candidate_type.map(str::to_owned),
            });
        }
        point.attached_tree = Some(candidate);
        Ok(())
    }

    /// Empty a socket. Returns the tree that was attached, if any.
    pub fn detach(&mut self, socket: AttachmentPointId) -> Result<Option<TreeId>, AttachmentError> {
        let point = self.point_mut(socket)?;
        Ok(point.attached_tree.take())
    }

    /// Drop the socket owned by a deleted ability.
    pub fn remove_owner(&mut self, node: AbilityId) -> Option<AttachmentPoint> {
        self.points.remove(&node)
    }

    // -- Queries --

    /// The socket owned by an ability, if it is one.
    pub fn socket(&self, node: AbilityId) -> Option<&AttachmentPoint> {
        self.points.get(&node)
    }

    /// The ability owning a socket.
    pub fn owner(&self, socket: AttachmentPointId) -> Option<AbilityId> {
        self.points
            .iter()
            .find(|(_, p)| p.id == socket)
            .map(|(&owner, _)| owner)
    }

    /// Resolve the socket of an ability, failing for plain abilities.
    pub fn socket_of(&self, node: AbilityId) -> Result<AttachmentPointId, AttachmentError> {
        self.points
            .get(&node)
            .map(|p| p.id)
            .ok_or(AttachmentError::NotASocket(node))
    }

    /// All sockets with their owners, in owner order.
    pub fn sockets(&self) -> impl Iterator<Item = (AbilityId, &AttachmentPoint)> {
        self.points.iter().map(|(&owner, p)| (owner, p))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn check_fresh(&self, graph: &PrerequisiteGraph, node: AbilityId) -> Result<(), AttachmentError> {
        let groups = graph
            .groups(node)
            .ok_or(AttachmentError::UnknownNode(node))?;
        if !groups.is_empty() || self.points.contains_key(&node) {
            return Err(AttachmentError::AlreadyConfigured(node));
        }
        Ok(())
    }

    fn point_mut(
        &mut self,
        socket: AttachmentPointId,
    ) -> Result<&mut AttachmentPoint, AttachmentError> {
        self.points
            .values_mut()
            .find(|p| p.id == socket)
            .ok_or(AttachmentError::UnknownSocket(socket))
    }
}
