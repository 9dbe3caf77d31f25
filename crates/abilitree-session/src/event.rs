use abilitree_core::graph::PrerequisiteEdge;
use abilitree_core::id::{AbilityId, AttachmentPointId, GroupId, TreeId};
use abilitree_core::tree::Ability;
use serde::{Deserialize, Serialize};

/// Something the renderer should react to.
///
/// Each event carries enough data to patch the view without re-reading the
/// whole tree. Queued by the session; drain with
/// [`crate::TreeSession::drain_events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    AbilityCreated {
        ability: Ability,
        column: i32,
    },
    AbilityEdited {
        ability: AbilityId,
    },
    /// A node was dropped and snapped into a cell.
    NodeMoved {
        ability: AbilityId,
        tier: u32,
        column: i32,
        x: f64,
        y: f64,
    },
    /// A connection gesture is waiting for an AND/OR choice.
    LinkPending {
        source: AbilityId,
        target: AbilityId,
    },
    LinkCommitted {
        edge: PrerequisiteEdge,
    },
    LinkCancelled {
        source: AbilityId,
        target: AbilityId,
    },
    /// `source` no longer appears in any group of `target`.
    LinkRemoved {
        source: AbilityId,
        target: AbilityId,
    },
    /// One group of `target` was removed; its other groups are unchanged.
    GroupRemoved {
        target: AbilityId,
        group: GroupId,
    },
    NodeDeleted {
        ability: AbilityId,
        /// Abilities whose prerequisite groups lost the deleted id.
        affected: Vec<AbilityId>,
    },
    AttachPending {
        socket: AbilityId,
    },
    AttachCancelled {
        socket: AbilityId,
    },
    SocketAttached {
        socket: AbilityId,
        point: AttachmentPointId,
        tree: TreeId,
    },
    SocketDetached {
        socket: AbilityId,
        point: AttachmentPointId,
        tree: TreeId,
    },
    TierCountChanged {
        tier_count: u32,
    },
    TreeRenamed {
        name: String,
    },
}

impl SessionEvent {
    /// The group a committed link created, if this is a link commit.
    pub fn committed_group(&self) -> Option<GroupId> {
        match self {
            SessionEvent::LinkCommitted { edge } => Some(edge.group),
            _ => None,
        }
    }
}
