//! The pending-gesture state machine.
//!
//! ```text
//! Idle --begin_link--> PendingLink --commit_link(logic)--> Idle
//!                                  --cancel_link---------> Idle
//! Idle --begin_attach-> PendingAttach --commit_attach(tree)--> Idle
//!                                     --cancel_attach--------> Idle
//! ```
//!
//! Only one gesture is pending at a time; beginning a new one replaces the
//! old. Nothing here touches the tree: a pending gesture is discarded on
//! cancel without any graph or persistence call.

use abilitree_core::id::AbilityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gesture {
    #[default]
    Idle,
    /// `target` will require `source` once a logic is chosen.
    PendingLink { source: AbilityId, target: AbilityId },
    /// A socket waiting for the tree to attach.
    PendingAttach { socket: AbilityId },
}

impl Gesture {
    pub fn is_idle(&self) -> bool {
        matches!(self, Gesture::Idle)
    }

    pub fn pending_link(&self) -> Option<(AbilityId, AbilityId)> {
        match *self {
            Gesture::PendingLink { source, target } => Some((source, target)),
            _ => None,
        }
    }

    pub fn pending_attach(&self) -> Option<AbilityId> {
        match *self {
            Gesture::PendingAttach { socket } => Some(socket),
            _ => None,
        }
    }

    /// Whether the gesture refers to the given ability.
    pub fn involves(&self, id: AbilityId) -> bool {
        match *self {
            Gesture::Idle => false,
            Gesture::PendingLink { source, target } => source == id || target == id,
            Gesture::PendingAttach { socket } => socket == id,
        }
    }

    /// Take the pending link, leaving `Idle`. Any other gesture stays put.
    pub fn take_link(&mut self) -> Option<(AbilityId, AbilityId)> {
        let link = self.pending_link()?;
        *self = Gesture::Idle;
        Some(link)
    }

    /// Take the pending attach, leaving `Idle`. Any other gesture stays put.
    pub fn take_attach(&mut self) -> Option<AbilityId> {
        let socket = self.pending_attach()?;
        *self = Gesture::Idle;
        Some(socket)
    }

    /// Replace the current gesture, returning the one it supersedes.
    pub fn replace(&mut self, next: Gesture) -> Gesture {
        std::mem::replace(self, next)
    }
}
