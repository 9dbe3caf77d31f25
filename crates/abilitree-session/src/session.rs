//! The tree session controller.
//!
//! [`TreeSession`] turns user intents into validated tree edits and
//! persistence writes. The write order is always: validate on a copy of the
//! tree, write through the gateway, then publish the copy. A rejected intent
//! never reaches the gateway; a failed write leaves the in-memory tree as it
//! was.
//!
//! Deleting an ability touches several records (each dependent loses the id
//! from its prerequisite groups, then the ability itself goes). Those writes
//! are issued one by one; if one fails, the dependents already rewritten are
//! restored to their previous groups before the error surfaces.

use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::gateway::{AbilityUpdate, GatewayError, GatewayResult, NewTree, PersistenceGateway, TreePatch};
use crate::interaction::Gesture;
use crate::view::TreeView;
use abilitree_core::attachment::{AttachmentError, AttachmentPoint};
use abilitree_core::geometry::{CellPlacement, GridConfig, Position, clamp_tier, validate_tier_count};
use abilitree_core::graph::{GraphError, Logic, PrerequisiteEdge, PrerequisiteGroup};
use abilitree_core::id::{AbilityId, AttachmentPointId, GroupId, TreeId};
use abilitree_core::tree::{
    Ability, AbilityPatch, AbilityTree, NewAbility, Removal, TreeError, TreeRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

// ---------------------------------------------------------------------------
// Selection types
// ---------------------------------------------------------------------------

/// A link addressed by its endpoints, as the renderer selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: AbilityId,
    pub target: AbilityId,
}

impl From<PrerequisiteEdge> for EdgeKey {
    fn from(edge: PrerequisiteEdge) -> Self {
        Self {
            source: edge.source,
            target: edge.target,
        }
    }
}

/// One prerequisite group, addressed by the group id an edge carries.
///
/// Linking the same pair twice gives two edges with the same endpoints but
/// different groups; this key picks exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub target: AbilityId,
    pub group: GroupId,
}

impl From<PrerequisiteEdge> for GroupKey {
    fn from(edge: PrerequisiteEdge) -> Self {
        Self {
            target: edge.target,
            group: edge.group,
        }
    }
}

/// Nodes and edges selected for deletion together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub nodes: Vec<AbilityId>,
    pub edges: Vec<EdgeKey>,
    /// Edges selected by group rather than by endpoints.
    pub groups: Vec<GroupKey>,
}

/// Outcome of [`TreeSession::delete_selection`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionRemoval {
    /// Deleted abilities in id order.
    pub removed: Vec<Removal>,
    /// Edges removed on their own.
    pub unlinked: Vec<EdgeKey>,
    /// Edges left to the node deletion because an endpoint was selected too.
    pub skipped: Vec<EdgeKey>,
    /// Groups removed on their own.
    pub ungrouped: Vec<GroupKey>,
}

// ---------------------------------------------------------------------------
// TreeSession
// ---------------------------------------------------------------------------

/// A single-writer editing session over one tree.
pub struct TreeSession<G: PersistenceGateway> {
    gateway: G,
    tree: AbilityTree,
    grid: GridConfig,
    gesture: Gesture,
    events: Vec<SessionEvent>,
}

impl<G: PersistenceGateway> TreeSession<G> {
    // -- Lifecycle --

    /// Create a new, empty tree and open a session on it.
    #[instrument(level = "debug", skip(gateway))]
    pub fn create(gateway: G, grid: GridConfig, new: NewTree) -> Result<Self, SessionError> {
        validate_tier_count(i64::from(new.tier_count)).map_err(rejected)?;
        let id = gateway.create_tree(&new).map_err(persistence_failed)?;
        let tree = AbilityTree::new(TreeRecord {
            id,
            name: new.name,
            tier_count: new.tier_count,
            tree_type: new.tree_type,
        })?;
        debug!(tree = %id, "created tree");
        Ok(Self::with_tree(gateway, grid, tree))
    }

    /// Open a session on a stored tree, rebuilding it from its records.
    #[instrument(level = "debug", skip(gateway))]
    pub fn open(gateway: G, grid: GridConfig, id: TreeId) -> Result<Self, SessionError> {
        let record = gateway.get_tree(id)?;
        let abilities = gateway.list_abilities(id)?;
        let tree = AbilityTree::from_records(record, abilities)?;
        debug!(abilities = tree.len(), "opened tree");
        Ok(Self::with_tree(gateway, grid, tree))
    }

    /// Delete the tree and all of its abilities, ending the session.
    ///
    /// The gateway is handed back whether or not the delete succeeded.
    pub fn delete_tree(self) -> (G, Result<(), SessionError>) {
        let id = self.tree.id();
        let result = self
            .gateway
            .delete_tree(id)
            .map_err(persistence_failed);
        if result.is_ok() {
            debug!(tree = %id, abilities = self.tree.len(), "deleted tree");
        }
        (self.gateway, result)
    }

    fn with_tree(gateway: G, grid: GridConfig, tree: AbilityTree) -> Self {
        Self {
            gateway,
            tree,
            grid,
            gesture: Gesture::Idle,
            events: Vec::new(),
        }
    }

    // -- Accessors --

    pub fn id(&self) -> TreeId {
        self.tree.id()
    }

    pub fn tree(&self) -> &AbilityTree {
        &self.tree
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The current node/edge projection for rendering.
    pub fn view(&self) -> TreeView {
        TreeView::project(&self.tree, &self.grid)
    }

    /// Drain all pending events. Subsequent calls return empty until new
    /// events are generated.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Get a read-only view of pending events.
    pub fn pending_events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn is_satisfied(
        &self,
        id: AbilityId,
        unlocked: &BTreeSet<AbilityId>,
    ) -> Result<bool, SessionError> {
        Ok(self.tree.is_satisfied(id, unlocked)?)
    }

    pub fn unlockable(&self, unlocked: &BTreeSet<AbilityId>) -> Vec<AbilityId> {
        self.tree.unlockable(unlocked)
    }

    /// Snap a raw position and clamp its tier into this tree.
    pub fn placement_for(&self, position: Position) -> Result<CellPlacement, SessionError> {
        let cell = self.grid.snap(position)?;
        let tier = clamp_tier(cell.tier, self.tree.tier_count());
        if tier == cell.tier {
            return Ok(cell);
        }
        Ok(CellPlacement {
            tier,
            column: cell.column,
            snapped: self.grid.placement(tier, cell.column),
        })
    }

    // -- Abilities --

    /// Create an ability with an empty prerequisite list.
    #[instrument(level = "debug", skip(self), fields(tree = %self.tree.id()))]
    pub fn create_ability(&mut self, new: NewAbility) -> Result<Ability, SessionError> {
        let mut next = self.tree.clone();
        let draft = next.draft_ability(new).map_err(rejected)?;
        let id = self
            .gateway
            .create_ability(self.tree.id(), &draft)
            .map_err(persistence_failed)?;

        let ability = match next.insert_ability(id, draft) {
            Ok(ability) => ability,
            Err(e) => {
                // The gateway handed out an id this tree cannot take.
                let original = GatewayError::Backend(format!("unusable ability id {id}: {e}"));
                return Err(match self.gateway.delete_ability(id) {
                    Ok(()) => persistence_failed(original),
                    Err(rollback) => SessionError::RollbackFailed { original, rollback },
                });
            }
        };

        self.tree = next;
        debug!(ability = %id, tier = ability.tier, "created ability");
        self.events.push(SessionEvent::AbilityCreated {
            column: self.grid.column_of(ability.x),
            ability: ability.clone(),
        });
        Ok(ability)
    }

    /// Create a socket ability accepting trees of `allowed_type` (any when `None`).
    pub fn create_socket(
        &mut self,
        new: NewAbility,
        allowed_type: Option<String>,
    ) -> Result<Ability, SessionError> {
        self.create_ability(NewAbility {
            socket: Some(allowed_type),
            ..new
        })
    }

    /// Edit display fields.
    #[instrument(level = "debug", skip(self))]
    pub fn edit_ability(&mut self, id: AbilityId, patch: AbilityPatch) -> Result<(), SessionError> {
        if patch.is_empty() {
            if !self.tree.contains(id) {
                return Err(rejected(GraphError::UnknownNode(id)));
            }
            return Ok(());
        }
        let update = AbilityUpdate::from(patch.clone());
        self.apply(
            |tree| tree.edit_details(id, patch),
            |gateway, _, _| gateway.update_ability(id, &update),
        )?;
        self.events.push(SessionEvent::AbilityEdited { ability: id });
        Ok(())
    }

    /// Drop a node at a raw position: snap it, clamp its tier, persist.
    ///
    /// The clamped tier and its canonical position are what gets stored.
    #[instrument(level = "debug", skip(self))]
    pub fn move_node(&mut self, id: AbilityId, position: Position) -> Result<CellPlacement, SessionError> {
        let cell = self.placement_for(position).map_err(rejected)?;
        let (tier, x, y) = (cell.tier, cell.snapped.x, cell.snapped.y);
        self.apply(
            |tree| tree.set_position(id, tier, x, y),
            |gateway, _, _| gateway.update_ability(id, &AbilityUpdate::placement(tier, x, y)),
        )?;
        debug!(ability = %id, tier, column = cell.column, "moved node");
        self.events.push(SessionEvent::NodeMoved {
            ability: id,
            tier,
            column: cell.column,
            x,
            y,
        });
        Ok(cell)
    }

    /// Delete an ability, cascading through every dependent's prerequisites.
    #[instrument(level = "debug", skip(self), fields(tree = %self.tree.id()))]
    pub fn delete_ability(&mut self, id: AbilityId) -> Result<Removal, SessionError> {
        let mut next = self.tree.clone();
        let removal = next.remove_ability(id).map_err(rejected)?;
        self.persist_removal(&next, &removal)?;
        self.tree = next;

        if self.gesture.involves(id) {
            let dropped = self.gesture.replace(Gesture::Idle);
            self.emit_cancelled(dropped);
        }
        debug!(ability = %id, affected = removal.affected.len(), "deleted ability");
        self.events.push(SessionEvent::NodeDeleted {
            ability: id,
            affected: removal.affected.clone(),
        });
        Ok(removal)
    }

    /// Delete selected nodes and edges.
    ///
    /// Every node is checked before anything is written. Nodes are then
    /// removed one at a time, each atomically; an edge whose endpoint is also
    /// selected is left to the node removal. On a persistence failure the
    /// nodes already removed stay removed.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_selection(&mut self, selection: &Selection) -> Result<SelectionRemoval, SessionError> {
        let nodes: BTreeSet<AbilityId> = selection.nodes.iter().copied().collect();
        if let Some(&missing) = nodes.iter().find(|id| !self.tree.contains(**id)) {
            return Err(rejected(GraphError::UnknownNode(missing)));
        }

        let mut outcome = SelectionRemoval::default();
        for &id in &nodes {
            outcome.removed.push(self.delete_ability(id)?);
        }

        let mut seen = BTreeSet::new();
        for &edge in &selection.edges {
            if !seen.insert(edge) {
                continue;
            }
            if nodes.contains(&edge.source) || nodes.contains(&edge.target) {
                outcome.skipped.push(edge);
                continue;
            }
            if self.disconnect(edge.source, edge.target)? {
                outcome.unlinked.push(edge);
            }
        }

        // Groups already gone with a deleted node or edge are no-ops.
        let mut seen = BTreeSet::new();
        for &key in &selection.groups {
            if !seen.insert(key) || nodes.contains(&key.target) {
                continue;
            }
            if self.remove_group(key.target, key.group)? {
                outcome.ungrouped.push(key);
            }
        }
        Ok(outcome)
    }

    // -- Links --

    /// Start a connection gesture: `target` will require `source`.
    ///
    /// The link is validated now so a doomed gesture never reaches the logic
    /// prompt. A link already pending is superseded.
    #[instrument(level = "debug", skip(self))]
    pub fn begin_link(&mut self, source: AbilityId, target: AbilityId) -> Result<(), SessionError> {
        self.tree.check_link(target, source).map_err(rejected)?;
        let superseded = self.gesture.replace(Gesture::PendingLink { source, target });
        self.emit_cancelled(superseded);
        self.events.push(SessionEvent::LinkPending { source, target });
        Ok(())
    }

    /// Finish the pending connection with the chosen logic.
    ///
    /// The gesture ends here whether or not the link is stored.
    #[instrument(level = "debug", skip(self))]
    pub fn commit_link(&mut self, logic: Logic) -> Result<PrerequisiteEdge, SessionError> {
        let (source, target) = self
            .gesture
            .take_link()
            .ok_or_else(|| rejected(SessionError::NoPendingGesture("link")))?;
        let group = self.apply(
            |tree| tree.add_prerequisite_link(target, source, logic),
            |gateway, tree, _| {
                gateway.update_ability(target, &AbilityUpdate::prerequisites(groups_of(tree, target)))
            },
        )?;
        let edge = PrerequisiteEdge {
            source,
            target,
            group,
            logic,
        };
        debug!(%source, %target, %group, ?logic, "committed link");
        self.events.push(SessionEvent::LinkCommitted { edge });
        Ok(edge)
    }

    /// Discard the pending connection. Returns whether one was pending.
    pub fn cancel_link(&mut self) -> bool {
        match self.gesture.take_link() {
            Some((source, target)) => {
                self.events.push(SessionEvent::LinkCancelled { source, target });
                true
            }
            None => false,
        }
    }

    /// Remove `source` from every group on `target`.
    ///
    /// Returns `false` without writing anything if there was no such link.
    #[instrument(level = "debug", skip(self))]
    pub fn disconnect(&mut self, source: AbilityId, target: AbilityId) -> Result<bool, SessionError> {
        let linked = self
            .tree
            .graph()
            .groups(target)
            .is_some_and(|groups| groups.iter().any(|g| g.members.contains(&source)));
        if !linked {
            return Ok(false);
        }
        self.apply(
            |tree| Ok(tree.remove_link(target, source)),
            |gateway, tree, _| {
                gateway.update_ability(target, &AbilityUpdate::prerequisites(groups_of(tree, target)))
            },
        )?;
        self.events.push(SessionEvent::LinkRemoved { source, target });
        Ok(true)
    }

    /// Remove one prerequisite group from `target`, leaving its other groups
    /// alone even when they share members.
    ///
    /// Returns `false` without writing anything if there was no such group.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_group(&mut self, target: AbilityId, group: GroupId) -> Result<bool, SessionError> {
        let present = self
            .tree
            .graph()
            .groups(target)
            .is_some_and(|groups| groups.iter().any(|g| g.id == group));
        if !present {
            return Ok(false);
        }
        self.apply(
            |tree| Ok(tree.remove_group(target, group)),
            |gateway, tree, _| {
                gateway.update_ability(target, &AbilityUpdate::prerequisites(groups_of(tree, target)))
            },
        )?;
        self.events.push(SessionEvent::GroupRemoved { target, group });
        Ok(true)
    }

    // -- Sockets --

    /// Start an attach gesture on a socket. A gesture already pending is
    /// superseded.
    #[instrument(level = "debug", skip(self))]
    pub fn begin_attach(&mut self, socket: AbilityId) -> Result<AttachmentPointId, SessionError> {
        let point = self.resolve_socket(socket)?;
        let superseded = self.gesture.replace(Gesture::PendingAttach { socket });
        self.emit_cancelled(superseded);
        self.events.push(SessionEvent::AttachPending { socket });
        Ok(point)
    }

    /// Attach the chosen tree to the socket of the pending attach gesture.
    pub fn commit_attach(&mut self, candidate: TreeId) -> Result<AttachmentPointId, SessionError> {
        let socket = self
            .gesture
            .take_attach()
            .ok_or_else(|| rejected(SessionError::NoPendingGesture("attach")))?;
        self.attach(socket, candidate)
    }

    /// Discard the pending attach gesture. Returns whether one was pending.
    pub fn cancel_attach(&mut self) -> bool {
        match self.gesture.take_attach() {
            Some(socket) => {
                self.events.push(SessionEvent::AttachCancelled { socket });
                true
            }
            None => false,
        }
    }

    /// Attach another tree to a socket ability.
    ///
    /// The socket must be empty. The candidate's type tag is then read from
    /// the gateway and must match the socket's allowed type, if it has one.
    #[instrument(level = "debug", skip(self))]
    pub fn attach(&mut self, socket: AbilityId, candidate: TreeId) -> Result<AttachmentPointId, SessionError> {
        if candidate == self.tree.id() {
            return Err(rejected(SessionError::SelfAttachment(candidate)));
        }
        let point = self.resolve_socket(socket)?;
        if let Some(tree) = self.tree.sockets().socket(socket).and_then(|p| p.attached_tree) {
            return Err(rejected(AttachmentError::AlreadyAttached { socket: point, tree }));
        }
        let candidate_type = self
            .gateway
            .get_tree(candidate)
            .map_err(persistence_failed)?
            .tree_type;

        self.apply(
            |tree| tree.attach(point, candidate, candidate_type.as_deref()),
            |gateway, tree, _| write_socket(gateway, tree, socket),
        )?;
        debug!(%socket, tree = %candidate, "attached tree");
        self.events.push(SessionEvent::SocketAttached {
            socket,
            point,
            tree: candidate,
        });
        Ok(point)
    }

    /// Empty a socket. Returns the tree that was attached; an empty socket
    /// is left alone without a write.
    #[instrument(level = "debug", skip(self))]
    pub fn detach(&mut self, socket: AbilityId) -> Result<Option<TreeId>, SessionError> {
        let point = self.resolve_socket(socket)?;
        if self
            .tree
            .sockets()
            .socket(socket)
            .is_some_and(AttachmentPoint::is_empty)
        {
            return Ok(None);
        }
        let detached = self.apply(
            |tree| tree.detach(point),
            |gateway, tree, _| write_socket(gateway, tree, socket),
        )?;
        if let Some(tree) = detached {
            debug!(%socket, %tree, "detached tree");
            self.events.push(SessionEvent::SocketDetached {
                socket,
                point,
                tree,
            });
        }
        Ok(detached)
    }

    // -- Tree record --

    /// Change the number of tiers. Refused while an ability sits below the
    /// new last tier.
    #[instrument(level = "debug", skip(self))]
    pub fn set_tier_count(&mut self, tier_count: i64) -> Result<(), SessionError> {
        let tier_count = self.apply(
            |tree| {
                tree.set_tier_count(tier_count)?;
                Ok(tree.tier_count())
            },
            |gateway, tree, &count| gateway.update_tree(tree.id(), &TreePatch::tier_count(count)),
        )?;
        self.events.push(SessionEvent::TierCountChanged { tier_count });
        Ok(())
    }

    pub fn rename_tree(&mut self, name: String) -> Result<(), SessionError> {
        let patch = TreePatch {
            name: Some(name.clone()),
            ..TreePatch::default()
        };
        self.apply(
            |tree| {
                tree.rename(name.clone());
                Ok(())
            },
            |gateway, tree, _| gateway.update_tree(tree.id(), &patch),
        )?;
        self.events.push(SessionEvent::TreeRenamed { name });
        Ok(())
    }

    // -- Internal helpers --

    /// Apply `change` to a copy of the tree, store it with `write`, then
    /// publish the copy. Nothing in `self` changes unless both succeed.
    fn apply<T>(
        &mut self,
        change: impl FnOnce(&mut AbilityTree) -> Result<T, TreeError>,
        write: impl FnOnce(&G, &AbilityTree, &T) -> GatewayResult<()>,
    ) -> Result<T, SessionError> {
        let mut next = self.tree.clone();
        let outcome = change(&mut next).map_err(rejected)?;
        write(&self.gateway, &next, &outcome).map_err(persistence_failed)?;
        self.tree = next;
        Ok(outcome)
    }

    /// Write each affected dependent, then delete the ability itself.
    fn persist_removal(&self, next: &AbilityTree, removal: &Removal) -> Result<(), SessionError> {
        let mut written = Vec::with_capacity(removal.affected.len());
        for &dependent in &removal.affected {
            let update = AbilityUpdate::prerequisites(groups_of(next, dependent));
            if let Err(e) = self.gateway.update_ability(dependent, &update) {
                return Err(self.compensate(&written, e));
            }
            written.push(dependent);
        }
        if let Err(e) = self.gateway.delete_ability(removal.removed.id) {
            return Err(self.compensate(&written, e));
        }
        Ok(())
    }

    /// Restore the stored prerequisites of `written` from the current tree.
    fn compensate(&self, written: &[AbilityId], original: GatewayError) -> SessionError {
        let mut failure = None;
        for &id in written.iter().rev() {
            let update = AbilityUpdate::prerequisites(groups_of(&self.tree, id));
            if let Err(e) = self.gateway.update_ability(id, &update) {
                warn!(ability = %id, error = %e, "failed to restore prerequisites");
                failure.get_or_insert(e);
            }
        }
        match failure {
            None => {
                warn!(error = %original, restored = written.len(), "rolled back partial delete");
                SessionError::Persistence(original)
            }
            Some(rollback) => SessionError::RollbackFailed { original, rollback },
        }
    }

    fn resolve_socket(&self, socket: AbilityId) -> Result<AttachmentPointId, SessionError> {
        if !self.tree.contains(socket) {
            return Err(rejected(AttachmentError::UnknownNode(socket)));
        }
        self.tree.sockets().socket_of(socket).map_err(rejected)
    }

    fn emit_cancelled(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Idle => {}
            Gesture::PendingLink { source, target } => {
                self.events.push(SessionEvent::LinkCancelled { source, target });
            }
            Gesture::PendingAttach { socket } => {
                self.events.push(SessionEvent::AttachCancelled { socket });
            }
        }
    }
}

fn groups_of(tree: &AbilityTree, id: AbilityId) -> Vec<PrerequisiteGroup> {
    tree.graph().groups(id).map(<[_]>::to_vec).unwrap_or_default()
}

fn write_socket<G: PersistenceGateway>(gateway: &G, tree: &AbilityTree, socket: AbilityId) -> GatewayResult<()> {
    let point = tree
        .sockets()
        .socket(socket)
        .ok_or_else(|| GatewayError::ability_not_found(socket))?;
    gateway.update_ability(socket, &AbilityUpdate::attachment(point.clone()))
}

fn rejected(error: impl Into<SessionError>) -> SessionError {
    let error = error.into();
    warn!(%error, "intent rejected");
    error
}

fn persistence_failed(error: GatewayError) -> SessionError {
    warn!(%error, "persistence call failed; in-memory tree unchanged");
    SessionError::Persistence(error)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GatewayOp, MemoryStore};
    use abilitree_core::test_utils::{plain, socket};

    fn grid() -> GridConfig {
        GridConfig::new(180.0, 150.0, 200.0).unwrap()
    }

    fn session(store: &MemoryStore, tier_count: u32) -> TreeSession<MemoryStore> {
        TreeSession::create(
            store.clone(),
            grid(),
            NewTree {
                name: "Mage".to_string(),
                tier_count,
                tree_type: Some("class".to_string()),
            },
        )
        .unwrap()
    }

    fn create(session: &mut TreeSession<MemoryStore>, name: &str, tier: u32) -> AbilityId {
        session.create_ability(plain(name, tier)).unwrap().id
    }

    fn link(session: &mut TreeSession<MemoryStore>, source: AbilityId, target: AbilityId, logic: Logic) {
        session.begin_link(source, target).unwrap();
        session.commit_link(logic).unwrap();
    }

    #[test]
    fn move_node_snaps_and_persists() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let id = create(&mut s, "Blink", 1);
        s.drain_events();

        let cell = s.move_node(id, Position::new(212.0, 365.0)).unwrap();
        assert_eq!(cell.tier, 3);
        assert_eq!(cell.column, 0);
        assert_eq!(cell.snapped, Position::new(200.0, 450.0));

        let stored = store.ability(id).unwrap();
        assert_eq!((stored.tier, stored.x, stored.y), (3, 200.0, 450.0));
        assert_eq!(
            s.drain_events(),
            vec![SessionEvent::NodeMoved {
                ability: id,
                tier: 3,
                column: 0,
                x: 200.0,
                y: 450.0
            }]
        );
    }

    #[test]
    fn move_node_persists_clamped_tier() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let id = create(&mut s, "Blink", 1);

        let cell = s.move_node(id, Position::new(500.0, 2000.0)).unwrap();
        assert_eq!(cell.tier, 3);
        assert_eq!(cell.snapped.y, 450.0);
        assert_eq!(store.ability(id).unwrap().tier, 3);
    }

    #[test]
    fn failed_write_leaves_session_untouched() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let id = create(&mut s, "Blink", 1);
        s.drain_events();

        store.fail_next(GatewayOp::UpdateAbility);
        let err = s.move_node(id, Position::new(212.0, 365.0)).unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert!(!err.is_rejected_intent());
        assert_eq!(s.tree().ability(id).unwrap().tier, 1);
        assert_eq!(store.ability(id).unwrap().tier, 1);
        assert!(s.pending_events().is_empty());

        // Re-issuing the intent succeeds once the store recovers.
        s.move_node(id, Position::new(212.0, 365.0)).unwrap();
        assert_eq!(s.tree().ability(id).unwrap().tier, 3);
    }

    #[test]
    fn link_gesture_commits_with_chosen_logic() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        s.drain_events();

        s.begin_link(a, b).unwrap();
        assert_eq!(s.gesture(), Gesture::PendingLink { source: a, target: b });
        let edge = s.commit_link(Logic::Or).unwrap();
        assert!(s.gesture().is_idle());
        assert_eq!((edge.source, edge.target, edge.logic), (a, b, Logic::Or));

        let stored = store.ability(b).unwrap();
        assert_eq!(stored.prerequisites.len(), 1);
        assert_eq!(stored.prerequisites[0].id, edge.group);

        let events = s.drain_events();
        assert_eq!(events[0], SessionEvent::LinkPending { source: a, target: b });
        assert_eq!(events[1].committed_group(), Some(edge.group));
    }

    #[test]
    fn cancelled_link_never_reaches_persistence() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        store.clear_calls();

        s.begin_link(a, b).unwrap();
        assert!(s.cancel_link());
        assert!(!s.cancel_link());
        assert!(store.calls().is_empty());
        assert!(s.tree().graph().groups(b).unwrap().is_empty());
    }

    #[test]
    fn begin_link_rejects_cycles_eagerly() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        link(&mut s, a, b, Logic::And);

        let err = s.begin_link(b, a).unwrap_err();
        assert!(matches!(err, SessionError::Tree(TreeError::Graph(GraphError::Cycle { .. }))));
        assert!(err.is_rejected_intent());
        assert!(s.gesture().is_idle());

        assert!(matches!(
            s.begin_link(a, a),
            Err(SessionError::Tree(TreeError::Graph(GraphError::SelfReference(_))))
        ));
    }

    #[test]
    fn commit_without_pending_link_is_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        assert_eq!(
            s.commit_link(Logic::And).unwrap_err(),
            SessionError::NoPendingGesture("link")
        );
    }

    #[test]
    fn second_begin_link_supersedes_the_first() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        let c = create(&mut s, "C", 3);
        s.drain_events();

        s.begin_link(a, b).unwrap();
        s.begin_link(a, c).unwrap();
        let edge = s.commit_link(Logic::And).unwrap();
        assert_eq!(edge.target, c);
        assert!(s.drain_events().contains(&SessionEvent::LinkCancelled { source: a, target: b }));
        assert!(s.tree().graph().groups(b).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_to_stored_dependents() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let x = create(&mut s, "X", 1);
        let y = create(&mut s, "Y", 2);
        link(&mut s, x, y, Logic::And);

        let removal = s.delete_ability(x).unwrap();
        assert_eq!(removal.affected, vec![y]);
        assert!(store.ability(x).is_none());
        assert!(store.ability(y).unwrap().prerequisites.is_empty());
        assert!(s.tree().ability(y).unwrap().prerequisites.is_empty());
    }

    #[test]
    fn failed_delete_restores_rewritten_dependents() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let x = create(&mut s, "X", 1);
        let y = create(&mut s, "Y", 2);
        let z = create(&mut s, "Z", 2);
        link(&mut s, x, y, Logic::And);
        link(&mut s, x, z, Logic::Or);
        s.drain_events();

        store.fail_next(GatewayOp::DeleteAbility);
        let err = s.delete_ability(x).unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));

        assert!(s.tree().contains(x));
        assert_eq!(store.ability(y).unwrap().prerequisites.len(), 1);
        assert_eq!(store.ability(z).unwrap().prerequisites.len(), 1);
        assert!(store.ability(x).is_some());
        assert!(s.pending_events().is_empty());
    }

    #[test]
    fn failed_compensation_reports_both_errors() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let x = create(&mut s, "X", 1);
        let y = create(&mut s, "Y", 2);
        let z = create(&mut s, "Z", 2);
        link(&mut s, x, y, Logic::And);
        link(&mut s, x, z, Logic::And);

        // Two dependent writes succeed, the delete fails, then the first
        // restore fails too.
        store.fail_next(GatewayOp::DeleteAbility);
        store.fail_nth(GatewayOp::UpdateAbility, 3);
        let err = s.delete_ability(x).unwrap_err();
        assert!(matches!(err, SessionError::RollbackFailed { .. }));
        assert!(s.tree().contains(x));
    }

    #[test]
    fn selection_skips_edges_of_deleted_nodes() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        let c = create(&mut s, "C", 3);
        link(&mut s, a, b, Logic::And);
        link(&mut s, b, c, Logic::And);

        let ab = EdgeKey { source: a, target: b };
        let bc = EdgeKey { source: b, target: c };
        let outcome = s
            .delete_selection(&Selection {
                nodes: vec![a],
                edges: vec![ab, bc, bc],
                ..Selection::default()
            })
            .unwrap();

        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.skipped, vec![ab]);
        assert_eq!(outcome.unlinked, vec![bc]);
        assert!(s.tree().graph().edges().next().is_none());
    }

    #[test]
    fn selection_with_unknown_node_writes_nothing() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        store.clear_calls();

        let err = s
            .delete_selection(&Selection {
                nodes: vec![a, AbilityId(u64::MAX)],
                ..Selection::default()
            })
            .unwrap_err();
        assert!(err.is_rejected_intent());
        assert!(store.calls().is_empty());
        assert!(s.tree().contains(a));
    }

    #[test]
    fn attach_checks_type_and_self_reference() {
        let store = MemoryStore::new();
        let armor = store
            .create_tree(&NewTree {
                name: "Plate".to_string(),
                tier_count: 2,
                tree_type: Some("armor".to_string()),
            })
            .unwrap();
        let weapon = store
            .create_tree(&NewTree {
                name: "Sword".to_string(),
                tier_count: 2,
                tree_type: Some("weapon".to_string()),
            })
            .unwrap();

        let mut s = session(&store, 3);
        let slot = s.create_ability(socket("Slot", 1, Some("armor"))).unwrap().id;
        let own = s.id();

        assert!(matches!(
            s.attach(slot, weapon),
            Err(SessionError::Tree(TreeError::Attachment(AttachmentError::TypeMismatch { .. })))
        ));
        assert_eq!(s.attach(slot, own).unwrap_err(), SessionError::SelfAttachment(own));

        let point = s.attach(slot, armor).unwrap();
        let stored = store.ability(slot).unwrap();
        assert_eq!(
            stored.kind.attachment_point().and_then(|p| p.attached_tree),
            Some(armor)
        );
        assert_eq!(stored.kind.attachment_point().map(|p| p.id), Some(point));

        assert!(matches!(
            s.attach(slot, armor),
            Err(SessionError::Tree(TreeError::Attachment(AttachmentError::AlreadyAttached { .. })))
        ));
        assert_eq!(s.detach(slot).unwrap(), Some(armor));
        assert_eq!(s.detach(slot).unwrap(), None);
        assert!(store.ability(slot).unwrap().kind.attachment_point().unwrap().is_empty());
    }

    #[test]
    fn occupied_socket_is_refused_before_reading_the_candidate() {
        let store = MemoryStore::new();
        let first = store
            .create_tree(&NewTree {
                name: "Plate".to_string(),
                tier_count: 2,
                tree_type: None,
            })
            .unwrap();
        let mut s = session(&store, 3);
        let slot = s.create_ability(socket("Slot", 1, None)).unwrap().id;
        let point = s.attach(slot, first).unwrap();
        store.clear_calls();

        // The candidate does not even exist; occupancy is reported first.
        let err = s.attach(slot, TreeId(u64::MAX)).unwrap_err();
        assert_eq!(
            err,
            SessionError::Tree(TreeError::Attachment(AttachmentError::AlreadyAttached {
                socket: point,
                tree: first,
            }))
        );
        assert!(err.is_rejected_intent());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn removing_one_group_keeps_its_twin() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        link(&mut s, a, b, Logic::And);
        link(&mut s, a, b, Logic::Or);
        let groups = s.tree().ability(b).unwrap().prerequisites;
        let (first, second) = (groups[0].id, groups[1].id);
        s.drain_events();

        assert!(s.remove_group(b, first).unwrap());
        let stored = store.ability(b).unwrap().prerequisites;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, second);
        assert_eq!(s.tree().ability(b).unwrap().prerequisites, stored);
        assert_eq!(
            s.drain_events(),
            vec![SessionEvent::GroupRemoved { target: b, group: first }]
        );

        store.clear_calls();
        assert!(!s.remove_group(b, first).unwrap());
        assert!(!s.remove_group(AbilityId(u64::MAX), second).unwrap());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn failed_group_removal_keeps_the_group() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        link(&mut s, a, b, Logic::And);
        let group = s.tree().ability(b).unwrap().prerequisites[0].id;
        s.drain_events();

        store.fail_next(GatewayOp::UpdateAbility);
        assert!(matches!(
            s.remove_group(b, group),
            Err(SessionError::Persistence(_))
        ));
        assert_eq!(s.tree().ability(b).unwrap().prerequisites.len(), 1);
        assert_eq!(store.ability(b).unwrap().prerequisites.len(), 1);
        assert!(s.pending_events().is_empty());
    }

    #[test]
    fn selection_removes_groups_by_id() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        let c = create(&mut s, "C", 3);
        link(&mut s, a, b, Logic::And);
        link(&mut s, a, b, Logic::And);
        link(&mut s, b, c, Logic::Or);
        let edges: Vec<PrerequisiteEdge> = s.view().edges;
        let twin = GroupKey::from(edges[0]);
        let on_deleted = GroupKey::from(edges[2]);

        let outcome = s
            .delete_selection(&Selection {
                nodes: vec![c],
                groups: vec![twin, twin, on_deleted],
                ..Selection::default()
            })
            .unwrap();
        assert_eq!(outcome.ungrouped, vec![twin]);
        let left: Vec<GroupKey> = s.view().edges.into_iter().map(GroupKey::from).collect();
        assert_eq!(left, vec![GroupKey::from(edges[1])]);
    }

    #[test]
    fn exhausted_group_ids_refuse_new_links() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        let c = create(&mut s, "C", 2);
        let stored = vec![PrerequisiteGroup {
            id: GroupId(u32::MAX),
            logic: Logic::And,
            members: BTreeSet::from([a]),
        }];
        store
            .update_ability(b, &AbilityUpdate::prerequisites(stored))
            .unwrap();
        let id = s.id();
        drop(s);

        let mut s = TreeSession::open(store.clone(), grid(), id).unwrap();
        s.begin_link(a, c).unwrap();
        store.clear_calls();
        let err = s.commit_link(Logic::And).unwrap_err();
        assert_eq!(
            err,
            SessionError::Tree(TreeError::Graph(GraphError::GroupIdsExhausted))
        );
        assert!(err.is_rejected_intent());
        assert!(store.calls().is_empty());
        assert!(s.tree().ability(c).unwrap().prerequisites.is_empty());
        assert_eq!(s.view().edges.len(), 1);
    }

    #[test]
    fn attach_gesture_round_trip() {
        let store = MemoryStore::new();
        let other = store
            .create_tree(&NewTree {
                name: "Any".to_string(),
                tier_count: 1,
                tree_type: None,
            })
            .unwrap();
        let mut s = session(&store, 2);
        let slot = s.create_ability(socket("Slot", 1, None)).unwrap().id;
        let plain_id = create(&mut s, "Plain", 1);

        assert!(matches!(
            s.begin_attach(plain_id),
            Err(SessionError::Tree(TreeError::Attachment(AttachmentError::NotASocket(_))))
        ));
        assert_eq!(
            s.commit_attach(other).unwrap_err(),
            SessionError::NoPendingGesture("attach")
        );

        s.begin_attach(slot).unwrap();
        assert!(s.cancel_attach());
        s.begin_attach(slot).unwrap();
        s.commit_attach(other).unwrap();
        assert!(s.gesture().is_idle());
        assert_eq!(
            s.tree().sockets().socket(slot).unwrap().attached_tree,
            Some(other)
        );
    }

    #[test]
    fn deleting_a_gesture_endpoint_cancels_the_gesture() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        s.begin_link(a, b).unwrap();
        s.delete_ability(a).unwrap();
        assert!(s.gesture().is_idle());
        assert!(
            s.pending_events()
                .contains(&SessionEvent::LinkCancelled { source: a, target: b })
        );
    }

    #[test]
    fn tier_count_changes_are_guarded() {
        let store = MemoryStore::new();
        let mut s = session(&store, 5);
        let deep = create(&mut s, "Deep", 4);

        assert!(matches!(
            s.set_tier_count(3),
            Err(SessionError::Tree(TreeError::TierCountConflict { ability, .. })) if ability == deep
        ));
        s.move_node(deep, Position::new(0.0, 10.0)).unwrap();
        s.set_tier_count(3).unwrap();
        assert_eq!(store.get_tree(s.id()).unwrap().tier_count, 3);
        assert!(s.set_tier_count(0).unwrap_err().is_rejected_intent());
    }

    #[test]
    fn reopened_session_sees_the_same_tree() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        let a = create(&mut s, "A", 1);
        let b = create(&mut s, "B", 2);
        let slot = s.create_ability(socket("Slot", 3, None)).unwrap().id;
        link(&mut s, a, b, Logic::And);
        link(&mut s, b, slot, Logic::Or);
        s.move_node(b, Position::new(360.0, 200.0)).unwrap();

        let reopened = TreeSession::open(store.clone(), grid(), s.id()).unwrap();
        assert_eq!(reopened.view(), s.view());

        // Group ids keep counting past the loaded ones.
        let mut reopened = reopened;
        reopened.begin_link(a, slot).unwrap();
        let edge = reopened.commit_link(Logic::And).unwrap();
        assert!(s.view().edges.iter().all(|e| e.group < edge.group));
    }

    #[test]
    fn delete_tree_cascades_and_returns_gateway() {
        let store = MemoryStore::new();
        let mut s = session(&store, 3);
        create(&mut s, "A", 1);
        create(&mut s, "B", 1);

        let (gateway, result) = s.delete_tree();
        result.unwrap();
        assert_eq!(gateway.tree_count(), 0);
        assert_eq!(store.ability_count(), 0);
    }
}
