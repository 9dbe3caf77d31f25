//! In-memory [`PersistenceGateway`] for tests, demos and the data importer.
//!
//! Records live in slotmaps; the public ids are the slotmap keys' FFI form,
//! so stale ids of deleted records never resolve to a newer record.
//!
//! The store can be told to fail specific calls, which is how rollback paths
//! are exercised. Clones share the same state, so a test can keep a handle
//! for inspection and failure injection after moving one into a session.

use crate::gateway::{AbilityUpdate, GatewayError, GatewayResult, NewTree, PersistenceGateway, TreePatch};
use abilitree_core::id::{AbilityId, TreeId};
use abilitree_core::tree::{Ability, AbilityDraft, TreeRecord};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

new_key_type! {
    struct TreeKey;
    struct AbilityKey;
}

fn tree_key(id: TreeId) -> TreeKey {
    KeyData::from_ffi(id.0).into()
}

fn ability_key(id: AbilityId) -> AbilityKey {
    KeyData::from_ffi(id.0).into()
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// The gateway operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GatewayOp {
    CreateTree,
    GetTree,
    UpdateTree,
    DeleteTree,
    CreateAbility,
    UpdateAbility,
    DeleteAbility,
    ListAbilities,
}

#[derive(Debug, Clone, Copy)]
enum Injection {
    /// Fail the n-th upcoming call (1-based), then heal.
    Nth(usize),
    Always,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredAbility {
    tree: TreeId,
    record: Ability,
}

#[derive(Debug, Default)]
struct MemoryState {
    trees: SlotMap<TreeKey, TreeRecord>,
    abilities: SlotMap<AbilityKey, StoredAbility>,
    injections: BTreeMap<GatewayOp, Injection>,
    calls: Vec<GatewayOp>,
}

impl MemoryState {
    /// Log a call and decide whether an injected failure fires.
    fn enter(&mut self, op: GatewayOp) -> GatewayResult<()> {
        self.calls.push(op);
        let fire = match self.injections.get(&op).copied() {
            None => false,
            Some(Injection::Always) => true,
            Some(Injection::Nth(n)) if n <= 1 => {
                self.injections.remove(&op);
                true
            }
            Some(Injection::Nth(n)) => {
                self.injections.insert(op, Injection::Nth(n - 1));
                false
            }
        };
        if fire {
            return Err(GatewayError::Backend(format!("injected failure in {op:?}")));
        }
        Ok(())
    }
}

/// Shared, in-process record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: GatewayOp) {
        self.fail_nth(op, 1);
    }

    /// Make the n-th upcoming call of `op` fail (1-based).
    pub fn fail_nth(&self, op: GatewayOp, n: usize) {
        if let Ok(mut state) = self.inner.lock() {
            state.injections.insert(op, Injection::Nth(n.max(1)));
        }
    }

    /// Make every call of `op` fail until [`MemoryStore::heal`].
    pub fn fail_always(&self, op: GatewayOp) {
        if let Ok(mut state) = self.inner.lock() {
            state.injections.insert(op, Injection::Always);
        }
    }

    /// Drop every pending injected failure.
    pub fn heal(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.injections.clear();
        }
    }

    /// Every call made so far, including failed ones.
    pub fn calls(&self) -> Vec<GatewayOp> {
        self.inner
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.calls.clear();
        }
    }

    /// Direct read of one stored ability, bypassing failure injection.
    pub fn ability(&self, id: AbilityId) -> Option<Ability> {
        let state = self.inner.lock().ok()?;
        state
            .abilities
            .get(ability_key(id))
            .map(|stored| stored.record.clone())
    }

    /// Number of stored abilities across all trees.
    pub fn ability_count(&self) -> usize {
        self.inner.lock().map(|s| s.abilities.len()).unwrap_or(0)
    }

    pub fn tree_count(&self) -> usize {
        self.inner.lock().map(|s| s.trees.len()).unwrap_or(0)
    }

    fn state(&self) -> GatewayResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| GatewayError::Backend("memory store mutex poisoned".to_string()))
    }
}

impl PersistenceGateway for MemoryStore {
    fn create_tree(&self, tree: &NewTree) -> GatewayResult<TreeId> {
        let mut state = self.state()?;
        state.enter(GatewayOp::CreateTree)?;
        let key = state.trees.insert_with_key(|key| TreeRecord {
            id: TreeId(key.data().as_ffi()),
            name: tree.name.clone(),
            tier_count: tree.tier_count,
            tree_type: tree.tree_type.clone(),
        });
        Ok(TreeId(key.data().as_ffi()))
    }

    fn get_tree(&self, id: TreeId) -> GatewayResult<TreeRecord> {
        let mut state = self.state()?;
        state.enter(GatewayOp::GetTree)?;
        state
            .trees
            .get(tree_key(id))
            .cloned()
            .ok_or_else(|| GatewayError::tree_not_found(id))
    }

    fn update_tree(&self, id: TreeId, patch: &TreePatch) -> GatewayResult<()> {
        let mut state = self.state()?;
        state.enter(GatewayOp::UpdateTree)?;
        let record = state
            .trees
            .get_mut(tree_key(id))
            .ok_or_else(|| GatewayError::tree_not_found(id))?;
        patch.apply_to(record);
        Ok(())
    }

    fn delete_tree(&self, id: TreeId) -> GatewayResult<()> {
        let mut state = self.state()?;
        state.enter(GatewayOp::DeleteTree)?;
        state
            .trees
            .remove(tree_key(id))
            .ok_or_else(|| GatewayError::tree_not_found(id))?;
        state.abilities.retain(|_, stored| stored.tree != id);
        Ok(())
    }

    fn create_ability(&self, tree: TreeId, draft: &AbilityDraft) -> GatewayResult<AbilityId> {
        let mut state = self.state()?;
        state.enter(GatewayOp::CreateAbility)?;
        if !state.trees.contains_key(tree_key(tree)) {
            return Err(GatewayError::tree_not_found(tree));
        }
        let key = state.abilities.insert_with_key(|key| StoredAbility {
            tree,
            record: Ability {
                id: AbilityId(key.data().as_ffi()),
                name: draft.name.clone(),
                description: draft.description.clone(),
                icon: draft.icon.clone(),
                tier: draft.tier,
                x: draft.x,
                y: draft.y,
                prerequisites: Vec::new(),
                kind: draft.kind.clone(),
            },
        });
        Ok(AbilityId(key.data().as_ffi()))
    }

    fn update_ability(&self, id: AbilityId, update: &AbilityUpdate) -> GatewayResult<()> {
        let mut state = self.state()?;
        state.enter(GatewayOp::UpdateAbility)?;
        let stored = state
            .abilities
            .get_mut(ability_key(id))
            .ok_or_else(|| GatewayError::ability_not_found(id))?;
        update.apply_to(&mut stored.record);
        Ok(())
    }

    fn delete_ability(&self, id: AbilityId) -> GatewayResult<()> {
        let mut state = self.state()?;
        state.enter(GatewayOp::DeleteAbility)?;
        state
            .abilities
            .remove(ability_key(id))
            .map(|_| ())
            .ok_or_else(|| GatewayError::ability_not_found(id))
    }

    fn list_abilities(&self, tree: TreeId) -> GatewayResult<Vec<Ability>> {
        let mut state = self.state()?;
        state.enter(GatewayOp::ListAbilities)?;
        if !state.trees.contains_key(tree_key(tree)) {
            return Err(GatewayError::tree_not_found(tree));
        }
        let mut abilities: Vec<Ability> = state
            .abilities
            .values()
            .filter(|stored| stored.tree == tree)
            .map(|stored| stored.record.clone())
            .collect();
        abilities.sort_by_key(|a| a.id);
        Ok(abilities)
    }
}
