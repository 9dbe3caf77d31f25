//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::graph::Logic;
use crate::id::{AbilityId, TreeId};
use crate::tree::{AbilityTree, NewAbility, TreeRecord};

// ===========================================================================
// Trees
// ===========================================================================

pub fn tree_record(tier_count: u32) -> TreeRecord {
    TreeRecord {
        id: TreeId(1),
        name: "Test Tree".to_string(),
        tier_count,
        tree_type: None,
    }
}

pub fn empty_tree(tier_count: u32) -> AbilityTree {
    AbilityTree::new(tree_record(tier_count)).expect("valid test tree")
}

// ===========================================================================
// Abilities
// ===========================================================================

pub fn plain(name: &str, tier: u32) -> NewAbility {
    NewAbility {
        name: name.to_string(),
        tier,
        ..NewAbility::default()
    }
}

pub fn socket(name: &str, tier: u32, allowed_type: Option<&str>) -> NewAbility {
    NewAbility {
        name: name.to_string(),
        tier,
        socket: Some(allowed_type.map(str::to_string)),
        ..NewAbility::default()
    }
}

/// Draft and insert an ability under a fixed id.
pub fn insert(tree: &mut AbilityTree, id: AbilityId, new: NewAbility) -> AbilityId {
    let draft = tree.draft_ability(new).unwrap();
    tree.insert_ability(id, draft).unwrap();
    id
}

/// A linear chain `1 <- 2 <- ... <- n` where each ability requires the previous.
pub fn chain_tree(n: u64) -> AbilityTree {
    let mut tree = empty_tree(1);
    for i in 1..=n {
        insert(&mut tree, AbilityId(i), plain(&format!("A{i}"), 1));
        if i > 1 {
            tree.add_prerequisite_link(AbilityId(i), AbilityId(i - 1), Logic::And)
                .unwrap();
        }
    }
    tree
}
