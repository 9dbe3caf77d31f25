//! Read-only projection handed to the renderer.

use abilitree_core::geometry::GridConfig;
use abilitree_core::graph::PrerequisiteEdge;
use abilitree_core::id::AbilityId;
use abilitree_core::tree::{Ability, AbilityTree, TreeRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub ability: Ability,
    /// Column derived from the committed `x`.
    pub column: i32,
}

/// Nodes in id order, edges in target then group order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeView {
    pub tree: TreeRecord,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<PrerequisiteEdge>,
}

impl TreeView {
    pub fn project(tree: &AbilityTree, grid: &GridConfig) -> Self {
        let nodes = tree
            .abilities()
            .into_iter()
            .map(|ability| NodeView {
                column: grid.column_of(ability.x),
                ability,
            })
            .collect();
        Self {
            tree: tree.record().clone(),
            nodes,
            edges: tree.graph().edges().collect(),
        }
    }

    pub fn node(&self, id: AbilityId) -> Option<&NodeView> {
        self.nodes
            .binary_search_by_key(&id, |n| n.ability.id)
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Edges whose target is `id`.
    pub fn edges_into(&self, id: AbilityId) -> impl Iterator<Item = &PrerequisiteEdge> {
        self.edges.iter().filter(move |e| e.target == id)
    }
}
