//! Property-based tests for the ability tree core.
//!
//! Uses proptest to generate grid parameters and random edit sequences,
//! then verifies that snapping is stable and the prerequisite graph keeps
//! its structural invariants.

use abilitree_core::geometry::{GridConfig, Position, cell_origin, snap_to_cell};
use abilitree_core::graph::{Logic, PrerequisiteGraph};
use abilitree_core::id::AbilityId;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

// ===========================================================================
// Generators
// ===========================================================================

/// Edit operations applied to a graph, indices resolved modulo the live set.
#[derive(Debug, Clone)]
enum EditOp {
    AddNode,
    RemoveNode(usize),
    Link(usize, usize, bool),
    Unlink(usize, usize),
}

fn arb_edit_sequence(max_ops: usize) -> impl Strategy<Value = Vec<EditOp>> {
    proptest::collection::vec(
        prop_oneof![
            2 => Just(EditOp::AddNode),
            1 => (0..64usize).prop_map(EditOp::RemoveNode),
            4 => (0..64usize, 0..64usize, any::<bool>())
                .prop_map(|(a, b, or)| EditOp::Link(a, b, or)),
            1 => (0..64usize, 0..64usize).prop_map(|(a, b)| EditOp::Unlink(a, b)),
        ],
        1..=max_ops,
    )
}

fn apply(ops: &[EditOp]) -> PrerequisiteGraph {
    let mut graph = PrerequisiteGraph::new();
    let mut live: Vec<AbilityId> = Vec::new();
    let mut next = 1u64;

    for op in ops {
        match *op {
            EditOp::AddNode => {
                let id = AbilityId(next);
                next += 1;
                graph.add_node(id).unwrap();
                live.push(id);
            }
            EditOp::RemoveNode(i) if !live.is_empty() => {
                let id = live.remove(i % live.len());
                graph.remove_node(id).unwrap();
            }
            EditOp::Link(t, s, or) if !live.is_empty() => {
                let target = live[t % live.len()];
                let source = live[s % live.len()];
                let logic = if or { Logic::Or } else { Logic::And };
                // Rejections are expected; the graph must stay valid either way.
                let _ = graph.add_prerequisite_link(target, source, logic);
            }
            EditOp::Unlink(t, s) if !live.is_empty() => {
                let target = live[t % live.len()];
                let source = live[s % live.len()];
                graph.remove_link(target, source);
            }
            _ => {}
        }
    }
    graph
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Round-trip: the canonical placement of any cell snaps back to that cell.
    #[test]
    fn canonical_placement_round_trips(
        tier in 1u32..=40,
        column in -200i32..=200,
        tier_height in 1.0f64..500.0,
        column_width in 1.0f64..500.0,
        origin_x in -1000.0f64..1000.0,
    ) {
        let grid = GridConfig::new(tier_height, column_width, origin_x).unwrap();
        let p = grid.placement(tier, column);
        let cell = grid.snap(p).unwrap();
        prop_assert_eq!((cell.tier, cell.column), (tier, column));
        prop_assert_eq!(cell_origin(tier, tier_height).unwrap(), p.y);
    }

    /// Snapping is idempotent: snapping a snapped position changes nothing.
    #[test]
    fn snapping_is_idempotent(
        x in -5000.0f64..5000.0,
        y in -5000.0f64..5000.0,
        tier_height in 10.0f64..400.0,
        column_width in 10.0f64..400.0,
    ) {
        let first = snap_to_cell(Position::new(x, y), tier_height, column_width, 0.0).unwrap();
        let second = snap_to_cell(first.snapped, tier_height, column_width, 0.0).unwrap();
        prop_assert_eq!(first, second);
        prop_assert!(first.tier >= 1);
    }

    /// Any edit sequence leaves an acyclic graph with no empty or dangling groups.
    #[test]
    fn edits_preserve_graph_invariants(ops in arb_edit_sequence(120)) {
        let graph = apply(&ops);
        let nodes: BTreeSet<AbilityId> = graph.nodes().collect();

        for id in &nodes {
            for group in graph.groups(*id).unwrap() {
                prop_assert!(!group.members.is_empty(), "empty group on {}", id);
                for member in &group.members {
                    prop_assert!(nodes.contains(member), "dangling member {} on {}", member, id);
                    prop_assert_ne!(member, id);
                }
            }
        }

        // Every node appears in the unlock order, after all of its members.
        let order = graph.unlock_order();
        prop_assert_eq!(order.len(), nodes.len());
        let position: HashMap<AbilityId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for edge in graph.edges() {
            prop_assert!(position[&edge.source] < position[&edge.target]);
        }
    }

    /// Removing a node never leaves it referenced anywhere.
    #[test]
    fn removal_is_complete(ops in arb_edit_sequence(80), pick in 0..64usize) {
        let mut graph = apply(&ops);
        let nodes: Vec<AbilityId> = graph.nodes().collect();
        prop_assume!(!nodes.is_empty());
        let victim = nodes[pick % nodes.len()];

        let affected = graph.remove_node(victim).unwrap();
        prop_assert!(graph.dependents(victim).is_empty());
        for id in affected {
            prop_assert!(graph.contains(id));
        }
        for edge in graph.edges() {
            prop_assert_ne!(edge.source, victim);
            prop_assert_ne!(edge.target, victim);
        }
    }
}
