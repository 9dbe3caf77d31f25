//! Walk through a short editing session against the in-memory store.
//!
//! Run with `RUST_LOG=abilitree_session=debug` to see the intent spans.

use abilitree_core::geometry::{GridConfig, Position};
use abilitree_core::graph::Logic;
use abilitree_core::id::TreeId;
use abilitree_core::tree::NewAbility;
use abilitree_session::{MemoryStore, NewTree, PersistenceGateway, SessionError, TreeSession};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<(), SessionError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();

    let store = MemoryStore::new();
    let armor = store_tree(&store, "Plate", Some("armor"))?;

    let grid = GridConfig::new(180.0, 150.0, 200.0)?;
    let mut session = TreeSession::create(
        store.clone(),
        grid,
        NewTree {
            name: "Paladin".to_string(),
            tier_count: 3,
            tree_type: Some("class".to_string()),
        },
    )?;

    let smite = session.create_ability(NewAbility {
        name: "Smite".to_string(),
        tier: 1,
        ..NewAbility::default()
    })?;
    let aura = session.create_ability(NewAbility {
        name: "Aura".to_string(),
        tier: 1,
        ..NewAbility::default()
    })?;
    let slot = session.create_socket(
        NewAbility {
            name: "Armor Slot".to_string(),
            tier: 2,
            ..NewAbility::default()
        },
        Some("armor".to_string()),
    )?;

    session.move_node(aura.id, Position::new(212.0, 365.0))?;
    session.begin_link(smite.id, aura.id)?;
    session.commit_link(Logic::And)?;
    session.attach(slot.id, armor)?;

    // A cycle is refused before any prompt would open.
    if let Err(e) = session.begin_link(aura.id, smite.id) {
        println!("rejected: {e}");
    }

    session.delete_ability(smite.id)?;

    for event in session.drain_events() {
        println!("{event:?}");
    }
    let view = session.view();
    println!(
        "{} nodes, {} edges in '{}'",
        view.nodes.len(),
        view.edges.len(),
        view.tree.name
    );
    Ok(())
}

fn store_tree(store: &MemoryStore, name: &str, tree_type: Option<&str>) -> Result<TreeId, SessionError> {
    Ok(store.create_tree(&NewTree {
        name: name.to_string(),
        tier_count: 1,
        tree_type: tree_type.map(str::to_string),
    })?)
}
