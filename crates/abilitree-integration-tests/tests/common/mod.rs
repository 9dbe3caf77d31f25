//! Shared setup for the scenario tests.

#![allow(dead_code)]

use abilitree_core::geometry::GridConfig;
use abilitree_session::{MemoryStore, NewTree, TreeSession};
use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TEST_SETUP: Once = Once::new();

/// Install a stderr subscriber once per test binary. `RUST_LOG` overrides
/// the default `warn` filter.
pub fn init_test_logging() {
    TEST_SETUP.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(env_filter),
        );
        if tracing::dispatcher::has_been_set() {
            debug!("tracing subscriber already set");
        } else if let Err(e) = subscriber.try_init() {
            eprintln!("failed to set up test logging: {e}");
        }
    });
}

/// The grid used throughout the editor scenarios.
pub fn editor_grid() -> GridConfig {
    GridConfig::new(180.0, 150.0, 200.0).unwrap()
}

pub fn new_tree(name: &str, tier_count: u32, tree_type: Option<&str>) -> NewTree {
    NewTree {
        name: name.to_string(),
        tier_count,
        tree_type: tree_type.map(str::to_string),
    }
}

/// A fresh store and an empty session on it.
pub fn session(tier_count: u32) -> (MemoryStore, TreeSession<MemoryStore>) {
    init_test_logging();
    let store = MemoryStore::new();
    let session =
        TreeSession::create(store.clone(), editor_grid(), new_tree("Mage", tier_count, None))
            .unwrap();
    (store, session)
}
