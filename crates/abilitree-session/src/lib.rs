//! Editing sessions over an ability tree.
//!
//! A [`TreeSession`] is the only place that sequences multi-step intents
//! (create, move, link, delete, attach) and talks to persistence through the
//! [`PersistenceGateway`] trait. Every mutation is validated against a copy of
//! the in-memory tree, written through the gateway, and only then made
//! visible; a failed write leaves the session exactly as it was.

pub mod error;
pub mod event;
pub mod gateway;
pub mod interaction;
pub mod memory;
pub mod session;
pub mod view;

pub use error::SessionError;
pub use event::SessionEvent;
pub use gateway::{AbilityUpdate, GatewayError, GatewayResult, NewTree, PersistenceGateway, TreePatch};
pub use interaction::Gesture;
pub use memory::{GatewayOp, MemoryStore};
pub use session::{EdgeKey, GroupKey, Selection, SelectionRemoval, TreeSession};
pub use view::{NodeView, TreeView};
