//! Abilitree Core -- the domain model behind ability tree editing.
//!
//! An ability tree is a directed prerequisite graph of unlockable abilities
//! laid out on a discrete tier/column grid. Some abilities are sockets that
//! hold a reference to an entire other tree. This crate owns the three
//! pieces of logic that must stay consistent under incremental edits:
//!
//! 1. **Geometry** -- pure quantization of drag positions onto the grid.
//! 2. **Prerequisite graph** -- AND/OR prerequisite groups kept acyclic,
//!    with cascading deletion.
//! 3. **Attachment** -- sockets, type tags and attach/detach.
//!
//! # Key Types
//!
//! - [`geometry::GridConfig`] -- validated grid parameters and snapping.
//! - [`graph::PrerequisiteGraph`] -- node set plus per-node prerequisite groups.
//! - [`attachment::AttachmentRegistry`] -- socket metadata keyed by owner.
//! - [`tree::AbilityTree`] -- the aggregate tying the above to a tier count.
//!
//! Nothing here performs I/O. Sequencing edits against persistence is the
//! job of the session layer built on top of this crate.

pub mod attachment;
pub mod geometry;
pub mod graph;
pub mod id;
pub mod tree;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
