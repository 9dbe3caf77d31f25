use crate::gateway::GatewayError;
use abilitree_core::attachment::AttachmentError;
use abilitree_core::geometry::ConfigurationError;
use abilitree_core::graph::GraphError;
use abilitree_core::id::TreeId;
use abilitree_core::tree::TreeError;

/// Errors surfaced by a [`crate::TreeSession`].
///
/// Rejected intents leave the tree untouched and never reach persistence.
/// Persistence failures have already been rolled back when they surface,
/// unless the rollback itself failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] GatewayError),

    #[error("rollback failed: original={original}, rollback={rollback}")]
    RollbackFailed {
        original: GatewayError,
        rollback: GatewayError,
    },

    #[error("no pending {0} gesture")]
    NoPendingGesture(&'static str),

    #[error("{0} cannot be attached to one of its own sockets")]
    SelfAttachment(TreeId),
}

impl From<ConfigurationError> for SessionError {
    fn from(error: ConfigurationError) -> Self {
        SessionError::Tree(error.into())
    }
}

impl From<GraphError> for SessionError {
    fn from(error: GraphError) -> Self {
        SessionError::Tree(error.into())
    }
}

impl From<AttachmentError> for SessionError {
    fn from(error: AttachmentError) -> Self {
        SessionError::Tree(error.into())
    }
}

impl SessionError {
    /// Whether the intent was refused before anything was written.
    pub fn is_rejected_intent(&self) -> bool {
        matches!(
            self,
            SessionError::Tree(_) | SessionError::NoPendingGesture(_) | SessionError::SelfAttachment(_)
        )
    }
}
