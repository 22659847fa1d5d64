// Typed failure taxonomy for the lifecycle engine.

use thiserror::Error;
use uuid::Uuid;

use crate::deal::gate::Role;
use crate::deal::stage::DealStage;

#[derive(Debug, Error)]
pub enum DealError {
    #[error("deal {0} not found")]
    DealNotFound(Uuid),

    #[error("deal version {0} not found")]
    VersionNotFound(Uuid),

    #[error("role {role:?} is not permitted to {action} deal {deal_id}")]
    Unauthorized {
        deal_id: Uuid,
        role: Role,
        action: &'static str,
    },

    #[error("illegal stage transition {from} -> {to}")]
    InvalidStateTransition { from: DealStage, to: DealStage },

    #[error("version {version_id} is already locked by a concurrent approval")]
    VersionLocked { version_id: Uuid },

    #[error("artifact generation failed: {0}")]
    ArtifactFailed(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl DealError {
    /// Whether this error class occurs mid-transaction and mandates rollback.
    ///
    /// NotFound / Unauthorized / InvalidStateTransition are detected before
    /// any mutation; the rest can strike after the version lock is taken.
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            DealError::VersionLocked { .. }
                | DealError::ArtifactFailed(_)
                | DealError::Storage(_)
                | DealError::Unexpected(_)
        )
    }
}
