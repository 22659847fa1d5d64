// Collaborator seams: trait interfaces so the engine can run against the
// in-memory store in tests and the SQLite store in deployment.

use async_trait::async_trait;
use uuid::Uuid;

use crate::deal::activity::{ActivityDraft, DealActivity};
use crate::deal::errors::DealError;
use crate::deal::stage::DealStage;
use crate::deal::types::{
    Actor, ArtifactRef, Deal, DealVersion, DispatchHandoff, NewDeal, VersionPayload,
};

/// A stage write plus its audit entry, applied as one transaction.
///
/// `expected_from` makes the commit a compare-and-set: if another actor moved
/// the deal first, the store rejects the commit instead of losing the update.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub deal_id: Uuid,
    pub expected_from: DealStage,
    pub to: DealStage,
    pub activity: ActivityDraft,
}

/// The durable tail of a successful approval, committed as one transaction:
/// handoff insert, stage write to DISPATCHED, and the audit entries. The
/// version lock must already be held by this approval call.
#[derive(Debug, Clone)]
pub struct ApprovalCommit {
    pub deal_id: Uuid,
    pub version_id: Uuid,
    /// Pre-assigned by the coordinator so the audit entries can reference
    /// the handoff they describe.
    pub handoff_id: Uuid,
    pub actor: Actor,
    pub artifact: ArtifactRef,
    pub activities: Vec<ActivityDraft>,
}

/// Result of attempting to acquire the version lock.
#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// This call won the lock; the returned snapshot has `locked = true`.
    Acquired(DealVersion),
    /// Someone got there first. `existing_handoff` is populated when the
    /// prior approval committed; the caller can return that original
    /// outcome to tolerate client retries. `None` means an in-flight or
    /// failed-but-unreleased racer: a genuine conflict.
    AlreadyLocked {
        existing_handoff: Option<DispatchHandoff>,
    },
}

/// Transactional persistence for deals, versions, handoffs and activities.
///
/// Implementations must guarantee:
/// - `try_lock_version` is first-writer-wins: of two concurrent calls for
///   the same unlocked version, exactly one observes `Acquired`;
/// - `commit_transition` / `commit_approval` apply all their writes or none;
/// - activity `seq` is assigned inside the committing transaction and is
///   strictly increasing per deal.
#[async_trait]
pub trait DealStore: Send + Sync {
    async fn create_deal(&self, new: NewDeal) -> Result<(Deal, DealVersion), DealError>;

    async fn get_deal(&self, deal_id: Uuid) -> Result<Deal, DealError>;

    async fn get_version(&self, version_id: Uuid) -> Result<DealVersion, DealError>;

    /// Next monotonic version for the deal; becomes the active version.
    async fn create_version(
        &self,
        deal_id: Uuid,
        payload: VersionPayload,
    ) -> Result<DealVersion, DealError>;

    /// Replace an unlocked version's payload. `VersionLocked` once frozen.
    async fn update_version_payload(
        &self,
        version_id: Uuid,
        payload: VersionPayload,
        activity: ActivityDraft,
    ) -> Result<DealVersion, DealError>;

    /// Apply a stage change and its activity atomically.
    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Deal, DealError>;

    /// Compare-and-set the version's lock flag.
    async fn try_lock_version(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor_id: Uuid,
    ) -> Result<LockOutcome, DealError>;

    /// Compensation: release a lock taken by an approval that failed before
    /// its durable commit.
    async fn release_version_lock(&self, version_id: Uuid) -> Result<(), DealError>;

    /// Durable tail of the approval saga: handoff + stage + activities.
    async fn commit_approval(
        &self,
        commit: ApprovalCommit,
    ) -> Result<(Deal, DispatchHandoff), DealError>;

    /// Append a standalone activity (notes and the like), seq-assigned.
    async fn append_activity(
        &self,
        deal_id: Uuid,
        draft: ActivityDraft,
    ) -> Result<DealActivity, DealError>;

    /// Seq-ordered audit trail for a deal.
    async fn list_activity(&self, deal_id: Uuid) -> Result<Vec<DealActivity>, DealError>;
}

/// External artifact generator. Potentially slow and fallible; the
/// coordinator always calls it before any durable commit.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Produce the immutable approval artifact for a locked payload, keyed
    /// by its content hash. Must be deterministic for identical content.
    async fn generate(
        &self,
        payload: &VersionPayload,
        content_hash: &str,
    ) -> Result<ArtifactRef, DealError>;
}
