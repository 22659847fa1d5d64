// Approval transaction coordinator.
//
// `approve_deal` is the one operation in the platform that spans
// heterogeneous effects: a version lock, an external artifact call, a
// handoff insert and a stage change. It runs as a saga: lock first,
// generate before any durable commit, then a single local transaction for
// the rest, with the lock released as compensation whenever a later step
// fails. Callers either see the full outcome or no effect at all.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::deal::activity::ActivityDraft;
use crate::deal::errors::DealError;
use crate::deal::hash::content_hash;
use crate::deal::stage::DealStage;
use crate::deal::traits::{ApprovalCommit, ArtifactGenerator, DealStore, LockOutcome};
use crate::deal::types::{Actor, ApprovalOutcome};

const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApprovalCoordinator<S: DealStore, G: ArtifactGenerator> {
    store: Arc<S>,
    generator: Arc<G>,
    artifact_timeout: Duration,
}

impl<S: DealStore, G: ArtifactGenerator> ApprovalCoordinator<S, G> {
    pub fn new(store: Arc<S>, generator: Arc<G>) -> Self {
        Self {
            store,
            generator,
            artifact_timeout: DEFAULT_ARTIFACT_TIMEOUT,
        }
    }

    /// Cap on a single artifact generation call; an overrun fails the
    /// approval and rolls the version lock back.
    pub fn with_artifact_timeout(mut self, timeout: Duration) -> Self {
        self.artifact_timeout = timeout;
        self
    }

    /// Approve a deal's pending version and hand it off to dispatch.
    ///
    /// All five effects (version lock, artifact, handoff, stage change,
    /// audit entries) happen together or not at all. A retry after a
    /// committed approval returns the original outcome instead of erroring.
    pub async fn approve_deal(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor: &Actor,
    ) -> Result<ApprovalOutcome, DealError> {
        let span = info_span!(
            "approve_deal",
            deal_id = %deal_id,
            version_id = %version_id,
            actor = %actor.user_id,
        );
        self.approve_deal_inner(deal_id, version_id, actor)
            .instrument(span)
            .await
    }

    async fn approve_deal_inner(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor: &Actor,
    ) -> Result<ApprovalOutcome, DealError> {
        // Step 1: authorization. Approve is role-gated only, so it is
        // checked before anything is loaded; a USER gets Unauthorized even
        // for a deal that does not exist.
        if !actor.role.is_approver() {
            return Err(DealError::Unauthorized {
                deal_id,
                role: actor.role,
                action: "approve",
            });
        }

        // Step 2: load and pre-mutation validation. Failures here need no
        // rollback, nothing has been touched yet.
        let deal = self.store.get_deal(deal_id).await?;
        let version = self.store.get_version(version_id).await?;
        if version.deal_id != deal_id {
            return Err(DealError::VersionNotFound(version_id));
        }
        if deal.stage != DealStage::PendingApproval {
            // A committed approval has already moved this deal on. If this
            // very version carries the committed handoff, the call is a
            // retry and gets the original outcome back; anything else is a
            // genuine transition error. On a locked row `try_lock_version`
            // mutates nothing and only reports the holder's handoff.
            if version.locked {
                if let LockOutcome::AlreadyLocked {
                    existing_handoff: Some(handoff),
                } = self
                    .store
                    .try_lock_version(deal_id, version_id, actor.user_id)
                    .await?
                {
                    info!(handoff_id = %handoff.id, "approval already committed, returning prior outcome");
                    let artifact = handoff.artifact.clone();
                    return Ok(ApprovalOutcome {
                        deal,
                        handoff,
                        artifact,
                    });
                }
            }
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to: DealStage::Approved,
            });
        }

        // Both edges of the collapsed commit still answer to the table.
        if !DealStage::PendingApproval.can_transition_to(DealStage::Approved)
            || !DealStage::Approved.can_transition_to(DealStage::Dispatched)
        {
            return Err(DealError::Unexpected(
                "approval edges missing from transition table".to_string(),
            ));
        }

        // Step 3: CAS lock on the version. First writer wins; the loser of
        // a race sees AlreadyLocked with no committed handoff.
        let locked = match self
            .store
            .try_lock_version(deal_id, version_id, actor.user_id)
            .await?
        {
            LockOutcome::Acquired(version) => version,
            LockOutcome::AlreadyLocked {
                existing_handoff: Some(handoff),
            } => {
                // A prior call already committed this approval: return the
                // original result so client retries are harmless.
                info!(handoff_id = %handoff.id, "approval already committed, returning prior outcome");
                let deal = self.store.get_deal(deal_id).await?;
                let artifact = handoff.artifact.clone();
                return Ok(ApprovalOutcome {
                    deal,
                    handoff,
                    artifact,
                });
            }
            LockOutcome::AlreadyLocked {
                existing_handoff: None,
            } => {
                return Err(DealError::VersionLocked { version_id });
            }
        };

        // Step 4: generate before committing anything durable. The artifact
        // is keyed by the payload's content hash, so a failed attempt leaves
        // nothing that a retry cannot reuse.
        let hash = match content_hash(&locked.payload) {
            Ok(hash) => hash,
            Err(err) => return Err(self.rollback(version_id, err).await),
        };
        let generated = match tokio::time::timeout(
            self.artifact_timeout,
            self.generator.generate(&locked.payload, &hash),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DealError::ArtifactFailed(format!(
                "generation timed out after {:?}",
                self.artifact_timeout
            ))),
        };
        let artifact = match generated {
            Ok(artifact) => artifact,
            Err(err) => return Err(self.rollback(version_id, err).await),
        };

        // Steps 5-7: handoff, stage change and audit entries in one local
        // transaction. The commit also persists the lock taken in step 3.
        let handoff_id = Uuid::new_v4();
        let commit = ApprovalCommit {
            deal_id,
            version_id,
            handoff_id,
            actor: *actor,
            artifact: artifact.clone(),
            activities: vec![
                ActivityDraft::approval(actor, version_id, &artifact),
                ActivityDraft::handoff_created(actor, handoff_id, version_id),
            ],
        };
        let (deal, handoff) = match self.store.commit_approval(commit).await {
            Ok(committed) => committed,
            Err(err) => {
                // Fail closed: anything that goes wrong after the lock is
                // treated as requiring full rollback.
                let err = if err.requires_rollback() {
                    err
                } else {
                    DealError::Unexpected(err.to_string())
                };
                return Err(self.rollback(version_id, err).await);
            }
        };

        info!(
            handoff_id = %handoff.id,
            content_hash = %artifact.content_hash,
            stage = %deal.stage,
            "approval committed"
        );
        Ok(ApprovalOutcome {
            deal,
            handoff,
            artifact,
        })
    }

    /// Compensation for a failure after lock acquisition: release the lock
    /// and surface the original cause. The deal stage was never written, so
    /// there is nothing else to undo.
    async fn rollback(&self, version_id: Uuid, cause: DealError) -> DealError {
        warn!(version_id = %version_id, %cause, "rolling back approval");
        if let Err(release_err) = self.store.release_version_lock(version_id).await {
            // The lock row is now stuck; surface loudly but keep the
            // original failure as the caller-visible error.
            error!(version_id = %version_id, %release_err, "failed to release version lock");
        }
        cause
    }
}
