// Deal state machine: orchestrates single stage transitions and the
// estimating-side mutations that accompany them.
//
// Every path here is: load, gate, table, then one atomic store commit that
// writes the stage change together with its audit entry. Nothing mutates a
// deal outside those commits.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::deal::activity::ActivityDraft;
use crate::deal::errors::DealError;
use crate::deal::gate::{can_perform, DealAction};
use crate::deal::stage::DealStage;
use crate::deal::traits::{DealStore, TransitionCommit};
use crate::deal::types::{Actor, Deal, DealVersion, VersionPayload};

pub struct DealStateMachine<S: DealStore> {
    store: Arc<S>,
}

impl<S: DealStore> DealStateMachine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Request a single stage transition for a deal.
    ///
    /// Validation order is fixed: existence, then capability, then edge
    /// legality. Rejections happen before any mutation, so they need no
    /// rollback. On success the stage write and its StageTransition activity
    /// land in one store transaction.
    pub async fn request_transition(
        &self,
        deal_id: Uuid,
        to: DealStage,
        actor: &Actor,
    ) -> Result<Deal, DealError> {
        let deal = self.store.get_deal(deal_id).await?;

        if !can_perform(actor.role, DealAction::Transition { to }, deal.stage) {
            warn!(
                deal_id = %deal_id,
                role = ?actor.role,
                to = %to,
                "transition denied by role gate"
            );
            return Err(DealError::Unauthorized {
                deal_id,
                role: actor.role,
                action: "transition",
            });
        }

        if !deal.stage.can_transition_to(to) {
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to,
            });
        }

        // Entering APPROVED (and APPROVED -> DISPATCHED) belongs exclusively
        // to the approval transaction; those edges are tabled but cannot be
        // requested individually.
        if to == DealStage::Approved || deal.stage == DealStage::Approved {
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to,
            });
        }

        let updated = self
            .store
            .commit_transition(TransitionCommit {
                deal_id,
                expected_from: deal.stage,
                to,
                activity: ActivityDraft::stage_transition(actor, deal.stage, to),
            })
            .await?;

        info!(
            deal_id = %deal_id,
            from = %deal.stage,
            to = %to,
            actor = %actor.user_id,
            "stage transition applied"
        );
        Ok(updated)
    }

    /// Decline a pending approval: PENDING_APPROVAL -> REJECTED with a
    /// Rejection activity carrying the reason. Approval roles only.
    pub async fn reject_deal(
        &self,
        deal_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> Result<Deal, DealError> {
        let deal = self.store.get_deal(deal_id).await?;

        if !can_perform(actor.role, DealAction::Approve, deal.stage) {
            return Err(DealError::Unauthorized {
                deal_id,
                role: actor.role,
                action: "reject",
            });
        }

        if !deal.stage.can_transition_to(DealStage::Rejected) {
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to: DealStage::Rejected,
            });
        }

        let updated = self
            .store
            .commit_transition(TransitionCommit {
                deal_id,
                expected_from: deal.stage,
                to: DealStage::Rejected,
                activity: ActivityDraft::rejection(actor, reason),
            })
            .await?;

        info!(deal_id = %deal_id, actor = %actor.user_id, reason, "deal rejected");
        Ok(updated)
    }

    /// Replace the pricing payload of an unlocked version while estimating.
    pub async fn update_pricing(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor: &Actor,
        payload: VersionPayload,
    ) -> Result<DealVersion, DealError> {
        let deal = self.store.get_deal(deal_id).await?;
        let version = self.store.get_version(version_id).await?;
        if version.deal_id != deal_id {
            return Err(DealError::VersionNotFound(version_id));
        }

        // A locked version is immutable for everyone; report that before
        // the capability check so callers see VersionLocked, not
        // Unauthorized, once the payload is frozen.
        if version.locked {
            return Err(DealError::VersionLocked { version_id });
        }

        if !can_perform(actor.role, DealAction::EditPricing, deal.stage) {
            return Err(DealError::Unauthorized {
                deal_id,
                role: actor.role,
                action: "edit pricing",
            });
        }

        let total = payload.total_cents();
        let updated = self
            .store
            .update_version_payload(
                version_id,
                payload,
                ActivityDraft::pricing_updated(actor, version_id, total),
            )
            .await?;

        info!(
            deal_id = %deal_id,
            version = updated.number,
            total_cents = total,
            "pricing updated"
        );
        Ok(updated)
    }

    /// Cut a fresh unlocked version for rework (after REJECTED looped the
    /// deal back into IN_ESTIMATING). Becomes the active version.
    pub async fn create_revision(
        &self,
        deal_id: Uuid,
        actor: &Actor,
        payload: VersionPayload,
    ) -> Result<DealVersion, DealError> {
        let deal = self.store.get_deal(deal_id).await?;

        if !can_perform(actor.role, DealAction::EditPricing, deal.stage) {
            return Err(DealError::Unauthorized {
                deal_id,
                role: actor.role,
                action: "create revision",
            });
        }

        let version = self.store.create_version(deal_id, payload).await?;
        info!(deal_id = %deal_id, version = version.number, "revision created");
        Ok(version)
    }

    /// Attach a free-form note to the deal's audit trail.
    pub async fn add_note(
        &self,
        deal_id: Uuid,
        actor: &Actor,
        text: &str,
    ) -> Result<(), DealError> {
        // Existence check keeps notes off dangling ids.
        self.store.get_deal(deal_id).await?;
        self.store
            .append_activity(deal_id, ActivityDraft::note(actor, text))
            .await?;
        Ok(())
    }
}
