// Append-only audit trail.
//
// Activities are never updated or deleted. Ordering within a deal is by a
// monotonic `seq` the store assigns inside the same transaction as the
// mutation it records, so wall-clock skew cannot reorder a deal's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::deal::stage::DealStage;
use crate::deal::types::{Actor, ArtifactRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    StageTransition,
    Approval,
    Rejection,
    Note,
    HandoffCreated,
    PricingUpdated,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::StageTransition => "stage_transition",
            ActivityKind::Approval => "approval",
            ActivityKind::Rejection => "rejection",
            ActivityKind::Note => "note",
            ActivityKind::HandoffCreated => "handoff_created",
            ActivityKind::PricingUpdated => "pricing_updated",
        }
    }

    pub fn parse(s: &str) -> Option<ActivityKind> {
        match s {
            "stage_transition" => Some(ActivityKind::StageTransition),
            "approval" => Some(ActivityKind::Approval),
            "rejection" => Some(ActivityKind::Rejection),
            "note" => Some(ActivityKind::Note),
            "handoff_created" => Some(ActivityKind::HandoffCreated),
            "pricing_updated" => Some(ActivityKind::PricingUpdated),
            _ => None,
        }
    }
}

/// One immutable audit entry tied to a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealActivity {
    pub id: Uuid,
    pub deal_id: Uuid,
    /// Monotonic per deal, assigned by the store at commit.
    pub seq: u64,
    pub kind: ActivityKind,
    pub actor_id: Uuid,
    /// Set for stage-changing activities, None otherwise.
    pub from_stage: Option<DealStage>,
    pub to_stage: Option<DealStage>,
    pub recorded_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// An activity waiting for the store to assign id, seq and timestamp.
///
/// Drafts are only built through the constructors below so every component
/// records the same shape of entry for the same kind of event.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub kind: ActivityKind,
    pub actor_id: Uuid,
    pub from_stage: Option<DealStage>,
    pub to_stage: Option<DealStage>,
    pub metadata: serde_json::Value,
}

impl ActivityDraft {
    pub fn stage_transition(actor: &Actor, from: DealStage, to: DealStage) -> Self {
        Self {
            kind: ActivityKind::StageTransition,
            actor_id: actor.user_id,
            from_stage: Some(from),
            to_stage: Some(to),
            metadata: json!({ "role": actor.role }),
        }
    }

    /// Approval entry summarizing the collapsed
    /// PENDING_APPROVAL -> APPROVED -> DISPATCHED commit.
    pub fn approval(actor: &Actor, version_id: Uuid, artifact: &ArtifactRef) -> Self {
        Self {
            kind: ActivityKind::Approval,
            actor_id: actor.user_id,
            from_stage: Some(DealStage::PendingApproval),
            to_stage: Some(DealStage::Dispatched),
            metadata: json!({
                "version_id": version_id,
                "content_hash": artifact.content_hash,
                "role": actor.role,
            }),
        }
    }

    pub fn rejection(actor: &Actor, reason: &str) -> Self {
        Self {
            kind: ActivityKind::Rejection,
            actor_id: actor.user_id,
            from_stage: Some(DealStage::PendingApproval),
            to_stage: Some(DealStage::Rejected),
            metadata: json!({ "reason": reason }),
        }
    }

    pub fn note(actor: &Actor, text: &str) -> Self {
        Self {
            kind: ActivityKind::Note,
            actor_id: actor.user_id,
            from_stage: None,
            to_stage: None,
            metadata: json!({ "text": text }),
        }
    }

    pub fn handoff_created(actor: &Actor, handoff_id: Uuid, version_id: Uuid) -> Self {
        Self {
            kind: ActivityKind::HandoffCreated,
            actor_id: actor.user_id,
            from_stage: None,
            to_stage: None,
            metadata: json!({ "handoff_id": handoff_id, "version_id": version_id }),
        }
    }

    pub fn pricing_updated(actor: &Actor, version_id: Uuid, total_cents: i64) -> Self {
        Self {
            kind: ActivityKind::PricingUpdated,
            actor_id: actor.user_id,
            from_stage: None,
            to_stage: None,
            metadata: json!({ "version_id": version_id, "total_cents": total_cents }),
        }
    }
}
