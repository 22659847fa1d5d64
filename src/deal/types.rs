// Core entity types for the deal lifecycle engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deal::gate::Role;
use crate::deal::stage::DealStage;

/// The acting principal, supplied by the identity provider.
///
/// The engine trusts this context and never re-derives it; there is no
/// ambient "current session"; every operation takes an explicit actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, company_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            company_id,
            role,
        }
    }
}

/// The single estimating object. There is no separate "Estimate" entity;
/// pricing lives in versions hanging off the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub company_id: Uuid,
    /// Anchor contact. Non-optional: a deal without a contact cannot exist,
    /// so the type system enforces the invariant rather than a runtime check.
    pub contact_id: Uuid,
    pub title: String,
    pub stage: DealStage,
    /// The version currently driving the workflow step.
    pub active_version_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single priced line on a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// The pricing payload of a version. Mutated freely while the version is
/// unlocked, frozen forever once locked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionPayload {
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub notes: Option<String>,
}

impl VersionPayload {
    pub fn total_cents(&self) -> i64 {
        self.line_items.iter().map(LineItem::total_cents).sum()
    }
}

/// A pricing snapshot belonging to exactly one deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealVersion {
    pub id: Uuid,
    pub deal_id: Uuid,
    /// Monotonic per deal, starting at 1.
    pub number: u32,
    pub payload: VersionPayload,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Reference to a generated approval artifact.
///
/// `content_hash` is deterministic over the locked payload, so regeneration
/// for identical content lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub content_hash: String,
    pub uri: String,
}

/// Created exactly once per successful approval; links the locked version
/// to downstream fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchHandoff {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub version_id: Uuid,
    pub artifact: ArtifactRef,
    pub created_at: DateTime<Utc>,
}

/// Inputs for creating a deal at intake.
#[derive(Debug, Clone)]
pub struct NewDeal {
    pub company_id: Uuid,
    pub contact_id: Uuid,
    pub title: String,
    pub initial_payload: VersionPayload,
}

/// Result of a committed approval.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub deal: Deal,
    pub handoff: DispatchHandoff,
    pub artifact: ArtifactRef,
}
