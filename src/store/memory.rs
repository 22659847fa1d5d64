// In-memory store. One mutex guards the whole world, so every trait method
// is a serializable transaction: multi-row commits are applied under a
// single critical section and either fully land or (on validation failure)
// leave nothing behind. Default store for tests and the CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::deal::activity::{ActivityDraft, DealActivity};
use crate::deal::errors::DealError;
use crate::deal::stage::DealStage;
use crate::deal::traits::{ApprovalCommit, DealStore, LockOutcome, TransitionCommit};
use crate::deal::types::{Deal, DealVersion, DispatchHandoff, NewDeal, VersionPayload};

#[derive(Default)]
struct World {
    deals: HashMap<Uuid, Deal>,
    versions: HashMap<Uuid, DealVersion>,
    /// Per-deal activity log, ordered by seq.
    activities: HashMap<Uuid, Vec<DealActivity>>,
    /// Keyed by version id - at most one handoff per locked version.
    handoffs: HashMap<Uuid, DispatchHandoff>,
    /// Last assigned activity seq per deal.
    seqs: HashMap<Uuid, u64>,
}

impl World {
    fn next_seq(&mut self, deal_id: Uuid) -> u64 {
        let seq = self.seqs.entry(deal_id).or_insert(0);
        *seq += 1;
        *seq
    }

    fn append(&mut self, deal_id: Uuid, draft: ActivityDraft) -> DealActivity {
        let seq = self.next_seq(deal_id);
        let activity = DealActivity {
            id: Uuid::new_v4(),
            deal_id,
            seq,
            kind: draft.kind,
            actor_id: draft.actor_id,
            from_stage: draft.from_stage,
            to_stage: draft.to_stage,
            recorded_at: Utc::now(),
            metadata: draft.metadata,
        };
        self.activities
            .entry(deal_id)
            .or_default()
            .push(activity.clone());
        activity
    }
}

#[derive(Default)]
pub struct MemoryStore {
    world: Mutex<World>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total handoffs across all deals. Test visibility helper.
    pub async fn handoff_count(&self) -> usize {
        self.world.lock().await.handoffs.len()
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn create_deal(&self, new: NewDeal) -> Result<(Deal, DealVersion), DealError> {
        let mut world = self.world.lock().await;
        let now = Utc::now();
        let version = DealVersion {
            id: Uuid::new_v4(),
            deal_id: Uuid::nil(), // patched below once the deal id exists
            number: 1,
            payload: new.initial_payload,
            locked: false,
            locked_at: None,
            locked_by: None,
            created_at: now,
        };
        let deal = Deal {
            id: Uuid::new_v4(),
            company_id: new.company_id,
            contact_id: new.contact_id,
            title: new.title,
            stage: DealStage::Draft,
            active_version_id: version.id,
            created_at: now,
            updated_at: now,
        };
        let version = DealVersion {
            deal_id: deal.id,
            ..version
        };
        world.deals.insert(deal.id, deal.clone());
        world.versions.insert(version.id, version.clone());
        Ok((deal, version))
    }

    async fn get_deal(&self, deal_id: Uuid) -> Result<Deal, DealError> {
        let world = self.world.lock().await;
        world
            .deals
            .get(&deal_id)
            .cloned()
            .ok_or(DealError::DealNotFound(deal_id))
    }

    async fn get_version(&self, version_id: Uuid) -> Result<DealVersion, DealError> {
        let world = self.world.lock().await;
        world
            .versions
            .get(&version_id)
            .cloned()
            .ok_or(DealError::VersionNotFound(version_id))
    }

    async fn create_version(
        &self,
        deal_id: Uuid,
        payload: VersionPayload,
    ) -> Result<DealVersion, DealError> {
        let mut world = self.world.lock().await;
        if !world.deals.contains_key(&deal_id) {
            return Err(DealError::DealNotFound(deal_id));
        }
        let number = world
            .versions
            .values()
            .filter(|v| v.deal_id == deal_id)
            .map(|v| v.number)
            .max()
            .unwrap_or(0)
            + 1;
        let version = DealVersion {
            id: Uuid::new_v4(),
            deal_id,
            number,
            payload,
            locked: false,
            locked_at: None,
            locked_by: None,
            created_at: Utc::now(),
        };
        world.versions.insert(version.id, version.clone());
        let deal = world
            .deals
            .get_mut(&deal_id)
            .ok_or(DealError::DealNotFound(deal_id))?;
        deal.active_version_id = version.id;
        deal.updated_at = Utc::now();
        Ok(version)
    }

    async fn update_version_payload(
        &self,
        version_id: Uuid,
        payload: VersionPayload,
        activity: ActivityDraft,
    ) -> Result<DealVersion, DealError> {
        let mut world = self.world.lock().await;
        let version = world
            .versions
            .get_mut(&version_id)
            .ok_or(DealError::VersionNotFound(version_id))?;
        if version.locked {
            return Err(DealError::VersionLocked { version_id });
        }
        version.payload = payload;
        let updated = version.clone();
        world.append(updated.deal_id, activity);
        Ok(updated)
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Deal, DealError> {
        let mut world = self.world.lock().await;
        let deal = world
            .deals
            .get_mut(&commit.deal_id)
            .ok_or(DealError::DealNotFound(commit.deal_id))?;
        // Compare-and-set: a racer that moved the stage first invalidates
        // this commit instead of being silently overwritten.
        if deal.stage != commit.expected_from {
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to: commit.to,
            });
        }
        deal.stage = commit.to;
        deal.updated_at = Utc::now();
        let updated = deal.clone();
        world.append(commit.deal_id, commit.activity);
        Ok(updated)
    }

    async fn try_lock_version(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor_id: Uuid,
    ) -> Result<LockOutcome, DealError> {
        let mut world = self.world.lock().await;
        let existing_handoff = world.handoffs.get(&version_id).cloned();
        let version = world
            .versions
            .get_mut(&version_id)
            .ok_or(DealError::VersionNotFound(version_id))?;
        if version.deal_id != deal_id {
            return Err(DealError::VersionNotFound(version_id));
        }
        if version.locked {
            return Ok(LockOutcome::AlreadyLocked { existing_handoff });
        }
        version.locked = true;
        version.locked_at = Some(Utc::now());
        version.locked_by = Some(actor_id);
        Ok(LockOutcome::Acquired(version.clone()))
    }

    async fn release_version_lock(&self, version_id: Uuid) -> Result<(), DealError> {
        let mut world = self.world.lock().await;
        let version = world
            .versions
            .get_mut(&version_id)
            .ok_or(DealError::VersionNotFound(version_id))?;
        version.locked = false;
        version.locked_at = None;
        version.locked_by = None;
        Ok(())
    }

    async fn commit_approval(
        &self,
        commit: ApprovalCommit,
    ) -> Result<(Deal, DispatchHandoff), DealError> {
        let mut world = self.world.lock().await;

        // Cross-entity invariants checked under the same critical section
        // that applies the writes.
        let version = world
            .versions
            .get(&commit.version_id)
            .ok_or(DealError::VersionNotFound(commit.version_id))?;
        if !version.locked {
            return Err(DealError::Unexpected(
                "approval commit without a held version lock".to_string(),
            ));
        }
        let deal = world
            .deals
            .get(&commit.deal_id)
            .ok_or(DealError::DealNotFound(commit.deal_id))?;
        if deal.stage != DealStage::PendingApproval {
            return Err(DealError::Unexpected(format!(
                "approval commit found stage {} instead of PENDING_APPROVAL",
                deal.stage
            )));
        }

        let handoff = DispatchHandoff {
            id: commit.handoff_id,
            deal_id: commit.deal_id,
            version_id: commit.version_id,
            artifact: commit.artifact,
            created_at: Utc::now(),
        };
        world.handoffs.insert(commit.version_id, handoff.clone());

        let deal = world
            .deals
            .get_mut(&commit.deal_id)
            .ok_or(DealError::DealNotFound(commit.deal_id))?;
        // PENDING_APPROVAL -> APPROVED -> DISPATCHED collapsed into one
        // write; APPROVED is never observable through this store.
        deal.stage = DealStage::Dispatched;
        deal.updated_at = Utc::now();
        let updated = deal.clone();

        for draft in commit.activities {
            world.append(commit.deal_id, draft);
        }
        Ok((updated, handoff))
    }

    async fn append_activity(
        &self,
        deal_id: Uuid,
        draft: ActivityDraft,
    ) -> Result<DealActivity, DealError> {
        let mut world = self.world.lock().await;
        if !world.deals.contains_key(&deal_id) {
            return Err(DealError::DealNotFound(deal_id));
        }
        Ok(world.append(deal_id, draft))
    }

    async fn list_activity(&self, deal_id: Uuid) -> Result<Vec<DealActivity>, DealError> {
        let world = self.world.lock().await;
        Ok(world.activities.get(&deal_id).cloned().unwrap_or_default())
    }
}
