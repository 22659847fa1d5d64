//! Approval saga rollback tests
//!
//! The approval transaction spans a version lock, an external artifact
//! call, a handoff insert and a stage change. These tests verify the
//! all-or-nothing contract: after any mid-saga failure no partial effect
//! is observable, and a subsequent retry can still succeed.

use std::sync::Arc;
use uuid::Uuid;

use dealflow::deal::activity::ActivityKind;
use dealflow::deal::mocks::{FailingArtifactGenerator, FlakyArtifactGenerator};
use dealflow::deal::{
    Actor, ApprovalCoordinator, Deal, DealError, DealStage, DealStateMachine, LineItem, NewDeal,
    Role, VersionPayload,
};
use dealflow::store::MemoryStore;
use dealflow::DealStore;

fn approver() -> Actor {
    Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin)
}

async fn pending_deal(store: &Arc<MemoryStore>) -> Deal {
    let machine = DealStateMachine::new(store.clone());
    let estimator = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Estimator);
    let (deal, _) = store
        .create_deal(NewDeal {
            company_id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            title: "Roof replacement".to_string(),
            initial_payload: VersionPayload {
                currency: "USD".to_string(),
                line_items: vec![LineItem {
                    description: "Membrane".to_string(),
                    quantity: 1,
                    unit_price_cents: 1_200_000,
                }],
                notes: None,
            },
        })
        .await
        .unwrap();
    machine
        .request_transition(deal.id, DealStage::InEstimating, &estimator)
        .await
        .unwrap();
    machine
        .request_transition(deal.id, DealStage::PendingApproval, &estimator)
        .await
        .unwrap();
    store.get_deal(deal.id).await.unwrap()
}

#[tokio::test]
async fn generator_failure_leaves_no_observable_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let coordinator =
        ApprovalCoordinator::new(store.clone(), Arc::new(FailingArtifactGenerator::default()));
    let deal = pending_deal(&store).await;
    let trail_before = store.list_activity(deal.id).await.unwrap();

    let err = coordinator
        .approve_deal(deal.id, deal.active_version_id, &approver())
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::ArtifactFailed(_)));

    // Lock released, stage unchanged, no handoff, no new activities.
    let version = store.get_version(deal.active_version_id).await.unwrap();
    assert!(!version.locked);
    assert!(version.locked_at.is_none());
    assert!(version.locked_by.is_none());
    assert_eq!(
        store.get_deal(deal.id).await.unwrap().stage,
        DealStage::PendingApproval
    );
    assert_eq!(store.handoff_count().await, 0);
    assert_eq!(store.list_activity(deal.id).await.unwrap(), trail_before);
}

#[tokio::test]
async fn retry_after_transient_failure_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(FlakyArtifactGenerator::failing_first(1));
    let coordinator = ApprovalCoordinator::new(store.clone(), generator.clone());
    let deal = pending_deal(&store).await;
    let actor = approver();

    // First attempt hits the transient failure and rolls back.
    let err = coordinator
        .approve_deal(deal.id, deal.active_version_id, &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::ArtifactFailed(_)));
    assert_eq!(
        store.get_deal(deal.id).await.unwrap().stage,
        DealStage::PendingApproval
    );

    // The rollback released the lock, so the retry can take it again.
    let outcome = coordinator
        .approve_deal(deal.id, deal.active_version_id, &actor)
        .await
        .unwrap();
    assert_eq!(outcome.deal.stage, DealStage::Dispatched);
    assert_eq!(generator.calls(), 2);
    assert_eq!(store.handoff_count().await, 1);

    let trail = store.list_activity(deal.id).await.unwrap();
    let kinds: Vec<ActivityKind> = trail.iter().map(|a| a.kind).collect();
    // Only the successful attempt shows up in the audit trail.
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == ActivityKind::Approval)
            .count(),
        1
    );
}

#[tokio::test]
async fn failed_approval_does_not_block_rejection() {
    let store = Arc::new(MemoryStore::new());
    let coordinator =
        ApprovalCoordinator::new(store.clone(), Arc::new(FailingArtifactGenerator::default()));
    let machine = DealStateMachine::new(store.clone());
    let deal = pending_deal(&store).await;
    let actor = approver();

    coordinator
        .approve_deal(deal.id, deal.active_version_id, &actor)
        .await
        .unwrap_err();

    // The deal is still PENDING_APPROVAL and fully operable.
    let rejected = machine
        .reject_deal(deal.id, &actor, "rework the totals")
        .await
        .unwrap();
    assert_eq!(rejected.stage, DealStage::Rejected);
}
