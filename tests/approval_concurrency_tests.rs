//! Approval concurrency and idempotency tests
//!
//! Two guarantees under contention:
//! - the version lock is first-writer-wins: of N racing approvals exactly
//!   one commits, and exactly one DispatchHandoff ever exists
//! - a retry arriving after the winner committed gets the original outcome
//!   back rather than an error or a duplicate handoff

use std::sync::Arc;
use uuid::Uuid;

use dealflow::deal::mocks::RecordingArtifactGenerator;
use dealflow::deal::{
    Actor, ApprovalCoordinator, Deal, DealError, DealStage, DealStateMachine, NewDeal, Role,
    VersionPayload,
};
use dealflow::store::MemoryStore;
use dealflow::DealStore;

async fn pending_deal(store: &Arc<MemoryStore>) -> Deal {
    let machine = DealStateMachine::new(store.clone());
    let estimator = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Estimator);
    let (deal, _) = store
        .create_deal(NewDeal {
            company_id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            title: "HVAC retrofit".to_string(),
            initial_payload: VersionPayload::default(),
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
async fn racing_approvals_commit_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(RecordingArtifactGenerator::new());
    let coordinator = Arc::new(ApprovalCoordinator::new(store.clone(), generator.clone()));
    let deal = pending_deal(&store).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        let deal_id = deal.id;
        let version_id = deal.active_version_id;
        tasks.push(tokio::spawn(async move {
            let actor = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin);
            coordinator.approve_deal(deal_id, version_id, &actor).await
        }));
    }

    let mut handoff_ids = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.deal.stage, DealStage::Dispatched);
                handoff_ids.push(outcome.handoff.id);
            }
            Err(DealError::VersionLocked { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error under contention: {other}"),
        }
    }

    // Losers either conflicted mid-flight or observed the committed result;
    // every successful response names the same single handoff.
    assert!(!handoff_ids.is_empty());
    handoff_ids.dedup();
    assert_eq!(handoff_ids.len(), 1);
    assert_eq!(store.handoff_count().await, 1);
    assert!(conflicts <= 7);

    // Generation ran exactly once: retries reuse the committed artifact.
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn sequential_retry_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(RecordingArtifactGenerator::new());
    let coordinator = ApprovalCoordinator::new(store.clone(), generator.clone());
    let deal = pending_deal(&store).await;
    let actor = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Owner);

    let first = coordinator
        .approve_deal(deal.id, deal.active_version_id, &actor)
        .await
        .unwrap();

    // Same caller retries; a different approver retries too. Both get the
    // committed outcome and nothing is duplicated.
    for retry_actor in [actor, Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Estimator)] {
        let retried = coordinator
            .approve_deal(deal.id, deal.active_version_id, &retry_actor)
            .await
            .unwrap();
        assert_eq!(retried.handoff.id, first.handoff.id);
        assert_eq!(retried.artifact, first.artifact);
        assert_eq!(retried.deal.stage, DealStage::Dispatched);
    }

    assert_eq!(store.handoff_count().await, 1);
    assert_eq!(generator.calls(), 1);

    // A USER retrying is still refused: authorization precedes idempotency.
    let denied = coordinator
        .approve_deal(
            deal.id,
            deal.active_version_id,
            &Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::User),
        )
        .await
        .unwrap_err();
    assert!(matches!(denied, DealError::Unauthorized { .. }));
}

#[tokio::test]
async fn transition_races_do_not_lose_updates() {
    let store = Arc::new(MemoryStore::new());
    let machine = Arc::new(DealStateMachine::new(store.clone()));
    let (deal, _) = store
        .create_deal(NewDeal {
            company_id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            title: "Racing transitions".to_string(),
            initial_payload: VersionPayload::default(),
        })
        .await
        .unwrap();

    // Two actors race DRAFT -> IN_ESTIMATING and DRAFT -> CANCELLED.
    let to_estimating = {
        let machine = machine.clone();
        let deal_id = deal.id;
        tokio::spawn(async move {
            let actor = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Estimator);
            machine
                .request_transition(deal_id, DealStage::InEstimating, &actor)
                .await
        })
    };
    let to_cancelled = {
        let machine = machine.clone();
        let deal_id = deal.id;
        tokio::spawn(async move {
            let actor = Actor::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin);
            machine
                .request_transition(deal_id, DealStage::Cancelled, &actor)
                .await
        })
    };

    let results = [to_estimating.await.unwrap(), to_cancelled.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();

    // At most one stage change per snapshot: the loser re-reads or errors
    // with InvalidStateTransition, never silently overwrites.
    let final_stage = store.get_deal(deal.id).await.unwrap().stage;
    let transitions = store
        .list_activity(deal.id)
        .await
        .unwrap()
        .len();
    assert_eq!(transitions, successes);
    match final_stage {
        DealStage::Cancelled => {
            // CANCELLED is terminal, so estimating either lost or never ran.
            assert!(successes >= 1);
        }
        DealStage::InEstimating => assert_eq!(successes, 1),
        other => panic!("unexpected final stage {other}"),
    }
}
