//! Room lifecycle integration tests.
//!
//! Drives the coordinator end to end: capacity under concurrency, the
//! waiting-room round trip, passwords, leave/delete, expiry and hydration
//! from the store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;

use common::types::unix_now;
use rc_test_utils::{
    coordinator_with_store, memory_coordinator, FaultyRoomStore, StoreOperation, TestConnection,
    TestRoom, TestUser,
};
use room_controller::actors::JoinResult;
use room_controller::coordinator::RoomCoordinator;
use room_controller::errors::RcError;
use room_controller::protocol::CloseCode;
use room_controller::store::{MemoryRoomStore, ParticipantRecord, RequestStatus, RoomStore};

async fn create(coordinator: &RoomCoordinator, creator: &TestUser, room: TestRoom) -> String {
    coordinator
        .create_room(&creator.identity(), room.spec())
        .await
        .unwrap()
        .room_id
}

async fn join(coordinator: &RoomCoordinator, room_id: &str, user: &TestUser) -> JoinResult {
    coordinator
        .join_room(room_id, &user.identity(), None, None)
        .await
        .unwrap()
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_concurrent_joins_never_overshoot_capacity() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let room_id = create(
        &coordinator,
        &creator,
        TestRoom::new("Race").open().with_max_participants(2),
    )
    .await;

    let mut joins = Vec::new();
    for i in 0..16 {
        let coordinator = coordinator.clone();
        let room_id = room_id.clone();
        joins.push(tokio::spawn(async move {
            let user = TestUser::new(format!("user-{i}"));
            coordinator
                .join_room(&room_id, &user.identity(), None, None)
                .await
                .unwrap()
        }));
    }

    let mut admitted = 0;
    let mut full = 0;
    for join in joins {
        match join.await.unwrap() {
            JoinResult::Admitted(_) => admitted += 1,
            JoinResult::Rejected(_) => full += 1,
            other => unreachable!("unexpected join outcome {other:?}"),
        }
    }

    // The creator holds the first slot
    assert_eq!(admitted, 1);
    assert_eq!(full, 15);
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.participants.len(), 2);
}

#[tokio::test]
async fn test_concurrent_joins_queue_with_waiting_room() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let room_id = create(
        &coordinator,
        &creator,
        TestRoom::new("Lobby").with_max_participants(2),
    )
    .await;

    let mut joins = Vec::new();
    for i in 0..8 {
        let coordinator = coordinator.clone();
        let room_id = room_id.clone();
        joins.push(tokio::spawn(async move {
            let user = TestUser::new(format!("user-{i}"));
            coordinator
                .join_room(&room_id, &user.identity(), None, None)
                .await
                .unwrap()
        }));
    }
    for join in joins {
        assert!(matches!(join.await.unwrap(), JoinResult::Queued(_)));
    }

    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.participants.len(), 1);
    assert_eq!(state.pending_requests.len(), 8);
}

#[tokio::test]
async fn test_rejoin_is_idempotent() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(&coordinator, &creator, TestRoom::new("Standup").open()).await;

    assert!(matches!(join(&coordinator, &room_id, &bob).await, JoinResult::Admitted(_)));
    for _ in 0..2 {
        assert!(matches!(
            join(&coordinator, &room_id, &bob).await,
            JoinResult::AlreadyMember(_)
        ));
    }

    let ids: Vec<String> = coordinator
        .room_state(&room_id)
        .await
        .unwrap()
        .participants
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec!["creator".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn test_missing_room_is_reported_before_name_validation() {
    let coordinator = memory_coordinator();
    let long_name = "x".repeat(500);

    let err = coordinator
        .join_room("nosuchroom", &TestUser::new("bob").identity(), Some(&long_name), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::NotFound(_)));

    let alice = TestUser::new("alice");
    let room_id = create(&coordinator, &alice, TestRoom::new("Open").open()).await;
    let err = coordinator
        .join_room(&room_id, &TestUser::new("bob").identity(), Some(&long_name), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::InvalidInput(_)));
}

// ============================================================================
// Waiting room
// ============================================================================

#[tokio::test]
async fn test_creator_bypasses_waiting_room() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let room_id = create(&coordinator, &creator, TestRoom::new("Mine")).await;

    let result = join(&coordinator, &room_id, &creator).await;
    assert!(result.is_member());
    assert_eq!(result.participant().unwrap().id, "creator");
    assert!(result.participant().unwrap().is_creator);

    let state = coordinator.room_state(&room_id).await.unwrap();
    assert!(state.pending_requests.is_empty());
}

#[tokio::test]
async fn test_waiting_room_round_trip() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let carol = TestUser::new("carol");
    let room_id = create(&coordinator, &creator, TestRoom::new("Lobby")).await;

    assert!(matches!(join(&coordinator, &room_id, &bob).await, JoinResult::Queued(_)));
    assert!(matches!(join(&coordinator, &room_id, &carol).await, JoinResult::Queued(_)));

    let pending = coordinator
        .pending_requests(&room_id, &creator.identity())
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let approved = coordinator
        .approve(&room_id, &creator.identity(), "bob")
        .await
        .unwrap();
    assert_eq!(approved.id, "bob");
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.participants.len(), 2);
    assert_eq!(state.pending_requests.len(), 1);

    coordinator
        .reject(&room_id, &creator.identity(), "carol")
        .await
        .unwrap();
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.participants.len(), 2);
    assert!(state.pending_requests.is_empty());
    assert_eq!(
        coordinator.request_status(&room_id, "carol").await.unwrap(),
        RequestStatus::Rejected
    );
    assert_eq!(
        coordinator.request_status(&room_id, "bob").await.unwrap(),
        RequestStatus::Approved
    );
}

#[tokio::test]
async fn test_only_creator_decides_requests() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(&coordinator, &creator, TestRoom::new("Lobby")).await;
    join(&coordinator, &room_id, &bob).await;

    for result in [
        coordinator
            .approve(&room_id, &bob.identity(), "bob")
            .await
            .map(|_| ()),
        coordinator.reject(&room_id, &bob.identity(), "bob").await,
        coordinator
            .pending_requests(&room_id, &bob.identity())
            .await
            .map(|_| ()),
    ] {
        assert!(matches!(result, Err(RcError::Forbidden(_))));
    }

    let err = coordinator
        .approve(&room_id, &creator.identity(), "nobody")
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::NotFound(_)));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_full_room_rejects_second_user() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(
        &coordinator,
        &creator,
        TestRoom::new("R").open().with_max_participants(1),
    )
    .await;

    assert!(join(&coordinator, &room_id, &creator).await.is_member());

    let JoinResult::Rejected(rejection) = join(&coordinator, &room_id, &bob).await else {
        unreachable!("second user must be rejected");
    };
    let err = rejection.into_error();
    assert!(matches!(err, RcError::Conflict(_)));
    assert_eq!(err.status_code().as_u16(), 409);
}

#[tokio::test]
async fn test_scenario_password_protected_room() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(
        &coordinator,
        &creator,
        TestRoom::new("Secret").open().with_password("secret"),
    )
    .await;

    let err = coordinator
        .join_room(&room_id, &bob.identity(), None, Some("guess".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::Unauthorized(_)));

    let result = coordinator
        .join_room(&room_id, &bob.identity(), None, Some("secret".to_string()))
        .await
        .unwrap();
    assert!(matches!(result, JoinResult::Admitted(_)));
}

#[tokio::test]
async fn test_scenario_approval_announces_new_member() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(
        &coordinator,
        &creator,
        TestRoom::new("Lobby").with_max_participants(2),
    )
    .await;

    let mut creator_conn = TestConnection::new("creator");
    coordinator
        .connect(&room_id, creator_conn.handle())
        .await
        .unwrap();
    creator_conn.expect_event("participants_update").await;

    assert!(matches!(join(&coordinator, &room_id, &bob).await, JoinResult::Queued(_)));
    let request = creator_conn.expect_event("join_request").await;
    assert_eq!(request["user"]["id"], "bob");

    let mut bob_conn = TestConnection::new("bob");
    coordinator.connect(&room_id, bob_conn.handle()).await.unwrap();
    bob_conn.expect_no_frame().await;

    coordinator
        .approve(&room_id, &creator.identity(), "bob")
        .await
        .unwrap();

    creator_conn.expect_event("join_approved").await;
    let joined = creator_conn.expect_event("user_joined").await;
    assert_eq!(joined["user"]["id"], "bob");

    bob_conn.expect_event("join_approved").await;
    let snapshot = bob_conn.expect_event("participants_update").await;
    assert_eq!(snapshot["participants"].as_array().unwrap().len(), 2);
    let joined = bob_conn.expect_event("user_joined").await;
    assert_eq!(joined["user"]["id"], "bob");

    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.participants.len(), 2);
    assert!(state.pending_requests.is_empty());
    assert_eq!(state.active_connections, 2);
}

// ============================================================================
// Leave, delete, expiry
// ============================================================================

#[tokio::test]
async fn test_creator_leaving_keeps_room() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let room_id = create(&coordinator, &creator, TestRoom::new("Solo")).await;

    coordinator.leave(&room_id, "creator").await.unwrap();
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert!(state.participants.is_empty());
    assert!(!state.room.is_active);

    let err = coordinator.leave(&room_id, "creator").await.unwrap_err();
    assert!(matches!(err, RcError::NotAMember));
}

#[tokio::test]
async fn test_delete_room_tears_down_connections() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let bob = TestUser::new("bob");
    let room_id = create(&coordinator, &creator, TestRoom::new("Doomed").open()).await;
    join(&coordinator, &room_id, &bob).await;

    let mut bob_conn = TestConnection::new("bob");
    coordinator.connect(&room_id, bob_conn.handle()).await.unwrap();
    bob_conn.drain();

    let err = coordinator
        .delete_room(&room_id, &bob.identity())
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::Forbidden(_)));

    coordinator
        .delete_room(&room_id, &creator.identity())
        .await
        .unwrap();
    let deleted = bob_conn.expect_event("room_deleted").await;
    assert_eq!(deleted["roomId"], room_id.as_str());
    bob_conn.expect_close(CloseCode::RoomDeleted).await;

    assert!(matches!(
        coordinator.room_state(&room_id).await.unwrap_err(),
        RcError::NotFound(_)
    ));
    assert!(coordinator.list_rooms().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expiry_spares_rooms_with_live_members() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let idle = create(&coordinator, &creator, TestRoom::new("Idle")).await;
    let busy = create(&coordinator, &creator, TestRoom::new("Busy")).await;

    let mut conn = TestConnection::new("creator");
    coordinator.connect(&busy, conn.handle()).await.unwrap();
    conn.drain();

    let ttl = i64::try_from(coordinator.policy().inactivity_ttl.as_secs()).unwrap();
    let expired = coordinator.expire_rooms(unix_now() + ttl + 60).await.unwrap();
    assert_eq!(expired, vec![idle.clone()]);

    assert!(coordinator.room_state(&idle).await.is_err());
    assert!(coordinator.room_state(&busy).await.is_ok());
    conn.expect_no_frame().await;
}

// ============================================================================
// Store interaction
// ============================================================================

#[tokio::test]
async fn test_room_hydrates_from_store() {
    let store = Arc::new(MemoryRoomStore::new());
    let creator = TestUser::new("creator");
    let room = TestRoom::new("Persisted").open().record("abcd1234", &creator);
    store
        .put_room(&room, std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    store
        .put_participant(
            "abcd1234",
            &ParticipantRecord {
                id: "creator".to_string(),
                name: "creator".to_string(),
                is_creator: true,
                is_muted: false,
                is_speaking: false,
                joined_at: unix_now(),
            },
        )
        .await
        .unwrap();

    let coordinator = coordinator_with_store(store);
    let listed = coordinator.list_rooms().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].participants_count, 1);

    let bob = TestUser::new("bob");
    assert!(matches!(
        join(&coordinator, "abcd1234", &bob).await,
        JoinResult::Admitted(_)
    ));
    let mine = coordinator.rooms_for_user("bob").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].room.id, "abcd1234");
}

#[tokio::test]
async fn test_store_failures() {
    let store = Arc::new(FaultyRoomStore::in_memory());
    let coordinator = coordinator_with_store(store.clone());
    let creator = TestUser::new("creator");

    // Write-behind failures never fail the room operation
    store.fail(StoreOperation::PutParticipant);
    let room_id = create(&coordinator, &creator, TestRoom::new("Flaky").open()).await;
    let bob = TestUser::new("bob");
    assert!(matches!(join(&coordinator, &room_id, &bob).await, JoinResult::Admitted(_)));

    // Synchronous store reads surface as Store errors
    store.fail(StoreOperation::GetRoom);
    let err = coordinator
        .create_room(&creator.identity(), TestRoom::new("Another").spec())
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::Store(_)));
    assert_eq!(err.client_message(), "An internal error occurred");

    store.heal();
    assert!(coordinator
        .create_room(&creator.identity(), TestRoom::new("Another").spec())
        .await
        .is_ok());
    assert!(store.calls(StoreOperation::GetRoom) >= 2);
}
