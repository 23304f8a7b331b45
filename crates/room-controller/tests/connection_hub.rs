//! Connection hub behavior observed through the coordinator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rc_test_utils::{memory_coordinator, TestConnection, TestRoom, TestUser};
use room_controller::actors::Lane;
use room_controller::coordinator::RoomCoordinator;
use room_controller::errors::RcError;
use room_controller::protocol::CloseCode;

async fn open_room_with(coordinator: &RoomCoordinator, members: &[&str]) -> String {
    let creator = TestUser::new("creator");
    let room_id = coordinator
        .create_room(&creator.identity(), TestRoom::new("Hub").open().spec())
        .await
        .unwrap()
        .room_id;
    for member in members {
        coordinator
            .join_room(&room_id, &TestUser::new(*member).identity(), None, None)
            .await
            .unwrap();
    }
    room_id
}

#[tokio::test]
async fn test_member_connect_gets_snapshot_and_announces() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &["bob"]).await;

    let mut creator = TestConnection::new("creator");
    let (_, outcome) = coordinator.connect(&room_id, creator.handle()).await.unwrap();
    assert_eq!(outcome.lane, Lane::Member);
    assert!(outcome.superseded.is_none());
    let snapshot = creator.expect_event("participants_update").await;
    assert_eq!(snapshot["participants"].as_array().unwrap().len(), 2);

    let mut bob = TestConnection::new("bob");
    coordinator.connect(&room_id, bob.handle()).await.unwrap();
    bob.expect_event("participants_update").await;
    let joined = creator.expect_event("user_joined").await;
    assert_eq!(joined["user"]["id"], "bob");
    bob.expect_no_frame().await;
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &["bob"]).await;

    let mut creator = TestConnection::new("creator");
    coordinator.connect(&room_id, creator.handle()).await.unwrap();
    creator.drain();

    let old = TestConnection::new("bob");
    coordinator.connect(&room_id, old.handle()).await.unwrap();
    let mut new = TestConnection::new("bob");
    let (_, outcome) = coordinator.connect(&room_id, new.handle()).await.unwrap();

    let superseded = outcome.superseded.expect("previous connection returned");
    assert!(superseded.same_connection(&old.handle()));
    superseded.close(CloseCode::Superseded);
    assert!(old.is_closed());

    new.expect_event("participants_update").await;
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.active_connections, 2);
}

#[tokio::test]
async fn test_stale_disconnect_is_ignored() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &["bob"]).await;

    let mut creator = TestConnection::new("creator");
    coordinator.connect(&room_id, creator.handle()).await.unwrap();

    let old = TestConnection::new("bob");
    coordinator.connect(&room_id, old.handle()).await.unwrap();
    let new = TestConnection::new("bob");
    let (room, _) = coordinator.connect(&room_id, new.handle()).await.unwrap();
    creator.drain();

    // The replaced connection's relay unregisters after the fact
    let announced = room
        .disconnect("bob".to_string(), old.handle().connection_id().to_string())
        .await
        .unwrap();
    assert!(!announced);
    creator.expect_no_frame().await;
    assert_eq!(coordinator.room_state(&room_id).await.unwrap().active_connections, 2);

    let announced = room
        .disconnect("bob".to_string(), new.handle().connection_id().to_string())
        .await
        .unwrap();
    assert!(announced);
    let left = creator.expect_event("user_left").await;
    assert_eq!(left["participantId"], "bob");

    // Disconnect drops the connection, not the membership
    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.active_connections, 1);
    assert_eq!(state.participants.len(), 2);
}

#[tokio::test]
async fn test_broadcast_reaches_only_current_connection() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &["bob", "carol"]).await;

    let mut old = TestConnection::new("bob");
    coordinator.connect(&room_id, old.handle()).await.unwrap();
    let mut new = TestConnection::new("bob");
    coordinator.connect(&room_id, new.handle()).await.unwrap();
    old.drain();
    new.drain();

    let mut carol = TestConnection::new("carol");
    coordinator.connect(&room_id, carol.handle()).await.unwrap();

    let joined = new.expect_event("user_joined").await;
    assert_eq!(joined["user"]["id"], "carol");
    old.expect_no_frame().await;
}

#[tokio::test]
async fn test_non_member_is_refused() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &[]).await;

    let stranger = TestConnection::new("mallory");
    let err = coordinator
        .connect(&room_id, stranger.handle())
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::NotAMember));
    assert_eq!(err.close_code(), CloseCode::NotAMember);

    let err = coordinator
        .connect("nosuchroom", TestConnection::new("creator").handle())
        .await
        .unwrap_err();
    assert_eq!(err.close_code(), CloseCode::RoomNotFound);
}

#[tokio::test]
async fn test_waiting_lane_only_sees_targeted_events() {
    let coordinator = memory_coordinator();
    let creator = TestUser::new("creator");
    let room_id = coordinator
        .create_room(&creator.identity(), TestRoom::new("Lobby").spec())
        .await
        .unwrap()
        .room_id;

    let mut host = TestConnection::new("creator");
    coordinator.connect(&room_id, host.handle()).await.unwrap();
    host.drain();

    for user in ["bob", "carol"] {
        coordinator
            .join_room(&room_id, &TestUser::new(user).identity(), None, None)
            .await
            .unwrap();
    }
    host.expect_event("join_request").await;
    host.expect_event("join_request").await;

    let mut bob = TestConnection::new("bob");
    let (_, outcome) = coordinator.connect(&room_id, bob.handle()).await.unwrap();
    assert_eq!(outcome.lane, Lane::Waiting);
    let mut carol = TestConnection::new("carol");
    coordinator.connect(&room_id, carol.handle()).await.unwrap();

    // Room traffic stays on the member lane
    coordinator
        .approve(&room_id, &creator.identity(), "bob")
        .await
        .unwrap();
    carol.expect_no_frame().await;
    bob.expect_event("join_approved").await;

    coordinator
        .reject(&room_id, &creator.identity(), "carol")
        .await
        .unwrap();
    let rejected = carol.expect_event("join_rejected").await;
    assert_eq!(rejected["participantId"], "carol");
    carol.expect_close(CloseCode::JoinRejected).await;

    let state = coordinator.room_state(&room_id).await.unwrap();
    assert_eq!(state.waiting_connections, 0);
    assert_eq!(state.active_connections, 2);
}

#[tokio::test]
async fn test_leave_closes_connection_normally() {
    let coordinator = memory_coordinator();
    let room_id = open_room_with(&coordinator, &["bob"]).await;

    let mut creator = TestConnection::new("creator");
    coordinator.connect(&room_id, creator.handle()).await.unwrap();
    let mut bob = TestConnection::new("bob");
    coordinator.connect(&room_id, bob.handle()).await.unwrap();
    creator.drain();
    bob.drain();

    coordinator.leave(&room_id, "bob").await.unwrap();
    bob.expect_close(CloseCode::Normal).await;
    let left = creator.expect_event("user_left").await;
    assert_eq!(left["participantId"], "bob");
}
