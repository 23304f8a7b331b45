//! JSON API handlers.
//!
//! Bodies are deserialized by hand so malformed JSON maps to 400 through
//! [`RcError::InvalidInput`] rather than Axum's default 422.

use crate::actors::{JoinResult, RoomDetails, RoomSummary, RoomView};
use crate::coordinator::RoomSpec;
use crate::errors::RcError;
use crate::http::AppState;
use crate::protocol::{ParticipantView, RequesterView};
use crate::session::reveal;
use crate::store::RequestStatus;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::Identity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

// ----------------------------------------------------------------------------
// Request and response bodies
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
}

impl From<&Identity> for SessionUser {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.user_id.clone(),
            name: identity.display_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub room: RoomView,
    pub user: ParticipantView,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: RoomDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    /// `admitted`, `already_member` or `queued`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ParticipantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequesterView>,
    pub room: RoomView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ParticipantView>,
}

impl MessageResponse {
    fn new(message: &'static str) -> Self {
        Self {
            message,
            user: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub requests: Vec<RequesterView>,
}

#[derive(Debug, Serialize)]
pub struct RequestStatusResponse {
    pub status: RequestStatus,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RcError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "rc.http", error = %e, "Invalid request body");
        RcError::InvalidInput("invalid request body".to_string())
    })
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

/// `POST /api/session`
#[instrument(skip_all, name = "rc.http.create_session")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), RcError> {
    let request: CreateSessionRequest = parse_body(&body)?;
    let issued = state.sessions.create(&request.name).await?;

    info!(target: "rc.http", user_id = %issued.identity.user_id, "Session issued");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token: reveal(&issued.token).to_string(),
            user: SessionUser::from(&issued.identity),
        }),
    ))
}

// ----------------------------------------------------------------------------
// Rooms
// ----------------------------------------------------------------------------

/// `POST /api/rooms`
#[instrument(skip_all, name = "rc.http.create_room", fields(user_id = %identity.user_id))]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RcError> {
    let spec: RoomSpec = parse_body(&body)?;
    let created = state.coordinator.create_room(&identity, spec).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_id: created.room_id,
            room: created.room,
            user: created.creator,
        }),
    ))
}

/// `GET /api/rooms`
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomListResponse>, RcError> {
    let rooms = state.coordinator.list_rooms().await?;
    Ok(Json(RoomListResponse { rooms }))
}

/// `GET /api/rooms/:room_id`
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, RcError> {
    let room = state.coordinator.room_state(&room_id).await?;
    Ok(Json(RoomResponse {
        room: RoomDetails::from(room),
    }))
}

/// `DELETE /api/rooms/:room_id`
#[instrument(skip_all, name = "rc.http.delete_room", fields(room_id = %room_id))]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<Json<MessageResponse>, RcError> {
    state.coordinator.delete_room(&room_id, &identity).await?;
    Ok(Json(MessageResponse::new("room deleted")))
}

/// `POST /api/rooms/:room_id/join`
///
/// A full room is a 409; a wrong password is a 401.
#[instrument(
    skip_all,
    name = "rc.http.join_room",
    fields(room_id = %room_id, user_id = %identity.user_id)
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<Json<JoinRoomResponse>, RcError> {
    let request: JoinRoomRequest = if body.is_empty() {
        JoinRoomRequest::default()
    } else {
        parse_body(&body)?
    };

    let result = state
        .coordinator
        .join_room(
            &room_id,
            &identity,
            request.name.as_deref(),
            request.password,
        )
        .await?;

    let status = result.outcome();
    let (user, queued) = match result {
        JoinResult::Admitted(user) | JoinResult::AlreadyMember(user) => (Some(user), None),
        JoinResult::Queued(request) => (None, Some(request)),
        JoinResult::Rejected(rejection) => return Err(rejection.into_error()),
    };
    let room = state.coordinator.room_state(&room_id).await?.room;

    Ok(Json(JoinRoomResponse {
        status,
        user,
        request: queued,
        room,
    }))
}

/// `POST /api/rooms/:room_id/approve`
#[instrument(skip_all, name = "rc.http.approve", fields(room_id = %room_id))]
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, RcError> {
    let request: DecisionRequest = parse_body(&body)?;
    let user = state
        .coordinator
        .approve(&room_id, &identity, &request.user_id)
        .await?;
    Ok(Json(MessageResponse {
        message: "user approved",
        user: Some(user),
    }))
}

/// `POST /api/rooms/:room_id/reject`
#[instrument(skip_all, name = "rc.http.reject", fields(room_id = %room_id))]
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, RcError> {
    let request: DecisionRequest = parse_body(&body)?;
    state
        .coordinator
        .reject(&room_id, &identity, &request.user_id)
        .await?;
    Ok(Json(MessageResponse::new("user rejected")))
}

/// `POST /api/rooms/:room_id/leave`
#[instrument(skip_all, name = "rc.http.leave", fields(room_id = %room_id))]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<Json<MessageResponse>, RcError> {
    state.coordinator.leave(&room_id, &identity.user_id).await?;
    Ok(Json(MessageResponse::new("left room")))
}

/// `GET /api/rooms/:room_id/requests` (creator only)
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<Json<RequestListResponse>, RcError> {
    let requests = state
        .coordinator
        .pending_requests(&room_id, &identity)
        .await?;
    Ok(Json(RequestListResponse { requests }))
}

/// `GET /api/rooms/:room_id/requests/:user_id`
///
/// Readable by the requester and by the room creator.
pub async fn request_status(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<RequestStatusResponse>, RcError> {
    if identity.user_id != user_id {
        let room = state.coordinator.room_state(&room_id).await?.room;
        if room.creator_id != identity.user_id {
            return Err(RcError::Forbidden(
                "only the requester or the room creator may view this request".to_string(),
            ));
        }
    }
    let status = state
        .coordinator
        .request_status(&room_id, &user_id)
        .await?;
    Ok(Json(RequestStatusResponse { status }))
}

/// `GET /api/user/rooms`
pub async fn user_rooms(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<RoomListResponse>, RcError> {
    let rooms = state.coordinator.rooms_for_user(&identity.user_id).await?;
    Ok(Json(RoomListResponse { rooms }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_rejects_malformed_json() {
        let err = parse_body::<DecisionRequest>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, RcError::InvalidInput(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let ok: DecisionRequest = parse_body(&Bytes::from_static(br#"{"userId":"bob"}"#)).unwrap();
        assert_eq!(ok.user_id, "bob");
    }

    #[test]
    fn test_join_request_fields_are_optional() {
        let request: JoinRoomRequest = parse_body(&Bytes::from_static(b"{}")).unwrap();
        assert!(request.name.is_none());
        assert!(request.password.is_none());
    }

    #[test]
    fn test_message_response_omits_empty_user() {
        let json = serde_json::to_value(MessageResponse::new("left room")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "left room"}));
    }
}
