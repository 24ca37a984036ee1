// ============================
// relay-backend/src/handlers/meeting.rs
// ============================
//! Meeting API: create a meeting and check that one exists before opening a socket.
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use relay_common::{MeetingId, MeetingInfo, UserId};
use serde::Deserialize;
use tracing::info;

use crate::directory::DirectoryError;
use crate::error::AppError;
use crate::metrics::MEETING_CREATED;
use crate::storage::Meeting;
use crate::validation;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeetingRequest {
    pub host_id: UserId,
    pub host_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingQuery {
    pub meeting_id: MeetingId,
}

/// `POST /api/meeting/start`
pub async fn start_meeting(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartMeetingRequest>,
) -> Result<(StatusCode, Json<MeetingInfo>), AppError> {
    validation::validate_user_id(&request.host_id)?;
    validation::validate_name(&request.host_name)?;

    let meeting = state
        .directory
        .create_meeting(Meeting::generate(request.host_id, request.host_name))
        .await?;

    counter!(MEETING_CREATED).increment(1);
    info!(meeting_id = %meeting.meeting_id, host_id = %meeting.host_id, "meeting created");
    Ok((StatusCode::CREATED, Json(meeting.to_info())))
}

/// `GET /api/meeting/join?meetingId=...`
pub async fn check_meeting(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MeetingQuery>,
) -> Result<Json<MeetingInfo>, AppError> {
    validation::validate_meeting_id(&query.meeting_id)?;

    match state.directory.get_meeting(&query.meeting_id).await {
        Ok(meeting) => Ok(Json(meeting.to_info())),
        Err(DirectoryError::NotFound) => Err(AppError::MeetingNotFound),
        Err(e) => Err(e.into()),
    }
}
