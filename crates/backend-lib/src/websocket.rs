// ==================
// relay-backend/src/websocket.rs
// ==================
//! Per-connection signaling handler.
//!
//! One `SignalingHandler` lives for the lifetime of one socket. It owns the
//! socket's [`ConnectionId`], remembers which user the connection joined as,
//! and dispatches each inbound message to the presence manager or the router.
//!
//! # Identity
//! Until a `JOIN` succeeds the connection may only send `JOIN`. Afterwards every
//! message must carry the joined `userId`; a socket cannot speak for another
//! participant.
//!
//! # Disconnects
//! [`SignalingHandler::on_close`] is the transport's disconnect callback: it
//! removes the socket from the registry and marks the participant not-alive.
//! Peers get `USER_LEFT` on close only if the user did not already announce it.

use std::sync::Arc;

use metrics::counter;
use relay_common::{ClientMessage, ConnectionId, Envelope, JoinRequest, MeetingId, UserId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::MESSAGE_REJECTED;
use crate::presence::JoinOutcome;
use crate::validation;
use crate::AppState;

/// Signaling handler for one socket
pub struct SignalingHandler {
    state: Arc<AppState>,
    meeting_id: MeetingId,
    connection_id: ConnectionId,
    user_id: Option<UserId>,
    // set once this socket relayed USER_LEFT for its user
    left: bool,
}

impl SignalingHandler {
    pub fn new(state: Arc<AppState>, meeting_id: MeetingId) -> Self {
        Self::with_connection_id(state, meeting_id, Uuid::new_v4())
    }

    pub fn with_connection_id(
        state: Arc<AppState>,
        meeting_id: MeetingId,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            state,
            meeting_id,
            connection_id,
            user_id: None,
            left: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// User this connection joined as, if any
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Parse, validate and dispatch one text frame
    pub async fn handle_text(&mut self, text: &str) -> Result<(), AppError> {
        validation::validate_frame_size(text.len(), self.state.settings.max_message_bytes)?;
        let envelope: Envelope = serde_json::from_str(text)?;
        let msg = ClientMessage::try_from(envelope)?;
        validation::validate_client_message(&msg)?;
        self.handle_message(msg).await
    }

    /// Report a failed frame back to this connection only
    pub fn report_error(&self, err: &AppError) {
        counter!(MESSAGE_REJECTED).increment(1);
        warn!(
            meeting_id = %self.meeting_id,
            connection_id = %self.connection_id,
            code = err.error_code(),
            error = %err,
            "rejected inbound message"
        );
        self.state
            .registry
            .unicast(self.connection_id, &err.to_server_message());
    }

    fn check_sender(&self, claimed: &str) -> Result<(), AppError> {
        match &self.user_id {
            None => Err(AppError::NotJoined),
            Some(joined) if joined != claimed => Err(AppError::UserMismatch {
                expected: joined.clone(),
                claimed: claimed.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), AppError> {
        debug!(
            meeting_id = %self.meeting_id,
            connection_id = %self.connection_id,
            msg_type = msg.kind(),
            "inbound message"
        );

        let msg = match msg {
            ClientMessage::Join(request) => return self.handle_join(request).await,
            other => other,
        };
        self.check_sender(msg.user_id())?;

        let meeting_id = self.meeting_id.as_str();
        let origin = self.connection_id;
        let presence = &self.state.presence;
        let router = &self.state.router;

        match msg {
            ClientMessage::Join(_) => {},
            ClientMessage::ConnectionRequest(req) => {
                router.forward_connection_request(meeting_id, req).await?;
            },
            ClientMessage::IceCandidate(req) => {
                router.forward_ice_candidate(meeting_id, req).await?;
            },
            ClientMessage::OfferSdp(req) => {
                router.forward_offer_sdp(meeting_id, req).await?;
            },
            ClientMessage::AnswerSdp(req) => {
                router.forward_answer_sdp(meeting_id, req).await?;
            },
            ClientMessage::StreamChanged(req) => {
                router.forward_stream_changed(meeting_id, origin, req).await?;
            },
            ClientMessage::UserLeft(req) => {
                presence.user_left(meeting_id, origin, &req.user_id).await?;
                self.left = true;
            },
            ClientMessage::EndMeeting(req) => {
                presence.end_meeting(meeting_id, origin, &req.user_id).await?;
            },
            ClientMessage::Event(event) => {
                router.forward_event(meeting_id, origin, event).await?;
            },
        }
        Ok(())
    }

    async fn handle_join(&mut self, request: JoinRequest) -> Result<(), AppError> {
        if let Some(joined) = &self.user_id {
            if *joined != request.user_id {
                return Err(AppError::UserMismatch {
                    expected: joined.clone(),
                    claimed: request.user_id,
                });
            }
        }

        let outcome = self
            .state
            .presence
            .join_meeting(&self.meeting_id, self.connection_id, request)
            .await?;
        if let JoinOutcome::Joined(participant) | JoinOutcome::Reconnected(participant) = outcome {
            self.user_id = Some(participant.user_id);
            self.left = false;
        }
        Ok(())
    }

    /// Disconnect callback; call exactly once when the socket is gone
    pub async fn on_close(&self) {
        self.state.registry.unregister(self.connection_id);

        let Some(user_id) = &self.user_id else {
            return;
        };
        let presence = &self.state.presence;
        let result = match presence
            .connection_closed(&self.meeting_id, user_id, self.connection_id)
            .await
        {
            Ok(true) if !self.left => presence
                .user_left(&self.meeting_id, self.connection_id, user_id)
                .await
                .map(|_| ()),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                meeting_id = %self.meeting_id,
                user_id = %user_id,
                connection_id = %self.connection_id,
                error = %e,
                "failed to close out participant"
            );
        }
    }
}
