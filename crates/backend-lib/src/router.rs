// ============================
// relay-backend/src/router.rs
// ============================
//! Call-establishment relay: resolves the target of each signaling message and
//! forwards a re-typed payload.
//!
//! Point-to-point messages (connection requests, SDP, ICE) go to the current
//! socket of `otherUserId`. A missing or inactive target drops the message
//! without telling the sender; delivery is at most once.
use metrics::counter;
use relay_common::{
    ConnectionId, ConnectionRequest, CustomEvent, IceCandidateRequest, SdpRequest, ServerMessage,
    StreamChangedRequest,
};
use tracing::debug;

use crate::directory::{DirectoryError, SessionDirectory};
use crate::metrics::RELAY_TARGET_MISSING;
use crate::registry::ConnectionRegistry;

/// What happened to a point-to-point relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the target's current connection
    Delivered(ConnectionId),
    /// Target absent, inactive or its connection is gone
    Dropped,
}

#[derive(Clone)]
pub struct MessageRouter {
    directory: SessionDirectory,
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(directory: SessionDirectory, registry: ConnectionRegistry) -> Self {
        Self { directory, registry }
    }

    async fn relay_to(
        &self,
        meeting_id: &str,
        target_user: &str,
        msg: ServerMessage,
    ) -> Result<Delivery, DirectoryError> {
        let target = self
            .directory
            .find(meeting_id, target_user)
            .await?
            .filter(|p| p.is_active());

        let Some(target) = target else {
            counter!(RELAY_TARGET_MISSING).increment(1);
            debug!(meeting_id, target_user, "relay target unavailable, dropping");
            return Ok(Delivery::Dropped);
        };

        if self.registry.unicast(target.socket_id, &msg) {
            Ok(Delivery::Delivered(target.socket_id))
        } else {
            Ok(Delivery::Dropped)
        }
    }

    pub async fn forward_connection_request(
        &self,
        meeting_id: &str,
        request: ConnectionRequest,
    ) -> Result<Delivery, DirectoryError> {
        let msg = ServerMessage::ConnectionRequest {
            user_id: request.user_id,
            name: request.name,
        };
        self.relay_to(meeting_id, &request.other_user_id, msg).await
    }

    pub async fn forward_ice_candidate(
        &self,
        meeting_id: &str,
        request: IceCandidateRequest,
    ) -> Result<Delivery, DirectoryError> {
        let msg = ServerMessage::IceCandidate {
            user_id: request.user_id,
            candidate: request.candidate,
        };
        self.relay_to(meeting_id, &request.other_user_id, msg).await
    }

    pub async fn forward_offer_sdp(
        &self,
        meeting_id: &str,
        request: SdpRequest,
    ) -> Result<Delivery, DirectoryError> {
        let msg = ServerMessage::OfferSdp {
            user_id: request.user_id,
            sdp: request.sdp,
        };
        self.relay_to(meeting_id, &request.other_user_id, msg).await
    }

    pub async fn forward_answer_sdp(
        &self,
        meeting_id: &str,
        request: SdpRequest,
    ) -> Result<Delivery, DirectoryError> {
        let msg = ServerMessage::AnswerSdp {
            user_id: request.user_id,
            sdp: request.sdp,
        };
        self.relay_to(meeting_id, &request.other_user_id, msg).await
    }

    /// Fan a stream toggle out to every active participant but the originator
    pub async fn forward_stream_changed(
        &self,
        meeting_id: &str,
        origin: ConnectionId,
        request: StreamChangedRequest,
    ) -> Result<usize, DirectoryError> {
        let peers = self.directory.active_participants(meeting_id).await?;
        let scope = peers
            .iter()
            .filter(|p| p.user_id != request.user_id)
            .map(|p| p.socket_id);
        let msg = ServerMessage::StreamChanged {
            user_id: request.user_id.clone(),
            stream: request.stream,
        };
        Ok(self.registry.broadcast(Some(origin), &msg, scope))
    }

    /// Meeting-scoped broadcast for signaling types without a dedicated handler
    pub async fn forward_event(
        &self,
        meeting_id: &str,
        origin: ConnectionId,
        event: CustomEvent,
    ) -> Result<usize, DirectoryError> {
        let peers = self.directory.active_participants(meeting_id).await?;
        let scope = peers
            .iter()
            .filter(|p| p.user_id != event.user_id)
            .map(|p| p.socket_id);
        let msg = ServerMessage::Event {
            kind: event.kind,
            user_id: event.user_id.clone(),
            data: event.data,
        };
        Ok(self.registry.broadcast(Some(origin), &msg, scope))
    }
}
