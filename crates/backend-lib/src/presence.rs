// ============================
// relay-backend/src/presence.rs
// ============================
//! Join/leave/reconnect lifecycle of meeting participants.
//!
//! Per `(meeting, user)` a participant is either absent or active. The first
//! accepted join creates the record, later joins only move it to the new
//! connection, and a socket close or meeting end takes it out of the relay set.
use metrics::counter;
use relay_common::{ConnectionId, JoinRequest, ServerMessage};
use tracing::{debug, info, warn};

use crate::directory::{DirectoryError, SessionDirectory};
use crate::metrics::{
    DISCONNECT_FAILED, MEETING_ENDED, MEETING_JOINED, MEETING_JOIN_REJECTED, MEETING_RECONNECTED,
};
use crate::registry::ConnectionRegistry;
use crate::storage::Participant;

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// The meeting does not exist; the requester was told so
    MeetingNotFound,
    /// First join of this user
    Joined(Participant),
    /// The user's record now points at the new connection
    Reconnected(Participant),
}

impl JoinOutcome {
    pub fn participant(&self) -> Option<&Participant> {
        match self {
            JoinOutcome::MeetingNotFound => None,
            JoinOutcome::Joined(p) | JoinOutcome::Reconnected(p) => Some(p),
        }
    }
}

/// Tally of a meeting teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PresenceManager {
    directory: SessionDirectory,
    registry: ConnectionRegistry,
}

impl PresenceManager {
    pub fn new(directory: SessionDirectory, registry: ConnectionRegistry) -> Self {
        Self { directory, registry }
    }

    /// Admit `connection_id` into the meeting as `request.user_id`.
    ///
    /// A missing meeting is answered with `NOT_FOUND` to the requester only.
    /// Store failures are returned untouched: nothing was committed and nothing
    /// was broadcast, so the caller reports them to the requester.
    pub async fn join_meeting(
        &self,
        meeting_id: &str,
        connection_id: ConnectionId,
        request: JoinRequest,
    ) -> Result<JoinOutcome, DirectoryError> {
        if !self.directory.exists(meeting_id).await? {
            counter!(MEETING_JOIN_REJECTED).increment(1);
            debug!(meeting_id, %connection_id, "join rejected: meeting not found");
            self.registry.unicast(connection_id, &ServerMessage::NotFound);
            return Ok(JoinOutcome::MeetingNotFound);
        }

        let outcome = self.upsert(meeting_id, connection_id, &request).await?;
        match &outcome {
            JoinOutcome::Joined(_) => counter!(MEETING_JOINED).increment(1),
            JoinOutcome::Reconnected(_) => counter!(MEETING_RECONNECTED).increment(1),
            JoinOutcome::MeetingNotFound => {},
        }
        info!(
            meeting_id,
            user_id = %request.user_id,
            %connection_id,
            reconnect = matches!(outcome, JoinOutcome::Reconnected(_)),
            "participant joined"
        );

        self.registry.unicast(
            connection_id,
            &ServerMessage::JoinedMeeting {
                user_id: request.user_id.clone(),
            },
        );

        // Best effort: the join is committed even if peers cannot be listed.
        match self.directory.active_participants(meeting_id).await {
            Ok(peers) => {
                let scope = peers
                    .iter()
                    .filter(|p| p.user_id != request.user_id)
                    .map(|p| p.socket_id);
                let msg = ServerMessage::UserJoined {
                    user_id: request.user_id.clone(),
                    name: request.name.clone(),
                };
                self.registry.broadcast(Some(connection_id), &msg, scope);
            },
            Err(e) => warn!(meeting_id, error = %e, "could not announce join"),
        }

        Ok(outcome)
    }

    /// Insert on first join, otherwise move the existing record to the new socket.
    async fn upsert(
        &self,
        meeting_id: &str,
        connection_id: ConnectionId,
        request: &JoinRequest,
    ) -> Result<JoinOutcome, DirectoryError> {
        if self.directory.find(meeting_id, &request.user_id).await?.is_none() {
            let record =
                Participant::new(meeting_id, &request.user_id, connection_id, &request.name);
            match self.directory.insert(record).await {
                Ok(record) => return Ok(JoinOutcome::Joined(record)),
                // A concurrent join of the same user won the insert; fall through to refresh.
                Err(DirectoryError::Conflict) => {},
                Err(e) => return Err(e),
            }
        }

        self.directory
            .update_socket(meeting_id, &request.user_id, connection_id)
            .await
            .map(JoinOutcome::Reconnected)
    }

    /// Tell the rest of the meeting that `user_id` left.
    /// The record itself is deactivated by [`connection_closed`](Self::connection_closed).
    pub async fn user_left(
        &self,
        meeting_id: &str,
        origin: ConnectionId,
        user_id: &str,
    ) -> Result<usize, DirectoryError> {
        let peers = self.directory.active_participants(meeting_id).await?;
        let scope = peers
            .iter()
            .filter(|p| p.user_id != user_id)
            .map(|p| p.socket_id);
        let msg = ServerMessage::UserLeft {
            user_id: user_id.to_string(),
        };
        Ok(self.registry.broadcast(Some(origin), &msg, scope))
    }

    /// Announce the end of the meeting, then disconnect every participant.
    ///
    /// One failed disconnect never stops the others.
    pub async fn end_meeting(
        &self,
        meeting_id: &str,
        origin: ConnectionId,
        user_id: &str,
    ) -> Result<TeardownReport, DirectoryError> {
        let participants = self.directory.list_by_meeting(meeting_id).await?;

        let msg = ServerMessage::MeetingEnded {
            user_id: user_id.to_string(),
        };
        let scope = participants
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.socket_id);
        self.registry.broadcast(Some(origin), &msg, scope);

        let mut report = TeardownReport::default();
        for participant in &participants {
            report.attempted += 1;
            if let Err(e) = self.registry.disconnect(participant.socket_id) {
                report.failed += 1;
                counter!(DISCONNECT_FAILED).increment(1);
                warn!(
                    meeting_id,
                    user_id = %participant.user_id,
                    connection_id = %participant.socket_id,
                    error = %e,
                    "disconnect failed during teardown"
                );
            }
            if let Err(e) = self
                .directory
                .mark_not_alive(meeting_id, &participant.user_id, participant.socket_id)
                .await
            {
                warn!(meeting_id, user_id = %participant.user_id, error = %e, "could not deactivate participant");
            }
        }

        counter!(MEETING_ENDED).increment(1);
        info!(
            meeting_id,
            ended_by = user_id,
            attempted = report.attempted,
            failed = report.failed,
            "meeting ended"
        );
        Ok(report)
    }

    /// Disconnect handler invoked by the transport when a socket closes.
    ///
    /// Only deactivates the record if it still points at `connection_id`; a close
    /// arriving after a reconnect leaves the newer socket alone. Returns whether
    /// the record went inactive. Announcing the departure is up to the caller.
    pub async fn connection_closed(
        &self,
        meeting_id: &str,
        user_id: &str,
        connection_id: ConnectionId,
    ) -> Result<bool, DirectoryError> {
        let deactivated = self
            .directory
            .mark_not_alive(meeting_id, user_id, connection_id)
            .await?;
        if deactivated {
            debug!(meeting_id, user_id, %connection_id, "participant marked not alive");
        } else {
            debug!(meeting_id, user_id, %connection_id, "stale connection closed");
        }
        Ok(deactivated)
    }
}
