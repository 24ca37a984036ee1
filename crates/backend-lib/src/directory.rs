// ============================
// relay-backend/src/directory.rs
// ============================
//! Session directory: the single owner of participant records.
//!
//! All reads and writes of `(meeting, user)` records go through here, so the
//! backing store is the one serialisation point for concurrent joins.
use std::sync::Arc;

use relay_common::ConnectionId;
use thiserror::Error;
use tracing::warn;

use crate::storage::{Meeting, Participant, SessionStore};

/// Outcomes a directory call can fail with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<std::io::Error> for DirectoryError {
    fn from(err: std::io::Error) -> Self {
        DirectoryError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        DirectoryError::StoreUnavailable(format!("corrupt record: {err}"))
    }
}

#[derive(Clone)]
pub struct SessionDirectory {
    store: Arc<dyn SessionStore>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Whether the externally owned meeting exists
    pub async fn exists(&self, meeting_id: &str) -> Result<bool, DirectoryError> {
        self.store.meeting_exists(meeting_id).await.inspect_err(|e| {
            warn!(meeting_id, error = %e, "meeting lookup failed");
        })
    }

    pub async fn get(&self, meeting_id: &str, user_id: &str) -> Result<Participant, DirectoryError> {
        self.store.get_by_key(meeting_id, user_id).await
    }

    /// Like [`get`](Self::get) but with absence as `None`
    pub async fn find(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, DirectoryError> {
        match self.store.get_by_key(meeting_id, user_id).await {
            Ok(record) => Ok(Some(record)),
            Err(DirectoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn insert(&self, record: Participant) -> Result<Participant, DirectoryError> {
        self.store.insert(record).await
    }

    pub async fn update_socket(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<Participant, DirectoryError> {
        self.store.update_socket(meeting_id, user_id, socket_id).await
    }

    /// Unordered snapshot of every record in the meeting
    pub async fn list_by_meeting(&self, meeting_id: &str) -> Result<Vec<Participant>, DirectoryError> {
        self.store.list_by_meeting(meeting_id).await
    }

    /// Participants currently eligible to receive relayed messages
    pub async fn active_participants(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError> {
        let mut records = self.store.list_by_meeting(meeting_id).await?;
        records.retain(Participant::is_active);
        Ok(records)
    }

    pub async fn mark_not_alive(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<bool, DirectoryError> {
        self.store.mark_not_alive(meeting_id, user_id, socket_id).await
    }

    pub async fn create_meeting(&self, meeting: Meeting) -> Result<Meeting, DirectoryError> {
        self.store.create_meeting(meeting).await
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, DirectoryError> {
        self.store.get_meeting(meeting_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_find_maps_absence_to_none() {
        let directory = SessionDirectory::new(Arc::new(MemoryStore::new()));
        assert_eq!(directory.find("m-1", "alice").await, Ok(None));

        let record = Participant::new("m-1", "alice", Uuid::new_v4(), "Alice");
        directory.insert(record.clone()).await.unwrap();
        assert_eq!(directory.find("m-1", "alice").await, Ok(Some(record)));
    }

    #[tokio::test]
    async fn test_active_participants_skips_dead_records() {
        let directory = SessionDirectory::new(Arc::new(MemoryStore::new()));
        let alice_socket = Uuid::new_v4();
        directory
            .insert(Participant::new("m-1", "alice", alice_socket, "Alice"))
            .await
            .unwrap();
        directory
            .insert(Participant::new("m-1", "bob", Uuid::new_v4(), "Bob"))
            .await
            .unwrap();
        directory.mark_not_alive("m-1", "alice", alice_socket).await.unwrap();

        let active = directory.active_participants("m-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, "bob");
        assert_eq!(directory.list_by_meeting("m-1").await.unwrap().len(), 2);
    }
}
