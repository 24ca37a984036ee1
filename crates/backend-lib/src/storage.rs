// ============================
// relay-backend/src/storage.rs
// ============================
//! Persistence backends for meetings and participant records.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_common::{ConnectionId, MeetingId, MeetingInfo, UserId};
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{StorageKind, StorageSettings};
use crate::directory::DirectoryError;
use crate::validation;

/// One user's membership in a meeting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    /// Connection of the most recently accepted join
    pub socket_id: ConnectionId,
    pub name: String,
    pub joined: bool,
    pub is_alive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// Fresh record for a first join
    pub fn new(
        meeting_id: impl Into<MeetingId>,
        user_id: impl Into<UserId>,
        socket_id: ConnectionId,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            meeting_id: meeting_id.into(),
            user_id: user_id.into(),
            socket_id,
            name: name.into(),
            joined: true,
            is_alive: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether relayed messages may target this participant
    pub fn is_active(&self) -> bool {
        self.joined && self.is_alive
    }

    fn refresh_socket(&mut self, socket_id: ConnectionId) {
        self.socket_id = socket_id;
        self.joined = true;
        self.is_alive = true;
        self.updated_at = Utc::now();
    }

    fn mark_not_alive(&mut self, socket_id: ConnectionId) -> bool {
        if self.socket_id != socket_id || !self.is_alive {
            return false;
        }
        self.is_alive = false;
        self.updated_at = Utc::now();
        true
    }
}

/// Meeting entity owned by the meeting API
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub meeting_id: MeetingId,
    pub host_id: UserId,
    pub host_name: String,
    pub created_at: DateTime<Utc>,
}

impl Meeting {
    pub fn new(
        meeting_id: impl Into<MeetingId>,
        host_id: impl Into<UserId>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
            created_at: Utc::now(),
        }
    }

    /// Meeting with a freshly generated id
    pub fn generate(host_id: impl Into<UserId>, host_name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), host_id, host_name)
    }

    pub fn to_info(&self) -> MeetingInfo {
        MeetingInfo {
            meeting_id: self.meeting_id.clone(),
            host_id: self.host_id.clone(),
            host_name: self.host_name.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// Trait for persistence backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether the meeting entity exists
    async fn meeting_exists(&self, meeting_id: &str) -> Result<bool, DirectoryError>;

    /// Persist a new meeting
    async fn create_meeting(&self, meeting: Meeting) -> Result<Meeting, DirectoryError>;

    /// Fetch a meeting
    async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, DirectoryError>;

    /// Fetch the participant record for `(meeting_id, user_id)`
    async fn get_by_key(&self, meeting_id: &str, user_id: &str)
        -> Result<Participant, DirectoryError>;

    /// Snapshot of every participant record of a meeting
    async fn list_by_meeting(&self, meeting_id: &str) -> Result<Vec<Participant>, DirectoryError>;

    /// Insert a record; fails with `Conflict` if the key is taken
    async fn insert(&self, record: Participant) -> Result<Participant, DirectoryError>;

    /// Point an existing record at a new connection and revive it
    async fn update_socket(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<Participant, DirectoryError>;

    /// Mark a record not-alive if it still points at `socket_id`.
    /// Returns whether the record changed.
    async fn mark_not_alive(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<bool, DirectoryError>;
}

/// In-process store backed by concurrent maps
#[derive(Clone, Default)]
pub struct MemoryStore {
    meetings: Arc<DashMap<MeetingId, Meeting>>,
    participants: Arc<DashMap<MeetingId, HashMap<UserId, Participant>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a meeting directly, bypassing the async API
    pub fn insert_meeting(&self, meeting: Meeting) {
        self.meetings.insert(meeting.meeting_id.clone(), meeting);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn meeting_exists(&self, meeting_id: &str) -> Result<bool, DirectoryError> {
        Ok(self.meetings.contains_key(meeting_id))
    }

    async fn create_meeting(&self, meeting: Meeting) -> Result<Meeting, DirectoryError> {
        match self.meetings.entry(meeting.meeting_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DirectoryError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(meeting.clone());
                Ok(meeting)
            },
        }
    }

    async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, DirectoryError> {
        self.meetings
            .get(meeting_id)
            .map(|entry| entry.value().clone())
            .ok_or(DirectoryError::NotFound)
    }

    async fn get_by_key(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<Participant, DirectoryError> {
        self.participants
            .get(meeting_id)
            .and_then(|members| members.get(user_id).cloned())
            .ok_or(DirectoryError::NotFound)
    }

    async fn list_by_meeting(&self, meeting_id: &str) -> Result<Vec<Participant>, DirectoryError> {
        Ok(self
            .participants
            .get(meeting_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, record: Participant) -> Result<Participant, DirectoryError> {
        // The shard lock held by `entry` serialises writers of the same meeting.
        let mut members = self.participants.entry(record.meeting_id.clone()).or_default();
        if members.contains_key(&record.user_id) {
            return Err(DirectoryError::Conflict);
        }
        members.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }

    async fn update_socket(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<Participant, DirectoryError> {
        let mut members = self
            .participants
            .get_mut(meeting_id)
            .ok_or(DirectoryError::NotFound)?;
        let record = members.get_mut(user_id).ok_or(DirectoryError::NotFound)?;
        record.refresh_socket(socket_id);
        Ok(record.clone())
    }

    async fn mark_not_alive(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<bool, DirectoryError> {
        let Some(mut members) = self.participants.get_mut(meeting_id) else {
            return Ok(false);
        };
        Ok(members
            .get_mut(user_id)
            .is_some_and(|record| record.mark_not_alive(socket_id)))
    }
}

/// Flat-file store: one directory per meeting holding `meeting.json` and
/// `participants.json`.
#[derive(Clone)]
pub struct FlatFileStore {
    root: PathBuf,
    // Every read-modify-write cycle runs under this lock.
    lock: Arc<Mutex<()>>,
}

impl FlatFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("meetings"))?;
        Ok(Self {
            root,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn meeting_dir(&self, meeting_id: &str) -> Result<PathBuf, DirectoryError> {
        // Ids become path segments; anything outside the id alphabet cannot exist.
        validation::validate_meeting_id(meeting_id).map_err(|_| DirectoryError::NotFound)?;
        Ok(self.root.join("meetings").join(meeting_id))
    }

    async fn read_members(
        &self,
        meeting_id: &str,
    ) -> Result<HashMap<UserId, Participant>, DirectoryError> {
        let path = self.meeting_dir(meeting_id)?.join("participants.json");
        if !tokio_fs::try_exists(&path).await? {
            return Ok(HashMap::new());
        }
        let content = tokio_fs::read_to_string(&path).await?;
        let records: Vec<Participant> = serde_json::from_str(&content)?;
        Ok(records
            .into_iter()
            .map(|record| (record.user_id.clone(), record))
            .collect())
    }

    async fn write_members(
        &self,
        meeting_id: &str,
        members: &HashMap<UserId, Participant>,
    ) -> Result<(), DirectoryError> {
        let dir = self.meeting_dir(meeting_id)?;
        tokio_fs::create_dir_all(&dir).await?;
        let records: Vec<&Participant> = members.values().collect();
        let json = serde_json::to_string_pretty(&records)?;

        // write-then-rename so a crash never leaves a truncated file behind
        let tmp = dir.join("participants.json.tmp");
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, dir.join("participants.json")).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlatFileStore {
    async fn meeting_exists(&self, meeting_id: &str) -> Result<bool, DirectoryError> {
        let Ok(dir) = self.meeting_dir(meeting_id) else {
            return Ok(false);
        };
        Ok(tokio_fs::try_exists(dir.join("meeting.json")).await?)
    }

    async fn create_meeting(&self, meeting: Meeting) -> Result<Meeting, DirectoryError> {
        let _guard = self.lock.lock().await;
        let dir = self.meeting_dir(&meeting.meeting_id)?;
        let path = dir.join("meeting.json");
        if tokio_fs::try_exists(&path).await? {
            return Err(DirectoryError::Conflict);
        }
        tokio_fs::create_dir_all(&dir).await?;
        tokio_fs::write(&path, serde_json::to_string_pretty(&meeting)?).await?;
        Ok(meeting)
    }

    async fn get_meeting(&self, meeting_id: &str) -> Result<Meeting, DirectoryError> {
        let path = self.meeting_dir(meeting_id)?.join("meeting.json");
        if !tokio_fs::try_exists(&path).await? {
            return Err(DirectoryError::NotFound);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn get_by_key(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<Participant, DirectoryError> {
        let _guard = self.lock.lock().await;
        self.read_members(meeting_id)
            .await?
            .remove(user_id)
            .ok_or(DirectoryError::NotFound)
    }

    async fn list_by_meeting(&self, meeting_id: &str) -> Result<Vec<Participant>, DirectoryError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_members(meeting_id).await?.into_values().collect())
    }

    async fn insert(&self, record: Participant) -> Result<Participant, DirectoryError> {
        let _guard = self.lock.lock().await;
        let mut members = self.read_members(&record.meeting_id).await?;
        if members.contains_key(&record.user_id) {
            return Err(DirectoryError::Conflict);
        }
        members.insert(record.user_id.clone(), record.clone());
        self.write_members(&record.meeting_id, &members).await?;
        Ok(record)
    }

    async fn update_socket(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<Participant, DirectoryError> {
        let _guard = self.lock.lock().await;
        let mut members = self.read_members(meeting_id).await?;
        let record = members.get_mut(user_id).ok_or(DirectoryError::NotFound)?;
        record.refresh_socket(socket_id);
        let updated = record.clone();
        self.write_members(meeting_id, &members).await?;
        Ok(updated)
    }

    async fn mark_not_alive(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: ConnectionId,
    ) -> Result<bool, DirectoryError> {
        let _guard = self.lock.lock().await;
        let mut members = self.read_members(meeting_id).await?;
        let changed = members
            .get_mut(user_id)
            .is_some_and(|record| record.mark_not_alive(socket_id));
        if changed {
            self.write_members(meeting_id, &members).await?;
        }
        Ok(changed)
    }
}

/// Build the backend selected in the settings
pub fn build_store(settings: &StorageSettings) -> anyhow::Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match settings.kind {
        StorageKind::Memory => Arc::new(MemoryStore::new()),
        StorageKind::FlatFile => Arc::new(FlatFileStore::new(&settings.path)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise_store(store: &dyn SessionStore) {
        store.create_meeting(Meeting::new("m-1", "host", "Host")).await.unwrap();
        assert!(store.meeting_exists("m-1").await.unwrap());
        assert!(!store.meeting_exists("m-2").await.unwrap());

        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        store.insert(Participant::new("m-1", "alice", s1, "Alice")).await.unwrap();
        assert_eq!(
            store.insert(Participant::new("m-1", "alice", s2, "Alice")).await,
            Err(DirectoryError::Conflict)
        );

        let updated = store.update_socket("m-1", "alice", s2).await.unwrap();
        assert_eq!(updated.socket_id, s2);
        assert_eq!(store.list_by_meeting("m-1").await.unwrap().len(), 1);

        // a close from the replaced socket is ignored
        assert!(!store.mark_not_alive("m-1", "alice", s1).await.unwrap());
        assert!(store.get_by_key("m-1", "alice").await.unwrap().is_alive);

        assert!(store.mark_not_alive("m-1", "alice", s2).await.unwrap());
        assert!(!store.get_by_key("m-1", "alice").await.unwrap().is_active());

        // reconnect revives the record
        let revived = store.update_socket("m-1", "alice", s1).await.unwrap();
        assert!(revived.is_active());

        assert_eq!(
            store.get_by_key("m-1", "bob").await,
            Err(DirectoryError::NotFound)
        );
        assert_eq!(
            store.update_socket("m-1", "bob", s1).await,
            Err(DirectoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_flat_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FlatFileStore::new(temp_dir.path()).unwrap();
        exercise_store(&store).await;

        // data survives a fresh handle on the same directory
        let reopened = FlatFileStore::new(temp_dir.path()).unwrap();
        assert!(reopened.meeting_exists("m-1").await.unwrap());
        assert_eq!(reopened.list_by_meeting("m-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flat_file_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FlatFileStore::new(temp_dir.path()).unwrap();
        assert!(!store.meeting_exists("../escape").await.unwrap());
        assert_eq!(
            store.get_meeting("../escape").await,
            Err(DirectoryError::NotFound)
        );
    }
}
