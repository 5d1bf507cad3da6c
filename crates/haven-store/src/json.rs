//! JSON document store.
//!
//! Each registry snapshots into its own document file under one data
//! directory: `servers.json` (communities), `messages.json` (per-scope
//! history), `identity.json` (identities, friendships, pending requests,
//! notifications, conversations). Writes go through a temp file and a
//! rename so a crash mid-write never leaves a half-written document.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use haven_shared::snapshot::{CommunitiesDoc, IdentityDoc, MessagesDoc, Snapshot};

use crate::error::{Result, StoreError};

const SERVERS_FILE: &str = "servers.json";
const MESSAGES_FILE: &str = "messages.json";
const IDENTITY_FILE: &str = "identity.json";

/// File-backed snapshot store rooted at one directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (or create) the default application data directory.
    ///
    /// Documents are placed in the platform-appropriate location:
    /// - Linux:   `~/.local/share/haven/`
    /// - macOS:   `~/Library/Application Support/chat.haven.haven/`
    /// - Windows: `{FOLDERID_RoamingAppData}\haven\haven\data\`
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("chat", "haven", "haven").ok_or(StoreError::NoDataDir)?;
        Self::open_at(project_dirs.data_dir())
    }

    /// Open (or create) a store at an explicit directory.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        info!(path = %dir.display(), "opening data directory");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Filesystem directory the documents live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all three documents into one snapshot.
    ///
    /// Missing files mean a fresh install and yield empty documents. A
    /// file that exists but does not parse is kept on disk untouched and
    /// replaced by an empty document in memory, so a corrupt file never
    /// prevents startup.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            communities: self.read_doc::<CommunitiesDoc>(SERVERS_FILE)?,
            messages: self.read_doc::<MessagesDoc>(MESSAGES_FILE)?,
            identity: self.read_doc::<IdentityDoc>(IDENTITY_FILE)?,
        })
    }

    pub fn save_communities(&self, doc: &CommunitiesDoc) -> Result<()> {
        self.write_doc(SERVERS_FILE, doc)
    }

    pub fn save_messages(&self, doc: &MessagesDoc) -> Result<()> {
        self.write_doc(MESSAGES_FILE, doc)
    }

    pub fn save_identity(&self, doc: &IdentityDoc) -> Result<()> {
        self.write_doc(IDENTITY_FILE, doc)
    }

    fn read_doc<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(doc),
            Err(source) => {
                warn!(file, error = %source, "corrupt document, starting from empty");
                Ok(T::default())
            }
        }
    }

    fn write_doc<T: Serialize>(&self, file: &str, doc: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(doc)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use chrono::Utc;

    use haven_shared::types::{
        Channel, ChannelId, ChannelKind, Community, CommunityId, Identity, Presence, UserId,
    };

    fn community(id: &str) -> Community {
        let cid = CommunityId(id.to_string());
        Community {
            id: cid.clone(),
            name: "Test".to_string(),
            owner_id: UserId("u1".to_string()),
            invite_code: "ABC123".to_string(),
            channels: vec![Channel {
                id: ChannelId(format!("{id}-general")),
                name: "general".to_string(),
                kind: ChannelKind::Text,
                server_id: cid,
            }],
            members: vec![UserId("u1".to_string())],
        }
    }

    #[test]
    fn fresh_directory_loads_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open_at(dir.path()).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot, Snapshot::default());
    }

    #[test]
    fn documents_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open_at(dir.path()).unwrap();

        let mut communities = BTreeMap::new();
        communities.insert(CommunityId("c1".to_string()), community("c1"));
        let doc = CommunitiesDoc { communities };
        store.save_communities(&doc).unwrap();

        let identity = IdentityDoc {
            users: vec![Identity {
                user_id: UserId("u1".to_string()),
                username: "alice".to_string(),
                status: Presence::Online,
                last_seen: Utc::now(),
            }],
            ..IdentityDoc::default()
        };
        store.save_identity(&identity).unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.communities, doc);
        assert_eq!(snapshot.identity.users.len(), 1);
        assert!(snapshot.messages.channels.is_empty());
    }

    #[test]
    fn corrupt_document_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open_at(dir.path()).unwrap();
        fs::write(dir.path().join(SERVERS_FILE), b"{not json").unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert!(snapshot.communities.communities.is_empty());
    }

    #[test]
    fn save_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open_at(dir.path()).unwrap();

        let mut communities = BTreeMap::new();
        communities.insert(CommunityId("c1".to_string()), community("c1"));
        store
            .save_communities(&CommunitiesDoc { communities })
            .unwrap();
        store
            .save_communities(&CommunitiesDoc::default())
            .unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert!(snapshot.communities.communities.is_empty());
        assert!(!dir.path().join("servers.json.tmp").exists());
    }
}
