/// Flat-file persistence for the peer's collaborator records.
///
/// Everything is JSON under one data directory: server definitions,
/// contacts, the block list, and one conversation-log file per address.
/// Missing files read as empty collections. Store failures are advisory
/// to callers; in-memory routing never blocks on them.
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::directory::Contact;

const SERVERS_FILE: &str = "servers.json";
const CONTACTS_FILE: &str = "contacts.json";
const BLOCKED_FILE: &str = "blocked.json";
const HISTORY_DIR: &str = "history";

/// A named hub endpoint the peer can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDef {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl ServerDef {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt record file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize records: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Handle to the data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (creating if needed) the data directory and its history subdir.
    pub fn open(root: impl Into<PathBuf>) -> Result<Store, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(HISTORY_DIR))?;
        Ok(Store { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Server definitions ───────────────────────────────────────

    pub fn load_servers(&self) -> Result<Vec<ServerDef>, StoreError> {
        self.load_json(self.root.join(SERVERS_FILE))
    }

    pub fn save_servers(&self, servers: &[ServerDef]) -> Result<(), StoreError> {
        self.save_json(self.root.join(SERVERS_FILE), servers)
    }

    // ── Contacts ─────────────────────────────────────────────────

    pub fn load_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        self.load_json(self.root.join(CONTACTS_FILE))
    }

    pub fn save_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError> {
        self.save_json(self.root.join(CONTACTS_FILE), contacts)
    }

    // ── Block list ───────────────────────────────────────────────

    /// Load blocked addresses. Entries that no longer parse are dropped
    /// with a warning rather than poisoning the whole set.
    pub fn load_blocked(&self) -> Result<HashSet<SocketAddr>, StoreError> {
        let raw: Vec<String> = self.load_json(self.root.join(BLOCKED_FILE))?;
        let mut blocked = HashSet::with_capacity(raw.len());
        for entry in raw {
            match entry.parse() {
                Ok(addr) => {
                    blocked.insert(addr);
                }
                Err(_) => warn!(%entry, "dropping unparseable blocked address"),
            }
        }
        Ok(blocked)
    }

    pub fn save_blocked(
        &self,
        blocked: impl IntoIterator<Item = SocketAddr>,
    ) -> Result<(), StoreError> {
        let mut entries: Vec<String> = blocked.into_iter().map(|a| a.to_string()).collect();
        entries.sort(); // stable file contents
        self.save_json(self.root.join(BLOCKED_FILE), &entries)
    }

    // ── Conversation logs ────────────────────────────────────────

    pub fn load_history(&self, addr: SocketAddr) -> Result<Vec<String>, StoreError> {
        self.load_json(self.history_path(addr))
    }

    /// Append one display line to an address's conversation log.
    /// A corrupt log file is restarted rather than treated as fatal.
    pub fn append_history(&self, addr: SocketAddr, line: &str) -> Result<(), StoreError> {
        let path = self.history_path(addr);
        let mut history: Vec<String> = match self.load_json(&path) {
            Ok(history) => history,
            Err(StoreError::Corrupt { path, .. }) => {
                warn!(path = %path.display(), "corrupt conversation log, starting fresh");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        history.push(line.to_owned());
        self.save_json(path, &history)
    }

    /// Move a conversation log to a new address, e.g. after a contact edit.
    /// Missing source is a no-op.
    pub fn move_history(&self, from: SocketAddr, to: SocketAddr) -> Result<(), StoreError> {
        match fs::rename(self.history_path(from), self.history_path(to)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear_history(&self, addr: SocketAddr) -> Result<(), StoreError> {
        let path = self.history_path(addr);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn history_path(&self, addr: SocketAddr) -> PathBuf {
        let safe = addr.to_string().replace('.', "_").replace(':', "-");
        self.root
            .join(HISTORY_DIR)
            .join(format!("history_{safe}.json"))
    }

    // ── JSON plumbing ────────────────────────────────────────────

    fn load_json<T>(&self, path: impl AsRef<Path>) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let path = path.as_ref();
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: path.to_owned(),
            source,
        })
    }

    fn save_json<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(value).map_err(StoreError::Encode)?;
        fs::write(path, data)?;
        Ok(())
    }
}
