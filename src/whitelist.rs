//! Guild whitelist
//!
//! Guilds where the relay answers, persisted as a JSON object mapping guild
//! ID to guild name.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum WhitelistError {
    #[error("failed to read whitelist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse whitelist {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write whitelist {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("whitelist persistence task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct Whitelist {
    path: PathBuf,
    guilds: RwLock<BTreeMap<String, String>>,
    // Serializes writers so the file always reflects the latest map.
    persist_lock: tokio::sync::Mutex<()>,
}

impl Whitelist {
    /// Load from `path`. A missing file is an empty whitelist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, WhitelistError> {
        let path = path.into();
        let guilds = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                WhitelistError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(WhitelistError::Read { path, source }),
        };

        Ok(Self {
            path,
            guilds: RwLock::new(guilds),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, guild_id: &str) -> bool {
        self.guilds.read().contains_key(guild_id)
    }

    /// Snapshot of `(guild id, guild name)` pairs, ordered by ID.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.guilds
            .read()
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect()
    }

    /// Add a guild. Returns `false` if it was already listed.
    ///
    /// The in-memory list only changes once the file has been written.
    pub async fn enable(&self, guild_id: &str, guild_name: &str) -> Result<bool, WhitelistError> {
        let _guard = self.persist_lock.lock().await;
        let mut next = self.guilds.read().clone();
        let added = next
            .insert(guild_id.to_string(), guild_name.to_string())
            .is_none();
        self.commit(next).await?;
        info!(guild_id = %guild_id, guild_name = %guild_name, added, "guild whitelisted");
        Ok(added)
    }

    /// Remove a guild. Returns `false` if it was not listed.
    pub async fn disable(&self, guild_id: &str) -> Result<bool, WhitelistError> {
        let _guard = self.persist_lock.lock().await;
        let mut next = self.guilds.read().clone();
        if next.remove(guild_id).is_none() {
            return Ok(false);
        }
        self.commit(next).await?;
        info!(guild_id = %guild_id, "guild removed from whitelist");
        Ok(true)
    }

    /// Persist `next`, then make it the live list.
    async fn commit(&self, next: BTreeMap<String, String>) -> Result<(), WhitelistError> {
        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || {
            write_atomically(&path, &next).map(|()| next)
        })
        .await??;
        *self.guilds.write() = next;
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomically(path: &Path, guilds: &BTreeMap<String, String>) -> Result<(), WhitelistError> {
    let write_err = |source: std::io::Error| WhitelistError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let content = serde_json::to_vec_pretty(guilds).map_err(|e| write_err(e.into()))?;
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    file.write_all(&content).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;
    file.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
