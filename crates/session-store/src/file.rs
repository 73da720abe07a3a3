//! JSON file backend for `KeyValueStore`
//!
//! The file holds a flat JSON object of string keys to string values. All
//! writes go through `write_atomic` (staging file + rename) so a crash
//! mid-write never leaves a truncated file behind. A tokio Mutex serializes
//! writers; the in-memory map is the read path, so reads never touch the disk.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{KeyValueStore, StoreFuture};

pub struct FileStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Load the store from `path`.
    ///
    /// A missing file is created as `{}` so the next start takes the normal path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "loaded session store");
            entries
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to the in-memory map and persist the result.
    ///
    /// The map is only replaced once the file write succeeded, so a failed
    /// write leaves both the file and the in-memory view unchanged.
    async fn commit<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        mutate(&mut next);
        if next == *state {
            return Ok(());
        }
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.commit(|entries| {
                entries.insert(key.to_string(), value);
            })
            .await
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.commit(|entries| {
                for key in keys {
                    entries.remove(*key);
                }
            })
            .await
        })
    }

    fn set_many<'a>(&'a self, pairs: Vec<(&'a str, String)>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.commit(|entries| {
                for (key, value) in pairs {
                    entries.insert(key.to_string(), value);
                }
            })
            .await
        })
    }
}

/// Replace the file at `path` with `entries`.
///
/// The bytes land in a sibling staging file, created owner-only and synced,
/// which is then renamed over `path`. Readers see the old or the new map,
/// never a partial one.
async fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(entries)
        .map_err(|e| Error::Parse(format!("encoding session map: {e}")))?;
    let staging = staging_path(path);

    let mut file = open_private(&staging)
        .await
        .map_err(|e| Error::Io(format!("opening {}: {e}", staging.display())))?;
    file.write_all(&encoded)
        .await
        .map_err(|e| Error::Io(format!("writing {}: {e}", staging.display())))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Io(format!("syncing {}: {e}", staging.display())))?;
    drop(file);

    tokio::fs::rename(&staging, path)
        .await
        .map_err(|e| Error::Io(format!("replacing {}: {e}", path.display())))?;

    debug!(path = %path.display(), keys = entries.len(), "persisted session store");
    Ok(())
}

/// `session.json` stages as `session.json.<pid>.tmp` in the same directory,
/// so the final rename never crosses filesystems.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("session"));
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

async fn open_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}
