//! Single-file JSON document store.
//!
//! All persisted state lives in one [`Document`]. Every operation loads the
//! whole document from disk and, for mutations, writes the whole document
//! back, all inside one critical section of the store's lock.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::models::{Account, Post};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Last ids handed out, so deleting the newest record never frees its id.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sequences {
    #[serde(default)]
    pub posts: u64,
    #[serde(default)]
    pub accounts: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Document {
    pub posts: BTreeMap<u64, Post>,
    pub accounts: BTreeMap<u64, Account>,
    pub account_ids_by_email: BTreeMap<String, u64>,
    pub revoked_tokens: BTreeMap<String, String>,
    pub sequences: Sequences,
}

impl Document {
    pub fn next_post_id(&mut self) -> u64 {
        let last = last_key(&self.posts).max(self.sequences.posts);
        self.sequences.posts = last + 1;
        self.sequences.posts
    }

    pub fn next_account_id(&mut self) -> u64 {
        let last = last_key(&self.accounts).max(self.sequences.accounts);
        self.sequences.accounts = last + 1;
        self.sequences.accounts
    }
}

fn last_key<V>(map: &BTreeMap<u64, V>) -> u64 {
    map.keys().next_back().copied().unwrap_or(0)
}

/// Handle to the backing file.
///
/// Readers share the lock, writers hold it exclusively. The lock is
/// in-process only: two processes pointing at the same file are not
/// coordinated.
#[derive(Debug)]
pub struct Db {
    path: PathBuf,
    lock: RwLock<()>,
}

impl Db {
    /// Opens the store at `path`, creating an empty document if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Db {
            path,
            lock: RwLock::new(()),
        };
        db.ensure()?;
        Ok(db)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> StoreResult<Document> {
        let _guard = self.lock.read();
        self.read_file()
    }

    pub fn replace(&self, document: &Document) -> StoreResult<()> {
        let _guard = self.lock.write();
        self.write_file(document)
    }

    /// Runs `f` against a freshly loaded document under the shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> StoreResult<R> {
        let _guard = self.lock.read();
        let document = self.read_file()?;
        Ok(f(&document))
    }

    /// Load, mutate and write back as one exclusive critical section.
    ///
    /// The document is written only when `f` succeeds; an error from `f`
    /// leaves the file untouched.
    pub fn update<R, E>(&self, f: impl FnOnce(&mut Document) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let _guard = self.lock.write();
        let mut document = self.read_file()?;
        let result = f(&mut document)?;
        self.write_file(&document)?;
        Ok(result)
    }

    /// Discards the backing file and starts over with an empty document.
    ///
    /// Must not run while other operations are in flight.
    pub fn reset(&self) -> StoreResult<()> {
        let _guard = self.lock.write();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(path = %self.path.display(), "database reset");
        self.write_file(&Document::default())
    }

    fn ensure(&self) -> StoreResult<()> {
        let _guard = self.lock.write();
        if self.path.exists() {
            return Ok(());
        }
        tracing::info!(path = %self.path.display(), "creating empty database");
        self.write_file(&Document::default())
    }

    fn read_file(&self) -> StoreResult<Document> {
        let data = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_file(&self, document: &Document) -> StoreResult<()> {
        let data = serde_json::to_vec(document)?;
        let tmp_path = self.tmp_path();

        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
