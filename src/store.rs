//! Local persistence - whole-blob JSON files under one data directory.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::desk::DeskSnapshot;

pub const CURRENT_USER_KEY: &str = "current_user_id_v1";
pub const ACCOUNTS_KEY: &str = "accounts_v1";
pub const WALLETS_KEY: &str = "wallets_v1";
pub const REQUESTS_KEY: &str = "requests_v1";

/// Blob format version written into every envelope
pub const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Store opened at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// `Ok(None)` when the blob has never been written.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match fs::read_to_string(self.path(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<T> = serde_json::from_str(&raw)?;
        if envelope.version != STORE_VERSION {
            return Err(Error::InvalidState(format!(
                "{} has version {}, expected {}",
                key, envelope.version, STORE_VERSION
            )));
        }
        Ok(Some(envelope.data))
    }

    /// Missing or unreadable blobs come back as `T::default()`.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.read(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!("Discarding unreadable {}: {}", key, e);
                T::default()
            }
        }
    }

    /// Replace the whole blob. Readers see either the old or the new file.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(&Envelope { version: STORE_VERSION, data: value })?;
        let target = self.path(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &target)?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_desk(&self) -> DeskSnapshot {
        DeskSnapshot {
            requests: self.load_or_default(REQUESTS_KEY),
            ledger: self.load_or_default(WALLETS_KEY),
        }
    }

    pub fn save_desk(&self, snapshot: &DeskSnapshot) -> Result<()> {
        self.write(WALLETS_KEY, &snapshot.ledger)?;
        self.write(REQUESTS_KEY, &snapshot.requests)
    }
}
