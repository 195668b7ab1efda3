//! Durable storage for session credentials.
//!
//! Two slots, `accessCredential` and `refreshCredential`, written together on
//! every successful login/register/refresh and removed together on logout.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StoreError;

/// Keychain service name for brewpass credentials
const SERVICE_NAME: &str = "brewpass";

pub const ACCESS_CREDENTIAL_KEY: &str = "accessCredential";
pub const REFRESH_CREDENTIAL_KEY: &str = "refreshCredential";

/// The credential pair as held in durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub access_credential: String,
    #[serde(default)]
    pub refresh_credential: Option<String>,
}

/// Persistent key/value storage for the session credentials. Pure storage, no logic.
pub trait SessionStore: Send + Sync {
    /// Read both slots. `Ok(None)` when no access credential is stored.
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError>;

    /// Write both slots as one unit
    fn save(&self, credentials: &StoredCredentials) -> Result<(), StoreError>;

    /// Remove both slots. Removing absent entries is not an error.
    fn clear(&self) -> Result<(), StoreError>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credentials in the OS keychain, one entry per slot.
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key)?)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        let Some(access_credential) = self.read(ACCESS_CREDENTIAL_KEY)? else {
            return Ok(None);
        };
        let refresh_credential = self.read(REFRESH_CREDENTIAL_KEY)?;
        Ok(Some(StoredCredentials {
            access_credential,
            refresh_credential,
        }))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        self.entry(ACCESS_CREDENTIAL_KEY)?
            .set_password(&credentials.access_credential)?;

        let refresh_result = match credentials.refresh_credential {
            Some(ref refresh) => self
                .entry(REFRESH_CREDENTIAL_KEY)
                .and_then(|e| e.set_password(refresh).map_err(StoreError::from)),
            None => self.remove(REFRESH_CREDENTIAL_KEY),
        };

        // Never leave a new access credential beside a stale refresh credential
        undo_on_error(refresh_result, || self.remove(ACCESS_CREDENTIAL_KEY))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let access = self.remove(ACCESS_CREDENTIAL_KEY);
        let refresh = self.remove(REFRESH_CREDENTIAL_KEY);
        access.and(refresh)
    }
}

/// Run `undo` when `result` failed, keeping the original error.
/// A failed undo is logged since it leaves the entries half-written.
fn undo_on_error<F>(result: Result<(), StoreError>, undo: F) -> Result<(), StoreError>
where
    F: FnOnce() -> Result<(), StoreError>,
{
    let err = match result {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if let Err(undo_err) = undo() {
        warn!(error = %undo_err, "Failed to roll back partial keychain write");
    }
    Err(err)
}

// ============================================================================
// JSON file
// ============================================================================

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    #[serde(flatten)]
    credentials: StoredCredentials,
    saved_at: DateTime<Utc>,
}

/// Credentials in a single JSON file, replaced atomically on save.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `session.json` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let file: SessionFile = serde_json::from_str(&contents)?;
        debug!(saved_at = %file.saved_at, "Session file loaded");
        if file.credentials.access_credential.is_empty() {
            return Ok(None);
        }
        Ok(Some(file.credentials))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SessionFile {
            credentials: credentials.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<StoredCredentials>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with credentials, as if written by a previous run
    pub fn with_credentials(access: &str, refresh: Option<&str>) -> Self {
        Self {
            slot: Mutex::new(Some(StoredCredentials {
                access_credential: access.to_string(),
                refresh_credential: refresh.map(str::to_string),
            })),
        }
    }

    pub fn snapshot(&self) -> Option<StoredCredentials> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
