//! Session core: state machine, credential persistence and failure taxonomy.
//!
//! This module provides:
//! - `SessionManager`: the session state machine (restore, login, register,
//!   logout, refresh)
//! - `Session`: snapshot of the in-memory session with derived state
//! - `SessionStore`: durable credential storage (keychain, file, memory)

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{FileStore, KeyringStore, MemoryStore, SessionStore, StoredCredentials};
pub use error::{AuthError, StoreError};
pub use manager::SessionManager;
pub use session::{Session, SessionPhase, SessionUser};
