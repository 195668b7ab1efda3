use crate::models::User;

use super::AuthError;

/// Who the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUser {
    /// Identity confirmed by the Identity API (login, register or `/auth/me`)
    Verified(User),
    /// A credential was restored but its owner could not be confirmed.
    /// No identity record is made up for it.
    Unverified,
}

impl SessionUser {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionUser::Verified(user) => Some(user),
            SessionUser::Unverified => None,
        }
    }
}

/// Coarse lifecycle phase, derived from the session fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Restoring,
    Authenticated,
    Refreshing,
    Unauthenticated,
}

/// Snapshot of the in-memory session.
///
/// Fields are only written by the session manager; readers get clones
/// through the manager or a watch subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub(crate) user: Option<SessionUser>,
    pub(crate) access_credential: Option<String>,
    pub(crate) refresh_credential: Option<String>,
    pub(crate) last_error: Option<AuthError>,
    pub(crate) ready: bool,
    pub(crate) restoring: bool,
    pub(crate) refreshing: bool,
    pub(crate) storage_degraded: bool,
    pub(crate) generation: u64,
    pub(crate) teardowns: u64,
}

impl Session {
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn access_credential(&self) -> Option<&str> {
        self.access_credential.as_deref()
    }

    pub fn refresh_credential(&self) -> Option<&str> {
        self.refresh_credential.as_deref()
    }

    pub fn last_error(&self) -> Option<&AuthError> {
        self.last_error.as_ref()
    }

    /// True once the startup restore attempt has finished
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// True when credentials could not be persisted and the session lives in memory only
    pub fn is_storage_degraded(&self) -> bool {
        self.storage_degraded
    }

    /// Number of committed mutations so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of sign-outs (explicit or forced) so far
    pub fn teardowns(&self) -> u64 {
        self.teardowns
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_credential.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.ready {
            if self.restoring {
                SessionPhase::Restoring
            } else {
                SessionPhase::Uninitialized
            }
        } else if self.refreshing {
            SessionPhase::Refreshing
        } else if self.is_authenticated() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }

    /// Drop user and credentials. Readiness, storage health and the
    /// counters are process-level and survive.
    pub(crate) fn reset_credentials(&mut self) {
        self.user = None;
        self.access_credential = None;
        self.refresh_credential = None;
        self.last_error = None;
        self.refreshing = false;
    }
}
