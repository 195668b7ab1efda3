//! Test doubles for the Identity API and credential storage.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{SessionStore, StoreError, StoredCredentials};
use crate::api::{ApiError, IdentityApi};
use crate::models::{AuthPayload, RefreshPayload, User};

pub(crate) const GOOD_SECRET: &str = "hunter2";

pub(crate) fn alice() -> User {
    User {
        id: "u-alice".into(),
        username: "alice".into(),
        email: "alice@example.com".into(),
    }
}

#[derive(Clone, Copy)]
pub(crate) enum RefreshBehavior {
    Rotate,
    Reject,
    Offline,
}

#[derive(Clone, Copy)]
pub(crate) enum WhoAmIBehavior {
    Alice,
    /// First call answers 401, later calls succeed
    RejectFirst,
    Offline,
}

fn offline() -> ApiError {
    ApiError::ServerError("connection refused".into())
}

pub(crate) struct MockIdentity {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub whoami_calls: AtomicUsize,
    refresh: RefreshBehavior,
    whoami: WhoAmIBehavior,
    issue_refresh_credential: bool,
    fail_logout: bool,
    login_gate: Option<Arc<Notify>>,
    refresh_gate: Option<Arc<Notify>>,
    whoami_gate: Option<Arc<Notify>>,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            whoami_calls: AtomicUsize::new(0),
            refresh: RefreshBehavior::Rotate,
            whoami: WhoAmIBehavior::Alice,
            issue_refresh_credential: true,
            fail_logout: false,
            login_gate: None,
            refresh_gate: None,
            whoami_gate: None,
        }
    }

    pub fn with_refresh(mut self, behavior: RefreshBehavior) -> Self {
        self.refresh = behavior;
        self
    }

    pub fn with_whoami(mut self, behavior: WhoAmIBehavior) -> Self {
        self.whoami = behavior;
        self
    }

    pub fn without_refresh_credential(mut self) -> Self {
        self.issue_refresh_credential = false;
        self
    }

    pub fn with_failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    /// Hold every login response until `release_login` is called
    pub fn with_login_gate(mut self) -> Self {
        self.login_gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release_login(&self) {
        if let Some(ref gate) = self.login_gate {
            gate.notify_one();
        }
    }

    /// Hold every refresh response until `release_refresh` is called
    pub fn with_refresh_gate(mut self) -> Self {
        self.refresh_gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release_refresh(&self) {
        if let Some(ref gate) = self.refresh_gate {
            gate.notify_one();
        }
    }

    /// Hold every `/auth/me` response until `release_whoami` is called
    pub fn with_whoami_gate(mut self) -> Self {
        self.whoami_gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release_whoami(&self) {
        if let Some(ref gate) = self.whoami_gate {
            gate.notify_one();
        }
    }

    /// Yield until a refresh request has reached the server
    pub async fn refresh_started(&self) {
        while self.refresh_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    fn payload(&self, user: User, access: &str, refresh: &str) -> AuthPayload {
        AuthPayload {
            user,
            access_credential: access.to_string(),
            refresh_credential: self.issue_refresh_credential.then(|| refresh.to_string()),
        }
    }
}

#[async_trait]
impl IdentityApi for MockIdentity {
    async fn login(&self, identifier: &str, secret: &str) -> Result<AuthPayload, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.login_gate {
            gate.notified().await;
        }
        if identifier == "alice" && secret == GOOD_SECRET {
            Ok(self.payload(alice(), "tok-login", "ref-login"))
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    async fn register(&self, username: &str, email: &str, _secret: &str) -> Result<AuthPayload, ApiError> {
        if username == "alice" {
            return Err(ApiError::Rejected("Username already taken".into()));
        }
        let user = User {
            id: format!("u-{}", username),
            username: username.to_string(),
            email: email.to_string(),
        };
        Ok(self.payload(user, "tok-register", "ref-register"))
    }

    async fn refresh(&self, _refresh_credential: &str) -> Result<RefreshPayload, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.refresh_gate {
            Some(ref gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        match self.refresh {
            RefreshBehavior::Rotate => Ok(RefreshPayload {
                access_credential: format!("tok-r{}", n),
                refresh_credential: format!("ref-r{}", n),
            }),
            RefreshBehavior::Reject => Err(ApiError::Unauthorized),
            RefreshBehavior::Offline => Err(offline()),
        }
    }

    async fn logout(&self, _access_credential: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout {
            Err(offline())
        } else {
            Ok(())
        }
    }

    async fn whoami(&self) -> Result<User, ApiError> {
        let n = self.whoami_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.whoami_gate {
            gate.notified().await;
        }
        match self.whoami {
            WhoAmIBehavior::Alice => Ok(alice()),
            WhoAmIBehavior::RejectFirst if n == 0 => Err(ApiError::Unauthorized),
            WhoAmIBehavior::RejectFirst => Ok(alice()),
            WhoAmIBehavior::Offline => Err(ApiError::NotFound("/auth/me".into())),
        }
    }
}

/// Store whose every operation fails, standing in for a locked keychain.
pub(crate) struct FailingStore;

impl FailingStore {
    fn unavailable() -> StoreError {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "keychain locked"))
    }
}

impl SessionStore for FailingStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        Err(Self::unavailable())
    }

    fn save(&self, _credentials: &StoredCredentials) -> Result<(), StoreError> {
        Err(Self::unavailable())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Err(Self::unavailable())
    }
}

/// In-memory store that fails while `broken` is set, like a keychain that
/// is locked and later unlocked.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub broken: AtomicBool,
    inner: super::MemoryStore,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(FailingStore::unavailable())
        } else {
            Ok(())
        }
    }

    pub fn snapshot(&self) -> Option<StoredCredentials> {
        self.inner.snapshot()
    }
}

impl SessionStore for FlakyStore {
    fn load(&self) -> Result<Option<StoredCredentials>, StoreError> {
        self.check()?;
        self.inner.load()
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save(credentials)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.clear()
    }
}
