//! The session state machine.
//!
//! `SessionManager` owns the in-memory [`Session`], the durable
//! [`SessionStore`] and the writer side of the [`Authenticator`]. Every
//! lifecycle operation funnels its state change through one synchronous
//! commit step so that the session, the store and the outbound header never
//! disagree.
//!
//! Ordering rules:
//! - `restore()` loads the stored session once; every mutating operation
//!   waits for that load first. Identity verification runs afterwards in the
//!   background and never holds up a mutator.
//! - Each commit bumps `Session::generation`; each sign-out also bumps
//!   `Session::teardowns`. A refresh drops its result if anything committed
//!   since it started. A sign-in drops its result only if a sign-out happened
//!   since it started, so a logout is always the final write.
//! - Credentials issued for a dropped result are revoked on a best-effort basis.
//! - Concurrent refreshes share one in-flight task.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use super::{AuthError, Session, SessionStore, SessionUser, StoredCredentials};
use crate::api::{ApiClient, ApiError, Authenticator, IdentityApi, IdentityClient};
use crate::models::{AuthPayload, User};

type SharedRefresh = Shared<BoxFuture<'static, Result<(), AuthError>>>;
type SharedVerification = Shared<BoxFuture<'static, ()>>;

struct Inner {
    identity: Arc<dyn IdentityApi>,
    store: Arc<dyn SessionStore>,
    client: ApiClient,
    state: watch::Sender<Session>,
    restored: OnceCell<()>,
    verification: Mutex<Option<SharedVerification>>,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
}

/// Process-wide session state machine. Clone is cheap; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build a manager around an explicit identity backend.
    /// The manager becomes the only writer of `client`'s authenticator.
    pub fn new(identity: Arc<dyn IdentityApi>, store: Arc<dyn SessionStore>, client: ApiClient) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                client,
                state,
                restored: OnceCell::new(),
                verification: Mutex::new(None),
                refresh_in_flight: Mutex::new(None),
            }),
        }
    }

    /// Build a manager that talks to the Identity API through `client`
    pub fn connect(client: ApiClient, store: Arc<dyn SessionStore>) -> Self {
        let identity = Arc::new(IdentityClient::new(client.clone()));
        Self::new(identity, store, client)
    }

    // =========================================================================
    // Derived state
    // =========================================================================

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.borrow().is_ready()
    }

    /// Read-only handle to the outbound header slot
    pub fn authenticator(&self) -> &Authenticator {
        self.inner.client.authenticator()
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Load persisted credentials. Runs at most once per manager; later calls
    /// wait for the first to finish.
    ///
    /// Returns as soon as the stored session is installed and `ready` is set.
    /// Confirming who owns a restored credential happens in the background;
    /// see [`SessionManager::verification`].
    pub async fn restore(&self) {
        self.inner.restored.get_or_init(|| self.run_restore()).await;
    }

    async fn run_restore(&self) {
        self.inner.state.send_modify(|s| s.restoring = true);

        let stored = match self.inner.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session, starting signed out");
                self.inner.state.send_modify(|s| s.storage_degraded = true);
                None
            }
        };

        let installed = match stored {
            Some(credentials) => self.resume(credentials),
            None => {
                debug!("No stored session found");
                None
            }
        };

        self.inner.state.send_modify(|s| {
            s.restoring = false;
            s.ready = true;
        });
        info!(authenticated = self.is_authenticated(), "Session restore complete");

        if let Some(generation) = installed {
            self.start_verification(generation);
        }
    }

    /// Install restored credentials optimistically. Returns the generation
    /// they were committed at, or `None` if they were unusable.
    fn resume(&self, credentials: StoredCredentials) -> Option<u64> {
        let header = match Authenticator::bearer_value(&credentials.access_credential) {
            Ok(header) => header,
            Err(_) => {
                warn!("Stored access credential is not usable, discarding it");
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear unusable stored session");
                }
                return None;
            }
        };

        let auth = self.authenticator();
        let mut generation = 0;
        self.inner.state.send_modify(|s| {
            auth.install(header);
            s.access_credential = Some(credentials.access_credential);
            s.refresh_credential = credentials.refresh_credential;
            s.user = Some(SessionUser::Unverified);
            s.generation += 1;
            generation = s.generation;
        });
        debug!("Restored credentials installed");
        Some(generation)
    }

    fn start_verification(&self, generation: u64) {
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.verify_restored(generation).await });
        let shared = async move {
            if let Err(e) = task.await {
                warn!(error = %e, "Identity verification task failed");
            }
        }
        .boxed()
        .shared();
        *self
            .inner
            .verification
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shared);
    }

    /// Wait for the background identity check of a restored session, if one
    /// was started. Mostly useful to front ends that want to show the
    /// confirmed user before rendering, and to tests.
    pub async fn verification(&self) {
        self.restore().await;
        let pending = self
            .inner
            .verification
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(pending) = pending {
            pending.await;
        }
    }

    async fn verify_restored(&self, generation: u64) {
        debug!("Verifying restored identity");
        match self.inner.identity.whoami().await {
            Ok(user) => self.verify(generation, user),
            Err(ApiError::Unauthorized) => {
                // A sign-in or sign-out since restore owns the session now
                let current = self.inner.state.borrow().generation;
                if current != generation {
                    return;
                }
                debug!("Restored access credential rejected, refreshing");
                if self.shared_refresh().await.is_ok() {
                    let generation = self.inner.state.borrow().generation;
                    match self.inner.identity.whoami().await {
                        Ok(user) => self.verify(generation, user),
                        Err(e) => debug!(error = %e, "Identity still unverified after refresh"),
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Identity verification unavailable, keeping optimistic session");
            }
        }
    }

    fn verify(&self, generation: u64, user: User) {
        let applied = self.inner.state.send_if_modified(|s| {
            if s.generation != generation || s.access_credential.is_none() {
                return false;
            }
            s.user = Some(SessionUser::Verified(user));
            true
        });
        if applied {
            debug!("Restored identity verified");
        }
    }

    // =========================================================================
    // Sign-in
    // =========================================================================

    /// Sign in with an identifier (username or email) and secret.
    ///
    /// On failure the session is left as it was apart from `last_error`, and
    /// the error is returned for the caller to display.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<User, AuthError> {
        self.restore().await;
        let teardowns = self.begin_attempt();
        let result = self
            .inner
            .identity
            .login(identifier, secret)
            .await
            .map_err(AuthError::from_sign_in);
        self.finish_sign_in(teardowns, result, "login").await
    }

    /// Create an account; success establishes a session exactly like `login`.
    pub async fn register(&self, username: &str, email: &str, secret: &str) -> Result<User, AuthError> {
        self.restore().await;
        let teardowns = self.begin_attempt();
        let result = self
            .inner
            .identity
            .register(username, email, secret)
            .await
            .map_err(AuthError::from_sign_in);
        self.finish_sign_in(teardowns, result, "register").await
    }

    /// Clear any previous error and return the sign-out count the attempt starts from
    fn begin_attempt(&self) -> u64 {
        let mut teardowns = 0;
        self.inner.state.send_if_modified(|s| {
            teardowns = s.teardowns;
            s.last_error.take().is_some()
        });
        teardowns
    }

    async fn finish_sign_in(
        &self,
        teardowns: u64,
        result: Result<AuthPayload, AuthError>,
        operation: &'static str,
    ) -> Result<User, AuthError> {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!(operation, error = %e, "Sign-in failed");
                self.record_error(teardowns, &e);
                return Err(e);
            }
        };

        let issued = payload.access_credential.clone();
        match self.establish(teardowns, payload) {
            Ok(user) => {
                info!(operation, user = user.display_name(), "Signed in");
                Ok(user)
            }
            Err(AuthError::Superseded) => {
                debug!(operation, "Sign-in result discarded, signed out meanwhile");
                self.remote_logout(Some(issued)).await;
                Err(AuthError::Superseded)
            }
            Err(e) => {
                warn!(operation, error = %e, "Sign-in failed");
                self.record_error(teardowns, &e);
                Err(e)
            }
        }
    }

    fn establish(&self, teardowns: u64, payload: AuthPayload) -> Result<User, AuthError> {
        let header = Authenticator::bearer_value(&payload.access_credential).map_err(|_| {
            AuthError::MalformedResponse("access credential cannot be sent as a header".to_string())
        })?;
        let credentials = StoredCredentials {
            refresh_credential: Some(payload.effective_refresh_credential()),
            access_credential: payload.access_credential,
        };
        let user = payload.user;

        let store = &self.inner.store;
        let auth = self.authenticator();
        let session_user = user.clone();
        let applied = self.inner.state.send_if_modified(|s| {
            if s.teardowns != teardowns {
                return false;
            }
            s.storage_degraded = Self::persist(store.as_ref(), &credentials);
            auth.install(header);
            s.user = Some(SessionUser::Verified(session_user));
            s.access_credential = Some(credentials.access_credential);
            s.refresh_credential = credentials.refresh_credential;
            s.last_error = None;
            s.refreshing = false;
            s.generation += 1;
            true
        });

        if applied {
            Ok(user)
        } else {
            Err(AuthError::Superseded)
        }
    }

    /// Write credentials, reporting whether the store is degraded afterwards
    fn persist(store: &dyn SessionStore, credentials: &StoredCredentials) -> bool {
        match store.save(credentials) {
            Ok(()) => false,
            Err(e) => {
                warn!(error = %e, "Failed to persist session, continuing in memory only");
                true
            }
        }
    }

    fn record_error(&self, teardowns: u64, err: &AuthError) {
        self.inner.state.send_if_modified(|s| {
            if s.teardowns != teardowns {
                return false;
            }
            s.last_error = Some(err.clone());
            true
        });
    }

    // =========================================================================
    // Sign-out
    // =========================================================================

    /// End the session. Local teardown always happens first and never waits on
    /// the network; the remote logout is best-effort. Safe to call repeatedly.
    pub async fn logout(&self) {
        self.restore().await;
        let previous = self.teardown(None, None);
        self.remote_logout(previous.flatten()).await;
        info!("Signed out");
    }

    /// Clear user, credentials, store and header in one step.
    ///
    /// With `expected` set, only tears down if no other commit happened since
    /// that generation. Returns `None` when skipped, otherwise the access
    /// credential that was held.
    fn teardown(&self, expected: Option<u64>, error: Option<AuthError>) -> Option<Option<String>> {
        let store = &self.inner.store;
        let auth = self.authenticator();
        let mut previous = None;
        let applied = self.inner.state.send_if_modified(|s| {
            if expected.is_some_and(|g| g != s.generation) {
                return false;
            }
            previous = s.access_credential.take();
            auth.clear();
            s.storage_degraded = match store.clear() {
                Ok(()) => false,
                Err(e) => {
                    warn!(error = %e, "Failed to remove stored session");
                    true
                }
            };
            s.reset_credentials();
            s.last_error = error;
            s.generation += 1;
            s.teardowns += 1;
            true
        });
        applied.then_some(previous)
    }

    async fn remote_logout(&self, credential: Option<String>) {
        let Some(credential) = credential else {
            return;
        };
        if let Err(e) = self.inner.identity.logout(&credential).await {
            warn!(error = %e, "Remote logout failed, local session already cleared");
        }
    }

    /// Tear down after an unrecoverable failure, unless the session already
    /// moved on. Returns whether the teardown happened.
    async fn expire(&self, generation: u64, err: AuthError) -> bool {
        match self.teardown(Some(generation), Some(err)) {
            Some(previous) => {
                self.remote_logout(previous).await;
                true
            }
            None => {
                debug!("Session changed since the failure, keeping it");
                false
            }
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Swap the refresh credential for a new credential pair.
    ///
    /// Concurrent callers share a single network refresh. Any failure ends the
    /// session; the error is returned so callers can stop retrying, but the
    /// session is already resolved to signed out. `Superseded` means the
    /// session was replaced or ended while the refresh was in flight and the
    /// refresh changed nothing.
    pub async fn refresh_access_token(&self) -> Result<(), AuthError> {
        self.restore().await;
        self.shared_refresh().await
    }

    fn shared_refresh(&self) -> SharedRefresh {
        let mut slot = self
            .inner
            .refresh_in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = slot.as_ref() {
            debug!("Joining in-flight refresh");
            return in_flight.clone();
        }

        // Runs as its own task so dropping every caller cannot abandon it half-way
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let result = manager.run_refresh().await;
            manager
                .inner
                .refresh_in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            result
        });
        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(AuthError::NetworkFailure(format!("refresh task failed: {}", e))))
        }
        .boxed()
        .shared();
        *slot = Some(shared.clone());
        shared
    }

    async fn run_refresh(&self) -> Result<(), AuthError> {
        let mut generation = 0;
        let mut refresh_credential = None;
        self.inner.state.send_if_modified(|s| {
            generation = s.generation;
            refresh_credential = s.refresh_credential.clone();
            if refresh_credential.is_some() {
                s.refreshing = true;
            }
            refresh_credential.is_some()
        });

        let Some(refresh_credential) = refresh_credential else {
            warn!("Refresh requested without a refresh credential, signing out");
            return self.fail_refresh(generation, AuthError::NoRefreshCredential).await;
        };

        debug!("Refreshing access credential");
        let payload = match self.inner.identity.refresh(&refresh_credential).await {
            Ok(payload) => payload,
            Err(e) => {
                let err = AuthError::from_refresh(e);
                warn!(error = %err, "Refresh failed, signing out");
                return self.fail_refresh(generation, err).await;
            }
        };

        let header = match Authenticator::bearer_value(&payload.access_credential) {
            Ok(header) => header,
            Err(_) => {
                let err = AuthError::RefreshRejected("access credential cannot be sent as a header".to_string());
                warn!(error = %err, "Refresh returned an unusable credential, signing out");
                return self.fail_refresh(generation, err).await;
            }
        };

        let issued = payload.access_credential.clone();
        let credentials = StoredCredentials {
            access_credential: payload.access_credential,
            refresh_credential: Some(payload.refresh_credential),
        };
        let store = &self.inner.store;
        let auth = self.authenticator();
        let applied = self.inner.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.storage_degraded = Self::persist(store.as_ref(), &credentials);
            auth.install(header);
            s.access_credential = Some(credentials.access_credential);
            s.refresh_credential = credentials.refresh_credential;
            s.last_error = None;
            s.refreshing = false;
            s.generation += 1;
            true
        });

        if applied {
            info!("Access credential refreshed");
            Ok(())
        } else {
            debug!("Refresh result discarded, session changed meanwhile");
            self.remote_logout(Some(issued)).await;
            Err(AuthError::Superseded)
        }
    }

    async fn fail_refresh(&self, generation: u64, err: AuthError) -> Result<(), AuthError> {
        if self.expire(generation, err.clone()).await {
            Err(err)
        } else {
            Err(AuthError::Superseded)
        }
    }

    // =========================================================================
    // Authenticated requests
    // =========================================================================

    /// GET a JSON resource with the session's credential. A 401 on a signed-in
    /// session triggers one (coalesced) refresh and a single retry.
    pub async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.restore().await;
        match self.inner.client.get_json(path).await {
            Err(ApiError::Unauthorized) if self.is_authenticated() => {
                debug!(path = path, "Request unauthorized, refreshing credential");
                let refreshed = self.shared_refresh().await;
                if !retry_after_refresh(&refreshed, self.is_authenticated()) {
                    return Err(ApiError::Unauthorized);
                }
                self.inner.client.get_json(path).await
            }
            other => other,
        }
    }
}

/// A superseded refresh means another commit (usually a fresh sign-in)
/// already installed a new credential, so the request is still worth one retry.
fn retry_after_refresh(refreshed: &Result<(), AuthError>, authenticated: bool) -> bool {
    match refreshed {
        Ok(()) => true,
        Err(AuthError::Superseded) => authenticated,
        Err(_) => false,
    }
}
