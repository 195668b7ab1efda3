//! The remote Identity API: login, register, refresh, logout and "who am I".

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{ApiClient, ApiError};
use crate::models::{
    AuthPayload, LoginRequest, RefreshPayload, RefreshRequest, RegisterRequest, User, WhoAmIPayload,
};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const WHOAMI_PATH: &str = "/auth/me";

/// Remote logout is best-effort; never wait on it longer than this.
const LOGOUT_TIMEOUT_SECS: u64 = 5;

/// Stateless operations against the remote identity service.
///
/// Implementations return normalized payloads or an [`ApiError`]; mapping to
/// session-level failures is the session manager's job.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn login(&self, identifier: &str, secret: &str) -> Result<AuthPayload, ApiError>;

    async fn register(&self, username: &str, email: &str, secret: &str) -> Result<AuthPayload, ApiError>;

    async fn refresh(&self, refresh_credential: &str) -> Result<RefreshPayload, ApiError>;

    /// Invalidate `access_credential` on the server. The ambient header has
    /// already been cleared by the time this runs, so the credential is explicit.
    async fn logout(&self, access_credential: &str) -> Result<(), ApiError>;

    /// Resolve the identity behind the currently installed credential
    async fn whoami(&self) -> Result<User, ApiError>;
}

/// [`IdentityApi`] over HTTP, sharing the application's [`ApiClient`].
#[derive(Clone, Debug)]
pub struct IdentityClient {
    api: ApiClient,
}

impl IdentityClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Unauthenticated POST; login/register/refresh must not send a stale bearer.
    async fn post_anonymous<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = self.api.url(path);
        let response = self.api.http().post(&url).json(body).send().await?;
        let response = ApiClient::check_response(response).await?;
        ApiClient::parse_json(response, &url).await
    }
}

#[async_trait]
impl IdentityApi for IdentityClient {
    async fn login(&self, identifier: &str, secret: &str) -> Result<AuthPayload, ApiError> {
        debug!(identifier = identifier, "Sending login request");
        self.post_anonymous(LOGIN_PATH, &LoginRequest { identifier, secret })
            .await
    }

    async fn register(&self, username: &str, email: &str, secret: &str) -> Result<AuthPayload, ApiError> {
        debug!(username = username, "Sending registration request");
        self.post_anonymous(REGISTER_PATH, &RegisterRequest { username, email, secret })
            .await
    }

    async fn refresh(&self, refresh_credential: &str) -> Result<RefreshPayload, ApiError> {
        debug!("Sending refresh request");
        self.post_anonymous(REFRESH_PATH, &RefreshRequest { refresh_credential })
            .await
    }

    async fn logout(&self, access_credential: &str) -> Result<(), ApiError> {
        let url = self.api.url(LOGOUT_PATH);
        let response = self
            .api
            .http()
            .post(&url)
            .bearer_auth(access_credential)
            .json(&serde_json::json!({}))
            .timeout(Duration::from_secs(LOGOUT_TIMEOUT_SECS))
            .send()
            .await?;
        ApiClient::check_response(response).await?;
        Ok(())
    }

    async fn whoami(&self) -> Result<User, ApiError> {
        let payload: WhoAmIPayload = self.api.get_json(WHOAMI_PATH).await?;
        Ok(payload.user)
    }
}
