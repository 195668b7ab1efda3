//! Identity records and the Identity API wire payloads.
//!
//! The remote API speaks camelCase JSON; credentials are opaque strings.

use serde::{Deserialize, Serialize};

/// Identity of the signed-in user as reported by the Identity API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl User {
    /// Name to show in status lines
    pub fn display_name(&self) -> &str {
        if self.username.is_empty() {
            &self.email
        } else {
            &self.username
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_credential: &'a str,
}

/// Body of a successful `/auth/login` or `/auth/register`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    pub access_credential: String,
    #[serde(default)]
    pub refresh_credential: Option<String>,
}

impl AuthPayload {
    /// The refresh credential to hold; falls back to the access credential
    /// when the backend does not issue a distinct one.
    pub fn effective_refresh_credential(&self) -> String {
        self.refresh_credential
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.access_credential.clone())
    }
}

/// Body of a successful `/auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub access_credential: String,
    pub refresh_credential: String,
}

/// Body of a successful `/auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmIPayload {
    pub user: User,
}

/// Error body returned by the Identity API on 4xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
