//! brewpass-core - session core for the brewpass beer-discovery app.
//!
//! Establishes, persists, refreshes and tears down the user's authenticated
//! session, carries its bearer credential on outbound requests, and decides
//! per navigation whether protected views may render.

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod models;

pub use api::{ApiClient, ApiError, Authenticator, IdentityApi, IdentityClient};
pub use auth::{AuthError, Session, SessionManager, SessionPhase, SessionStore, SessionUser};
pub use config::Config;
pub use guard::{GuardDecision, GuardWatch, Redirect, RouteGuard};
pub use models::User;
