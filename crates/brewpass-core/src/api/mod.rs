//! HTTP layer for the brewpass backend.
//!
//! This module provides the shared `ApiClient`, the `Authenticator` that
//! carries the bearer credential on every outbound request, and the
//! `IdentityApi` used by the session core to talk to `/auth/*`.

pub mod authenticator;
pub mod client;
pub mod error;
pub mod identity;

pub use authenticator::Authenticator;
pub use client::ApiClient;
pub use error::ApiError;
pub use identity::{IdentityApi, IdentityClient};
