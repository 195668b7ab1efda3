//! The shared `Authorization` header slot applied to every outbound request.
//!
//! Only the session core installs or clears the slot; everything else reads
//! whatever credential is currently installed.

use std::sync::{Arc, PoisonError, RwLock};

use reqwest::header::{self, HeaderValue, InvalidHeaderValue};
use reqwest::RequestBuilder;

/// Cloneable handle to the single bearer-credential slot.
/// Clones share the slot, so a header installed through one handle is seen by all.
#[derive(Clone, Default)]
pub struct Authenticator {
    slot: Arc<RwLock<Option<HeaderValue>>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the header value for a credential without installing it.
    /// Lets callers reject an unusable credential before committing any state.
    pub(crate) fn bearer_value(credential: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential))?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub(crate) fn install(&self, value: HeaderValue) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub(crate) fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Currently installed `Authorization` header value, if any
    pub fn header(&self) -> Option<HeaderValue> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The installed credential without the `Bearer ` prefix
    pub fn bearer(&self) -> Option<String> {
        let value = self.header()?;
        let text = value.to_str().ok()?;
        text.strip_prefix("Bearer ").map(str::to_string)
    }

    pub fn is_installed(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Attach the installed header (if any) to an outbound request
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self.header() {
            Some(value) => request.header(header::AUTHORIZATION, value),
            None => request,
        }
    }
}
