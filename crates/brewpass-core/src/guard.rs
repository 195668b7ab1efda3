//! Route guarding for protected views.
//!
//! The decision is a pure function of session readiness, authentication and
//! the navigation target. [`GuardWatch`] re-evaluates it whenever the session
//! or the target changes.

use tokio::sync::watch;

use crate::auth::Session;

/// Default login entry point
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Send the user to the login entry point, remembering where they were going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    pub return_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Restore has not finished; show a neutral loading indicator and nothing else
    Loading,
    Redirect(Redirect),
    Render,
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_PATH)
    }
}

impl RouteGuard {
    pub fn new(login_path: &str) -> Self {
        Self {
            login_path: login_path.to_string(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn decide(&self, ready: bool, authenticated: bool, target: &str) -> GuardDecision {
        if !ready {
            return GuardDecision::Loading;
        }
        if authenticated || self.is_login_path(target) {
            return GuardDecision::Render;
        }
        GuardDecision::Redirect(Redirect {
            to: self.login_path.clone(),
            return_to: target.to_string(),
        })
    }

    pub fn evaluate(&self, session: &Session, target: &str) -> GuardDecision {
        self.decide(session.is_ready(), session.is_authenticated(), target)
    }

    /// Follow session changes for a navigation target
    pub fn watch(&self, session: watch::Receiver<Session>, target: &str) -> GuardWatch {
        GuardWatch::new(self.clone(), session, target)
    }

    // Query string or fragment on the login path still counts as the login page
    fn is_login_path(&self, target: &str) -> bool {
        let path = target.split(['?', '#']).next().unwrap_or(target);
        path.trim_end_matches('/') == self.login_path.trim_end_matches('/')
    }
}

/// A guard decision kept current against a live session.
pub struct GuardWatch {
    guard: RouteGuard,
    session: watch::Receiver<Session>,
    target: String,
    current: GuardDecision,
}

impl GuardWatch {
    fn new(guard: RouteGuard, mut session: watch::Receiver<Session>, target: &str) -> Self {
        let current = guard.evaluate(&session.borrow_and_update(), target);
        Self {
            guard,
            session,
            target: target.to_string(),
            current,
        }
    }

    pub fn current(&self) -> &GuardDecision {
        &self.current
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Re-evaluate for a new navigation target
    pub fn navigate(&mut self, target: &str) -> &GuardDecision {
        self.target = target.to_string();
        self.current = self.guard.evaluate(&self.session.borrow_and_update(), &self.target);
        &self.current
    }

    /// Wait until the decision differs from the current one.
    /// Returns `None` once the session manager is gone.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        loop {
            self.session.changed().await.ok()?;
            let next = self.guard.evaluate(&self.session.borrow_and_update(), &self.target);
            if next != self.current {
                self.current = next.clone();
                return Some(next);
            }
        }
    }
}
