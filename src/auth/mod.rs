//! Authorization contexts and the session store seam
//!
//! A connection carries the [`AuthContext`] resolved during the upgrade. The
//! session behind it can be destroyed at any time (logout, login as another
//! user); the transport asks the [`AuthStore`] before accepting a
//! subscription and before delivering each notification.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Identity a connection authenticated with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthContext {
    /// Session identifier (e.g. the session cookie)
    pub session_id: String,
    /// Authenticated user, `None` for anonymous sessions
    pub user_id: Option<u64>,
}

impl AuthContext {
    /// Context for an authenticated user
    pub fn user(session_id: impl Into<String>, user_id: u64) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: Some(user_id),
        }
    }

    /// Context for an anonymous session
    pub fn anonymous(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
        }
    }
}

/// Source of truth for whether an authorization context is still valid
#[async_trait]
pub trait AuthStore: Send + Sync + 'static {
    /// Whether `ctx` may still subscribe and receive notifications
    async fn is_valid(&self, ctx: &AuthContext) -> bool;
}

/// In-memory session store
///
/// A context is valid while its session exists and still belongs to the same
/// user.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Option<u64>>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a session and return its context
    pub fn create(&self, session_id: impl Into<String>, user_id: Option<u64>) -> AuthContext {
        let session_id = session_id.into();
        self.sessions.write().insert(session_id.clone(), user_id);
        tracing::debug!(session_id = %session_id, user_id = ?user_id, "Session created");
        AuthContext {
            session_id,
            user_id,
        }
    }

    /// Destroy a session. Returns whether it existed.
    pub fn invalidate(&self, session_id: &str) -> bool {
        let existed = self.sessions.write().remove(session_id).is_some();
        if existed {
            tracing::debug!(session_id = session_id, "Session invalidated");
        }
        existed
    }

    /// Destroy the session behind `ctx`
    pub fn logout(&self, ctx: &AuthContext) -> bool {
        self.invalidate(&ctx.session_id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session exists
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl AuthStore for MemorySessionStore {
    async fn is_valid(&self, ctx: &AuthContext) -> bool {
        matches!(
            self.sessions.read().get(&ctx.session_id),
            Some(user_id) if *user_id == ctx.user_id
        )
    }
}
