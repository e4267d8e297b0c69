// ABOUTME: Process-wide registry of per-session mutexes.
// ABOUTME: Guarantees at most one in-flight run per resume token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tokio::sync::Mutex as AsyncMutex;

use crate::model::ResumeToken;

static GLOBAL: Lazy<SessionLocks> = Lazy::new(SessionLocks::new);

/// Map from resume token to its session mutex.
///
/// Entries are created lazily and never removed; the key space is bounded
/// by the number of distinct sessions seen during the process lifetime.
#[derive(Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<ResumeToken, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the built-in runners.
    pub fn global() -> &'static SessionLocks {
        &GLOBAL
    }

    /// The mutex guarding `token`: the same instance for equal tokens,
    /// distinct instances otherwise.
    pub fn lock_for(&self, token: &ResumeToken) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(token.clone()).or_default())
    }
}
