//! Session state holder.
//!
//! Owns the bearer token for the running process. The in-memory copy is a
//! read-through cache over a [`TokenStorage`]: it is hydrated from durable
//! storage at most once, on the first read, and never re-read afterwards.
//! A token written by another process is therefore only seen after restart.
//!
//! Storage failures are logged and swallowed; callers never see them.

mod storage;

pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed durable key the token is persisted under
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// In-memory view of the durable token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCache {
    /// Durable storage has not been consulted yet
    NotLoaded,
    /// Value is authoritative for the rest of the process
    Loaded(Option<String>),
}

pub struct SessionState {
    cache: Mutex<TokenCache>,
    storage: Arc<dyn TokenStorage>,
}

impl SessionState {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            cache: Mutex::new(TokenCache::NotLoaded),
            storage,
        }
    }

    /// Start with a token already in memory, skipping hydration.
    ///
    /// The token is not written to durable storage.
    pub fn preloaded(storage: Arc<dyn TokenStorage>, token: String) -> Self {
        Self {
            cache: Mutex::new(TokenCache::Loaded(Some(token))),
            storage,
        }
    }

    /// Session with nothing persisted outside the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenStorage::new()))
    }

    /// Current token, hydrating from durable storage on first use.
    pub fn token(&self) -> Option<String> {
        let mut cache = self.cache.lock();
        match &*cache {
            TokenCache::Loaded(token) => token.clone(),
            TokenCache::NotLoaded => {
                let token = match self.storage.load() {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stored token, treating as absent");
                        None
                    }
                };
                debug!(present = token.is_some(), "Hydrated session token");
                *cache = TokenCache::Loaded(token.clone());
                token
            }
        }
    }

    /// Replace the token and persist the change (best effort).
    pub fn set_token(&self, token: Option<String>) {
        let mut cache = self.cache.lock();

        let result = match &token {
            Some(t) => self.storage.store(t),
            None => self.storage.remove(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session token");
        }

        *cache = TokenCache::Loaded(token);
    }

    pub fn clear(&self) {
        self.set_token(None);
    }

    pub fn cache_state(&self) -> TokenCache {
        self.cache.lock().clone()
    }
}
