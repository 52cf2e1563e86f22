use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::{CacheToken, SearchResultSet};
use crate::error::LocatorError;

pub const DEFAULT_CAPACITY: usize = 256;

struct Entry {
    documents: Arc<SearchResultSet>,
    session: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheToken, Entry>,
    order: VecDeque<CacheToken>,
    sessions: HashMap<String, CacheToken>,
}

impl Inner {
    fn remove(&mut self, token: &CacheToken) {
        if let Some(entry) = self.entries.remove(token) {
            if let Some(session) = entry.session {
                if self.sessions.get(&session) == Some(token) {
                    self.sessions.remove(&session);
                }
            }
        }
        self.order.retain(|queued| queued != token);
    }
}

/// Process-wide store of search results, keyed by opaque tokens.
///
/// Entries are immutable once written. The cache holds at most `capacity`
/// sets (oldest evicted first) and, when a TTL is set, treats older entries as
/// expired.
pub struct ResultCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn put(&self, documents: SearchResultSet) -> CacheToken {
        self.insert(None, documents)
    }

    /// Like `put`, but replaces whatever `session` cached before.
    pub fn put_for_session(&self, session: &str, documents: SearchResultSet) -> CacheToken {
        self.insert(Some(session.to_string()), documents)
    }

    pub fn get(&self, token: &CacheToken) -> Result<Arc<SearchResultSet>, LocatorError> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(token) {
            None => return Err(LocatorError::SessionExpired(token.to_string())),
            Some(entry) => self.is_expired(entry),
        };
        if expired {
            inner.remove(token);
            return Err(LocatorError::SessionExpired(token.to_string()));
        }
        inner
            .entries
            .get(token)
            .map(|entry| Arc::clone(&entry.documents))
            .ok_or_else(|| LocatorError::SessionExpired(token.to_string()))
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, session: Option<String>, documents: SearchResultSet) -> CacheToken {
        let token = CacheToken::mint();
        let mut inner = self.lock();

        if let Some(session) = &session {
            if let Some(previous) = inner.sessions.get(session).cloned() {
                inner.remove(&previous);
            }
            inner.sessions.insert(session.clone(), token.clone());
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            debug!(token = %oldest, "evicting cached search results");
            inner.remove(&oldest);
        }

        inner.entries.insert(
            token.clone(),
            Entry {
                documents: Arc::new(documents),
                session,
                created_at: Utc::now(),
            },
        );
        inner.order.push_back(token.clone());
        token
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl
            .map(|ttl| Utc::now() - entry.created_at > ttl)
            .unwrap_or(false)
    }

    // Entries are written whole under the lock, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Some(Duration::hours(1)))
    }
}
