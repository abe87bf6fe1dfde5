use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tracing::debug;
use uuid::Uuid;

use crate::table::Dataset;

/// Default lifetime of an idle session: 24 hours.
pub const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

impl NoticeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        }
    }
}

/// A message shown once, on the next render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Per-user state that survives across renders.
///
/// The fields are private: the only ways to change them are [`Session::load`],
/// [`Session::start_viewing`] and [`Session::reset`], which keep
/// `viewing` from ever being true without a dataset.
#[derive(Clone, Debug, Default)]
pub struct Session {
    dataset: Option<Arc<Dataset>>,
    source: Option<String>,
    viewing: bool,
    notices: Vec<Notice>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.dataset.as_ref()
    }

    /// Name of the file the dataset came from.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn viewing(&self) -> bool {
        self.viewing
    }

    /// Messages waiting for the next render.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Store a freshly decoded dataset. The session stays on the upload view.
    pub fn load(&mut self, dataset: Dataset, source: impl Into<String>) {
        self.dataset = Some(Arc::new(dataset));
        self.source = Some(source.into());
        self.viewing = false;
    }

    /// Switch to the visualization view. Returns `false`, and changes
    /// nothing, when no dataset is loaded.
    pub fn start_viewing(&mut self) -> bool {
        if self.dataset.is_none() {
            return false;
        }
        self.viewing = true;
        true
    }

    /// Drop the dataset and return to the upload view.
    pub fn reset(&mut self) {
        self.dataset = None;
        self.source = None;
        self.viewing = false;
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

/// Where sessions live between requests.
///
/// Handlers read a snapshot with [`SessionStore::get`], apply one action,
/// and write it back with [`SessionStore::put`].
pub trait SessionStore: Send + Sync {
    /// Create an empty session and return its id.
    fn create(&self) -> String;

    /// Snapshot of a live session, refreshing its expiry.
    fn get(&self, id: &str) -> Option<Session>;

    /// Replace a session's state. Returns `false` if the id is unknown or expired.
    fn put(&self, id: &str, session: Session) -> bool;

    fn remove(&self, id: &str);

    /// Drop expired sessions, returning how many were removed.
    fn purge_expired(&self) -> usize;
}

struct Entry {
    session: Session,
    expires_at: SystemTime,
}

/// Process-local session store keyed by random UUIDs.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(SESSION_DURATION)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = Entry {
            session: Session::new(),
            expires_at: SystemTime::now() + self.ttl,
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        debug!(session = %id, "session created");
        id
    }

    fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = SystemTime::now();
        match sessions.get_mut(id) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.ttl;
                Some(entry.session.clone())
            }
            Some(_) => {
                sessions.remove(id);
                debug!(session = %id, "session expired");
                None
            }
            None => None,
        }
    }

    fn put(&self, id: &str, session: Session) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = SystemTime::now();
        match sessions.get_mut(id) {
            Some(entry) if entry.expires_at > now => {
                entry.session = session;
                entry.expires_at = now + self.ttl;
                true
            }
            _ => false,
        }
    }

    fn remove(&self, id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = SystemTime::now();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }
}
