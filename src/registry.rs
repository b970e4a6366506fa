//! Session registry — the authoritative in-memory map of live sessions.
//!
//! Single source of truth for admission decisions and status queries.
//! Admission is atomic: duplicate detection, the capacity check, and the
//! slot claim happen under one lock via [`SessionRegistry::reserve`], so
//! racing starts can neither oversubscribe the cap nor spawn two engines
//! for one id. Critical sections are limited to map mutation; callers
//! collect what they need under the lock and act after releasing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::metrics::SessionMetrics;
use crate::session::Session;
use crate::{AppError, Result};

/// One slot in the session map.
///
/// A `Reserved` entry is a claim made by an in-flight start before its
/// engine process exists; it counts against capacity and blocks duplicate
/// starts exactly like a live session.
#[derive(Debug)]
enum SessionEntry {
    Reserved,
    Live(Arc<Session>),
}

impl SessionEntry {
    fn live(&self) -> Option<&Arc<Session>> {
        match self {
            Self::Live(session) => Some(session),
            Self::Reserved => None,
        }
    }
}

/// Outcome of an admission reservation.
#[derive(Debug)]
pub enum Admission {
    /// The slot was claimed; fulfill it with the spawned session or drop
    /// it to release the claim.
    Reserved(Reservation),
    /// The id already maps to a session (its process may have exited;
    /// the caller decides between idempotent success and reclamation).
    Existing(Arc<Session>),
}

/// A claimed admission slot, released on drop unless fulfilled.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<SessionRegistry>,
    id: String,
    fulfilled: bool,
}

impl Reservation {
    /// Replace the placeholder with the live session record.
    pub fn fulfill(mut self, session: Arc<Session>) {
        self.registry.insert(session);
        self.fulfilled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        if let Ok(mut map) = self.registry.sessions.lock() {
            if matches!(map.get(&self.id), Some(SessionEntry::Reserved)) {
                map.remove(&self.id);
            }
        }
    }
}

/// Shared registry of live sessions plus an independently keyed metrics
/// map. Metrics are registered alongside the session but purged
/// separately so a final snapshot can outlive the session entry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    metrics: Mutex<HashMap<String, Arc<SessionMetrics>>>,
}

impl SessionRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an admission slot for `id` under one lock.
    ///
    /// Returns `Existing` when the id is already mapped to a session —
    /// capacity is not checked in that case, since an idempotent restart
    /// never needs a new slot.
    ///
    /// # Errors
    ///
    /// `AppError::StartInProgress` when another start holds a
    /// reservation for the same id; `AppError::CapacityExceeded` when
    /// every slot (live or reserved) is taken.
    pub fn reserve(self: &Arc<Self>, id: &str, max: usize) -> Result<Admission> {
        let Ok(mut map) = self.sessions.lock() else {
            return Err(AppError::Io("session registry lock poisoned".into()));
        };

        match map.get(id) {
            Some(SessionEntry::Live(session)) => {
                return Ok(Admission::Existing(Arc::clone(session)));
            }
            Some(SessionEntry::Reserved) => {
                return Err(AppError::StartInProgress(id.to_owned()));
            }
            None => {}
        }

        if map.len() >= max {
            return Err(AppError::CapacityExceeded {
                active: map.len(),
                max,
            });
        }

        map.insert(id.to_owned(), SessionEntry::Reserved);
        Ok(Admission::Reserved(Reservation {
            registry: Arc::clone(self),
            id: id.to_owned(),
            fulfilled: false,
        }))
    }

    /// Register a session and its metrics under the session id.
    ///
    /// Replaces any previous entry for the same id; admission is
    /// responsible for purging stale entries first.
    pub fn insert(&self, session: Arc<Session>) {
        let id = session.id.clone();
        let metrics = Arc::clone(&session.metrics);
        if let Ok(mut map) = self.metrics.lock() {
            map.insert(id.clone(), metrics);
        }
        if let Ok(mut map) = self.sessions.lock() {
            map.insert(id, SessionEntry::Live(session));
        }
    }

    /// Look up a live session by id. Reserved slots are not visible.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|map| map.get(id).and_then(|entry| entry.live().cloned()))
    }

    /// Remove a live session entry, returning it if present. Reserved
    /// slots are left for their owning start to release.
    ///
    /// The metrics entry is left behind; call
    /// [`purge_metrics`](Self::purge_metrics) once the final snapshot
    /// has been taken.
    #[must_use]
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let Ok(mut map) = self.sessions.lock() else {
            return None;
        };
        if matches!(map.get(id), Some(SessionEntry::Live(_))) {
            if let Some(SessionEntry::Live(session)) = map.remove(id) {
                return Some(session);
            }
        }
        None
    }

    /// Drop the metrics entry for an id.
    pub fn purge_metrics(&self, id: &str) {
        if let Ok(mut map) = self.metrics.lock() {
            map.remove(id);
        }
    }

    /// Metrics for a session id, if still registered.
    #[must_use]
    pub fn metrics_for(&self, id: &str) -> Option<Arc<SessionMetrics>> {
        self.metrics
            .lock()
            .ok()
            .and_then(|map| map.get(id).cloned())
    }

    /// Number of claimed slots: live sessions plus reservations held by
    /// in-flight starts.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.sessions.lock().map_or(0, |map| map.len())
    }

    /// Whether an id currently holds a slot (live or reserved).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().is_ok_and(|map| map.contains_key(id))
    }

    /// Snapshot of all live sessions, for sweeps and listings.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().map_or_else(
            |_| Vec::new(),
            |map| {
                map.values()
                    .filter_map(|entry| entry.live().cloned())
                    .collect()
            },
        )
    }

    /// Snapshot of all slot-holding ids (live and reserved).
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map_or_else(|_| Vec::new(), |map| map.keys().cloned().collect())
    }
}
