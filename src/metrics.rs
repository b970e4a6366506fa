//! Per-session metric counters derived from classified engine output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::classify::EngineEvent;

/// Mutable counters associated 1:1 with a session.
///
/// Counters are atomics so the two output pump tasks of the same session
/// never lose increments; they are monotonic for the lifetime of the
/// session and reset only when a new session is created for the same id.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Source reconnect attempts observed in engine output.
    pub reconnect_count: AtomicU64,
    /// Classified error lines (fatal and non-fatal).
    pub error_count: AtomicU64,
    /// Approximate count of chunks the engine opened for writing.
    pub segment_count: AtomicU64,
    /// Most recent classified error text (overwritten, not accumulated).
    pub last_error: Mutex<Option<String>>,
    /// When the most recent chunk write was observed.
    pub last_segment_time: Mutex<Option<Instant>>,
}

/// Point-in-time copy of a session's metrics, for status responses and
/// final stop/purge reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MetricsSnapshot {
    /// Source reconnect attempts.
    pub reconnect_count: u64,
    /// Classified error lines.
    pub error_count: u64,
    /// Chunks observed in engine output.
    pub segment_count: u64,
    /// Most recent classified error text, if any.
    pub last_error: Option<String>,
}

impl SessionMetrics {
    /// Apply one classified engine event to the counters.
    ///
    /// `Unclassified` events have no metric effect; `OutputOpened` is a
    /// readiness signal, not a counter.
    pub fn apply(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Reconnect => {
                self.reconnect_count.fetch_add(1, Ordering::Relaxed);
            }
            EngineEvent::ChunkProduced => {
                self.segment_count.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut last) = self.last_segment_time.lock() {
                    *last = Some(Instant::now());
                }
            }
            EngineEvent::Error { detail, .. } => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut last) = self.last_error.lock() {
                    *last = Some(detail.clone());
                }
            }
            EngineEvent::OutputOpened | EngineEvent::Unclassified => {}
        }
    }

    /// Current classified error count.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            segment_count: self.segment_count.load(Ordering::Relaxed),
            last_error: match self.last_error.lock() {
                Ok(guard) => guard.clone(),
                Err(_) => None,
            },
        }
    }
}
