//! Session model: one supervised transcoding process bound to one source.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::SessionMetrics;

/// Manifest filename written into every session's output directory.
pub const MANIFEST_NAME: &str = "stream.m3u8";

/// Opaque requester details kept for observability only.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RequesterMeta {
    /// Origin address of the start request, if known.
    pub remote_addr: Option<String>,
    /// Client user agent, if known.
    pub user_agent: Option<String>,
}

/// One tracked transcoding session.
///
/// The child process handle is owned exclusively by this record; no
/// other component terminates it directly. The `terminating` flag is the
/// atomic transition that guarantees at most one termination sequence
/// ever runs per session.
#[derive(Debug)]
pub struct Session {
    /// Normalized, filesystem-safe identifier; unique key in the registry.
    pub id: String,
    /// Validated source locator.
    pub source: String,
    /// Output directory derived from `id`; owned for the session lifetime.
    pub output_dir: PathBuf,
    /// Wall-clock start time, for external reporting.
    pub started_at: DateTime<Utc>,
    /// Monotonic start instant, for uptime math.
    pub started_mono: Instant,
    /// Updated on every status read; drives the idle-timeout policy.
    pub last_activity: Mutex<Instant>,
    /// Supervised engine process.
    pub child: tokio::sync::Mutex<Child>,
    /// Engine process id at spawn time, for logging.
    pub pid: Option<u32>,
    /// Cancels the output pumps and the scheduled max-uptime stop.
    pub cancel: CancellationToken,
    /// Set once the manifest has been observed with at least one chunk.
    pub ready: AtomicBool,
    /// Wins exactly once; the winner runs terminate + purge.
    terminating: AtomicBool,
    /// Output pump tasks; taken and awaited once during purge so the
    /// final metrics snapshot reflects everything the engine wrote.
    pumps: Mutex<Vec<JoinHandle<()>>>,
    /// Counters fed by the output pumps; also registered independently
    /// in the registry's metrics map so a final snapshot survives purge.
    pub metrics: Arc<SessionMetrics>,
    /// Requester details, observability only.
    pub requester: RequesterMeta,
}

impl Session {
    /// Construct a session record around a freshly spawned child.
    #[must_use]
    pub fn new(
        id: String,
        source: String,
        output_dir: PathBuf,
        child: Child,
        requester: RequesterMeta,
    ) -> Self {
        let pid = child.id();
        let now = Instant::now();
        Self {
            id,
            source,
            output_dir,
            started_at: Utc::now(),
            started_mono: now,
            last_activity: Mutex::new(now),
            child: tokio::sync::Mutex::new(child),
            pid,
            cancel: CancellationToken::new(),
            ready: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            pumps: Mutex::new(Vec::new()),
            metrics: Arc::new(SessionMetrics::default()),
            requester,
        }
    }

    /// Path of the session's manifest file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_NAME)
    }

    /// Record activity (called on every status read).
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last status read.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        match self.last_activity.lock() {
            Ok(last) => last.elapsed(),
            Err(_) => Duration::ZERO,
        }
    }

    /// Time since the session started.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_mono.elapsed()
    }

    /// Attach an output pump task for shutdown sequencing.
    pub fn attach_pump(&self, handle: JoinHandle<()>) {
        if let Ok(mut pumps) = self.pumps.lock() {
            pumps.push(handle);
        }
    }

    /// Take ownership of the attached pump handles.
    #[must_use]
    pub fn take_pumps(&self) -> Vec<JoinHandle<()>> {
        match self.pumps.lock() {
            Ok(mut pumps) => std::mem::take(&mut *pumps),
            Err(_) => Vec::new(),
        }
    }

    /// Attempt the `active -> terminating` transition.
    ///
    /// Returns `true` for exactly one caller; all others observe the
    /// session as already terminating and must return without acting.
    #[must_use]
    pub fn begin_termination(&self) -> bool {
        self.terminating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether a termination sequence has already been claimed.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Public descriptor for list/status responses.
    #[must_use]
    pub fn descriptor(&self, manifest_url: String) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id.clone(),
            source: self.source.clone(),
            manifest_url,
            started_at: self.started_at,
            uptime_seconds: self.uptime().as_secs(),
            state: if self.ready.load(Ordering::SeqCst) {
                SessionState::Active
            } else {
                SessionState::Starting
            },
        }
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered but readiness has not been observed yet.
    Starting,
    /// Manifest observed with at least one chunk.
    Active,
}

/// Public view of a session handed to the HTTP layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionDescriptor {
    /// Session identifier.
    pub id: String,
    /// Source locator.
    pub source: String,
    /// URL path of the manifest relative to the static-serving root.
    pub manifest_url: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_seconds: u64,
    /// Starting or active.
    pub state: SessionState,
}

/// Startup-phase signals shared between the output pumps and the
/// readiness wait of the same session.
///
/// Armed from spawn until readiness is resolved; once disarmed, fatal
/// classifications no longer short-circuit anything (the sweeper's error
/// budget takes over).
#[derive(Debug)]
pub struct StartupProbe {
    /// First fatal error text, set once.
    fatal: Mutex<Option<String>>,
    /// Engine announced it opened the manifest output.
    soft_ready: AtomicBool,
    /// Whether startup is still in progress.
    armed: AtomicBool,
    /// Wakes the readiness wait when a fatal signal lands.
    pub notify: Notify,
}

impl Default for StartupProbe {
    fn default() -> Self {
        Self {
            fatal: Mutex::new(None),
            soft_ready: AtomicBool::new(false),
            armed: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }
}

impl StartupProbe {
    /// Record a fatal condition and wake the readiness wait.
    ///
    /// Only the first fatal text is kept.
    pub fn set_fatal(&self, detail: &str) {
        if let Ok(mut slot) = self.fatal.lock() {
            if slot.is_none() {
                *slot = Some(detail.to_owned());
            }
        }
        self.notify.notify_waiters();
    }

    /// The recorded fatal error text, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<String> {
        match self.fatal.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        }
    }

    /// Record the engine's output-opened announcement.
    pub fn set_soft_ready(&self) {
        self.soft_ready.store(true, Ordering::SeqCst);
    }

    /// Whether the engine announced it opened its output.
    #[must_use]
    pub fn soft_ready(&self) -> bool {
        self.soft_ready.load(Ordering::SeqCst)
    }

    /// Whether startup is still in progress.
    #[must_use]
    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Mark startup as resolved; later fatal classifications are left to
    /// the sweeper's error budget.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

/// Derive a session's output directory under the configured root.
#[must_use]
pub fn output_dir_for(output_root: &Path, session_id: &str) -> PathBuf {
    output_root.join(session_id)
}
