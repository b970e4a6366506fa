//! Readiness detection: bounded manifest polling with fatal short-circuit.
//!
//! A session is ready once its manifest exists, carries the structural
//! marker, and references at least one chunk. The wait is a pure bounded
//! poll — it suspends only the calling start flow and holds no locks.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::session::StartupProbe;
use crate::{AppError, Result};

/// Structural marker every valid manifest starts with.
const MANIFEST_MARKER: &str = "#EXTM3U";

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Manifest observed with at least one chunk reference.
    Ready,
    /// The bound elapsed without readiness or a fatal signal.
    ///
    /// This is a soft outcome: the session stays registered and is
    /// reported as starting, tolerating slow sources.
    TimedOut {
        /// Whether the engine at least announced it opened its output.
        soft_ready: bool,
    },
}

/// Wait for a session's manifest to become ready, up to `timeout`.
///
/// Polls every `poll` interval. The startup probe can short-circuit the
/// wait: a fatal classification fails the start immediately with the
/// classified error text instead of waiting out the bound. The probe is
/// disarmed on the way out so post-startup fatal lines are left to the
/// sweeper's error budget.
///
/// # Errors
///
/// Returns `AppError::FatalStream` when a fatal engine signal fired
/// before readiness.
pub async fn wait_ready(
    manifest_path: &Path,
    probe: &StartupProbe,
    poll: Duration,
    timeout: Duration,
) -> Result<ReadyState> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(detail) = probe.fatal_error() {
            probe.disarm();
            return Err(AppError::FatalStream(detail));
        }

        if manifest_segment_count(manifest_path).await > 0 {
            probe.disarm();
            return Ok(ReadyState::Ready);
        }

        let now = Instant::now();
        if now >= deadline {
            probe.disarm();
            debug!(manifest = %manifest_path.display(), "readiness wait timed out");
            return Ok(ReadyState::TimedOut {
                soft_ready: probe.soft_ready(),
            });
        }

        let nap = poll.min(deadline - now);
        tokio::select! {
            () = tokio::time::sleep(nap) => {}
            () = probe.notify.notified() => {}
        }
    }
}

/// Number of chunk references in the manifest.
///
/// Zero when the file is missing, lacks the structural marker, or lists
/// no chunks yet — a marker-only manifest is not ready.
pub async fn manifest_segment_count(manifest_path: &Path) -> usize {
    let Ok(content) = tokio::fs::read_to_string(manifest_path).await else {
        return 0;
    };
    if !content.trim_start().starts_with(MANIFEST_MARKER) {
        return 0;
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count()
}

/// Whether the manifest file exists at all (it may still be empty).
pub async fn manifest_exists(manifest_path: &Path) -> bool {
    tokio::fs::try_exists(manifest_path).await.unwrap_or(false)
}

/// Number of chunk files currently on disk in a session directory.
pub async fn disk_segment_count(output_dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(output_dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().extension().is_some_and(|ext| ext == "ts") {
            count += 1;
        }
    }
    count
}
