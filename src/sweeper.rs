//! Reconciliation sweeper: policy-driven session reclamation plus
//! filesystem/registry convergence.
//!
//! Runs on a fixed interval. Tracked sessions that violate policy go
//! through the same idempotent terminate-and-purge sequence as every
//! other exit path; untracked (orphan) directories older than the
//! configured age are deleted, recovering from crash-without-cleanup.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::lifecycle;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Why the sweeper decided to reclaim a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReason {
    /// The engine process is no longer running.
    DeadProcess,
    /// No status read within the idle timeout.
    IdleTimeout,
    /// Classified error count exceeded the session error budget.
    TooManyErrors,
    /// Uptime exceeded the hard ceiling.
    MaxUptime,
}

impl SweepReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::DeadProcess => "dead process",
            Self::IdleTimeout => "idle timeout",
            Self::TooManyErrors => "too many errors",
            Self::MaxUptime => "max uptime",
        }
    }
}

/// Spawn the background sweep task.
///
/// Ticks at the configured sweep interval until the token fires.
#[must_use]
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    config: Arc<GlobalConfig>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.timing.sweep_interval_seconds));
        // The first tick fires immediately; skip it so a fresh start
        // does not race session spawns happening in the same instant.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    sweep_once(&registry, &config).await;
                }
            }
        }
    })
}

/// Run one full sweep: policy pass over tracked sessions, then the
/// orphan-directory scan.
pub async fn sweep_once(registry: &Arc<SessionRegistry>, config: &GlobalConfig) {
    let sessions = registry.list();
    for session in sessions {
        if let Some(reason) = cleanup_decision(&session, config).await {
            warn!(
                session_id = session.id,
                reason = reason.as_str(),
                "sweeper reclaiming session"
            );
            lifecycle::terminate_and_purge(
                registry,
                &session,
                reason.as_str(),
                config.stop_grace(),
                config.cleanup_delay(),
            )
            .await;
        }
    }

    sweep_orphan_dirs(registry, config).await;
}

/// First-match-wins cleanup policy for a tracked session.
///
/// Order matters: a dead process is reclaimed as such even if it is also
/// idle or over the error budget.
pub async fn cleanup_decision(session: &Arc<Session>, config: &GlobalConfig) -> Option<SweepReason> {
    if session.is_terminating() {
        return None;
    }

    let process_dead = {
        let mut child = session.child.lock().await;
        !matches!(child.try_wait(), Ok(None))
    };
    if process_dead {
        return Some(SweepReason::DeadProcess);
    }

    if session.idle_for() > Duration::from_secs(config.timing.idle_timeout_seconds) {
        return Some(SweepReason::IdleTimeout);
    }

    if session.metrics.errors() > config.session_error_budget {
        return Some(SweepReason::TooManyErrors);
    }

    if session.uptime() > Duration::from_secs(config.timing.max_uptime_seconds) {
        return Some(SweepReason::MaxUptime);
    }

    None
}

/// Delete output-root subdirectories with no registry entry whose mtime
/// is older than the orphan age threshold.
///
/// Deletion failures are logged and skipped; one bad directory never
/// aborts the rest of the scan.
pub async fn sweep_orphan_dirs(registry: &SessionRegistry, config: &GlobalConfig) {
    let orphan_age = Duration::from_secs(config.timing.orphan_age_seconds);

    let Ok(mut entries) = tokio::fs::read_dir(&config.output_root).await else {
        warn!(root = %config.output_root.display(), "cannot read output root for orphan scan");
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if registry.contains(&name) {
            continue;
        }

        let old_enough = entry
            .metadata()
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > orphan_age);

        if !old_enough {
            debug!(dir = %path.display(), "untracked directory too young, leaving alone");
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => info!(dir = %path.display(), "orphan directory removed"),
            Err(err) => warn!(dir = %path.display(), %err, "orphan removal failed, skipping"),
        }
    }
}
