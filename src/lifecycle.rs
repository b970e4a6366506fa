//! Process lifecycle management: spawn, output pumping, termination, purge.
//!
//! Owns every transition of the supervised engine process. The exit
//! watcher spawned here is the sole path by which a process-exit event
//! mutates the registry; explicit stops, the sweeper, and the max-uptime
//! timer all funnel through [`terminate_and_purge`], which is idempotent
//! via the session's atomic terminating transition.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify_line, EngineEvent};
use crate::config::EngineConfig;
use crate::metrics::SessionMetrics;
use crate::registry::SessionRegistry;
use crate::session::{Session, StartupProbe, MANIFEST_NAME};
use crate::{AppError, Result};

/// Interval between `try_wait` polls in the exit watcher.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a cancelled pump keeps reading per buffered line before it
/// gives up on a still-open pipe.
const DRAIN_LINE_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on waiting for a pump task to finish during purge.
const PUMP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawn the engine process for a session.
///
/// Creates the output directory, then launches the engine with a fixed
/// argument set: stream-copy into an HLS muxer with a sliding window of
/// `retained_segments` chunks of `segment_seconds` each. The argument
/// set is opaque configuration — correctness only depends on the engine
/// writing `stream.m3u8` plus chunk files into `output_dir`.
///
/// Both stdio channels are piped; the caller must take them and attach
/// pumps before awaiting anything else so no output is dropped.
///
/// # Errors
///
/// Returns `AppError::Io` if the output directory cannot be created, or
/// `AppError::EngineSpawn` if the process fails to start.
pub fn spawn_engine(engine: &EngineConfig, source: &str, output_dir: &Path) -> Result<Child> {
    std::fs::create_dir_all(output_dir)
        .map_err(|err| AppError::Io(format!("cannot create output dir: {err}")))?;

    let manifest = output_dir.join(MANIFEST_NAME);
    let segment_pattern = output_dir.join("seg_%05d.ts");

    let mut cmd = Command::new(&engine.binary);
    cmd.arg("-hide_banner")
        .args(["-loglevel", "info"])
        .args(&engine.extra_args)
        .args(["-i", source])
        .args(["-c", "copy"])
        .args(["-f", "hls"])
        .args(["-hls_time", &engine.segment_seconds.to_string()])
        .args(["-hls_list_size", &engine.retained_segments.to_string()])
        .args(["-hls_flags", "delete_segments+append_list"])
        .arg("-hls_segment_filename")
        .arg(&segment_pattern)
        .arg(&manifest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::EngineSpawn(format!("failed to spawn {}: {err}", engine.binary)))?;

    info!(
        pid = child.id().unwrap_or(0),
        engine = engine.binary,
        source,
        "engine process spawned"
    );

    Ok(child)
}

/// Output pump — reads one engine output channel line by line, classifies
/// each line, and applies the result to the session's metrics and the
/// startup probe.
///
/// Fatal classifications arm the probe's fatal signal while startup is in
/// progress. Exceeding the startup error budget before readiness is
/// itself promoted to a fatal condition, so slow-drip failures that never
/// match an explicit fatal pattern still abort the start.
///
/// Unclassified lines are logged at `DEBUG` and have no metric effect.
/// The pump exits on EOF or when the session token is cancelled.
pub async fn run_pump<R>(
    session_id: String,
    channel: &'static str,
    stream: R,
    metrics: Arc<SessionMetrics>,
    probe: Arc<StartupProbe>,
    startup_error_budget: u64,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                // Drain whatever the engine managed to write before its
                // pipes closed; bounded per line so a still-open pipe
                // cannot stall shutdown.
                while let Ok(Ok(Some(line))) =
                    tokio::time::timeout(DRAIN_LINE_TIMEOUT, lines.next_line()).await
                {
                    apply_line(&session_id, channel, &line, &metrics, &probe, startup_error_budget);
                }
                debug!(session_id, channel, "output pump cancelled");
                return;
            }

            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                apply_line(&session_id, channel, &line, &metrics, &probe, startup_error_budget);
            }
            Ok(None) => {
                debug!(session_id, channel, "output pump reached EOF");
                return;
            }
            Err(err) => {
                warn!(session_id, channel, %err, "output pump read error, stopping");
                return;
            }
        }
    }
}

/// Classify one output line and apply it to the metrics and probe.
fn apply_line(
    session_id: &str,
    channel: &str,
    line: &str,
    metrics: &SessionMetrics,
    probe: &StartupProbe,
    startup_error_budget: u64,
) {
    let event = classify_line(line);
    metrics.apply(&event);

    match &event {
        EngineEvent::OutputOpened => {
            debug!(session_id, channel, "engine opened manifest output");
            probe.set_soft_ready();
        }
        EngineEvent::Error { fatal: true, detail } => {
            warn!(session_id, channel, detail, "fatal engine output");
            if probe.armed() {
                probe.set_fatal(detail);
            }
        }
        EngineEvent::Error {
            fatal: false,
            detail,
        } => {
            debug!(session_id, channel, detail, "engine error line");
            if probe.armed() && metrics.errors() > startup_error_budget {
                probe.set_fatal(&format!(
                    "startup error budget exceeded ({} errors): {detail}",
                    metrics.errors()
                ));
            }
        }
        EngineEvent::Reconnect => {
            info!(session_id, channel, "engine reconnecting to source");
        }
        EngineEvent::ChunkProduced => {
            debug!(session_id, channel, "chunk produced");
        }
        EngineEvent::Unclassified => {
            debug!(session_id, channel, raw_line = %line, "unclassified engine output");
        }
    }
}

/// Spawn the exit watcher for a session.
///
/// Polls the child at a short interval; when the process has exited by
/// itself this task claims the terminating transition and runs the purge
/// (deregistration, token cancellation, final metrics log, delayed
/// directory cleanup). If another path claims termination first the
/// watcher stops without acting.
#[must_use]
pub fn spawn_exit_watcher(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    cleanup_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = session.cancel.cancelled() => {
                    debug!(session_id = session.id, "exit watcher cancelled");
                    return;
                }
                () = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
            }

            let exited = {
                let mut child = session.child.lock().await;
                match child.try_wait() {
                    Ok(Some(status)) => Some(format!("{status}")),
                    Ok(None) => None,
                    Err(err) => {
                        warn!(session_id = session.id, %err, "failed to poll engine process");
                        Some("status unknown".to_owned())
                    }
                }
            };

            if let Some(status) = exited {
                if !session.begin_termination() {
                    // Someone else is already tearing this session down.
                    return;
                }
                info!(session_id = session.id, status, "engine process exited");
                purge(&registry, &session, "process exit", cleanup_delay).await;
                return;
            }
        }
    })
}

/// Spawn the scheduled forced-stop trigger for a session.
///
/// Fires once after `max_uptime`; cancelled whenever the session leaves
/// the active state by any other path.
#[must_use]
pub fn spawn_uptime_timer(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    max_uptime: Duration,
    grace: Duration,
    cleanup_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = session.cancel.cancelled() => {
                debug!(session_id = session.id, "uptime timer cancelled");
            }
            () = tokio::time::sleep(max_uptime) => {
                warn!(session_id = session.id, "max uptime reached, forcing stop");
                terminate_and_purge(&registry, &session, "max uptime", grace, cleanup_delay)
                    .await;
            }
        }
    })
}

/// Terminate the engine process: graceful signal, then forceful kill
/// after the grace window. A no-op if the process has already exited.
pub async fn terminate(session: &Session, grace: Duration) {
    let mut child = session.child.lock().await;

    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            warn!(session_id = session.id, %err, "try_wait failed before terminate");
        }
    }

    send_graceful_signal(session);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(session_id = session.id, %status, "engine exited within grace window");
        }
        Ok(Err(err)) => {
            warn!(session_id = session.id, %err, "error waiting for engine exit");
        }
        Err(_) => {
            warn!(
                session_id = session.id,
                "engine did not exit within grace window, forcing kill"
            );
            if let Err(err) = child.kill().await {
                warn!(session_id = session.id, %err, "failed to force-kill engine");
            }
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(session: &Session) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = session.pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(session_id = session.id, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(_session: &Session) {
    // No graceful signal available; the grace wait before kill() stands in.
}

/// Purge a session after its process is gone: deregister, cancel the
/// session token, log final metrics, and schedule deferred cleanup
/// (directory removal plus the metrics entry) after the cleanup delay so
/// in-flight segment reads and final metric snapshots can finish.
///
/// The caller must have won the terminating transition.
pub async fn purge(
    registry: &Arc<SessionRegistry>,
    session: &Arc<Session>,
    reason: &str,
    cleanup_delay: Duration,
) {
    let _ = registry.remove(&session.id);
    session.cancel.cancel();

    // Wait for the pumps to drain buffered diagnostics so the final
    // snapshot reflects everything the engine wrote before it died.
    for pump in session.take_pumps() {
        if tokio::time::timeout(PUMP_SHUTDOWN_TIMEOUT, pump).await.is_err() {
            warn!(session_id = session.id, "output pump still running at purge");
        }
    }

    let snapshot = session.metrics.snapshot();
    info!(
        session_id = session.id,
        reason,
        segments = snapshot.segment_count,
        errors = snapshot.error_count,
        reconnects = snapshot.reconnect_count,
        uptime_seconds = session.uptime().as_secs(),
        "session ended"
    );

    let dir = session.output_dir.clone();
    let session_id = session.id.clone();
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        tokio::time::sleep(cleanup_delay).await;
        // A replacement session may have been admitted under this id
        // while the delay ran; its directory and metrics must survive.
        // Anything left stale is caught by the orphan sweep instead.
        if registry.contains(&session_id) {
            debug!(session_id, "id re-registered during cleanup delay, skipping removal");
            return;
        }
        registry.purge_metrics(&session_id);
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(session_id, %err, path = %dir.display(), "output cleanup failed");
            }
        } else {
            debug!(session_id, path = %dir.display(), "output directory removed");
        }
    });
}

/// Run the full termination sequence if this caller wins the terminating
/// transition. Returns `false` when another path already claimed it.
pub async fn terminate_and_purge(
    registry: &Arc<SessionRegistry>,
    session: &Arc<Session>,
    reason: &str,
    grace: Duration,
    cleanup_delay: Duration,
) -> bool {
    if !session.begin_termination() {
        debug!(session_id = session.id, reason, "termination already claimed");
        return false;
    }

    terminate(session, grace).await;
    purge(registry, session, reason, cleanup_delay).await;
    true
}
