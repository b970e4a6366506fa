//! Admission control and the public supervisor facade.
//!
//! The HTTP layer consumes this surface: start/stop/status/list/health.
//! Admission checks the registry for capacity and duplicates before any
//! process is spawned; the start caller blocks only until readiness is
//! determined or the bounded timeout elapses, never for the session
//! lifetime.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::lifecycle;
use crate::metrics::MetricsSnapshot;
use crate::readiness::{self, ReadyState};
use crate::registry::{Admission, Reservation, SessionRegistry};
use crate::session::{
    output_dir_for, RequesterMeta, Session, SessionDescriptor, StartupProbe, MANIFEST_NAME,
};
use crate::validate::{normalize_session_id, validate_source};
use crate::Result;

/// URL path prefix under which the static layer serves session output.
const STREAM_URL_PREFIX: &str = "/streams";

/// Successful start outcomes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// A fresh session was admitted and spawned.
    Started {
        /// Public view of the new session.
        descriptor: SessionDescriptor,
    },
    /// The id already maps to a live session; idempotent success.
    AlreadyActive {
        /// Public view of the existing session.
        descriptor: SessionDescriptor,
    },
}

/// Outcome of a stop request. Idempotent: a second stop for the same id
/// reports `NotFound` without error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Session terminated; carries the final metrics snapshot.
    Stopped {
        /// Counters at termination time.
        metrics: MetricsSnapshot,
    },
    /// No live session under that id.
    NotFound,
}

/// Status report for a single session id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StatusReport {
    /// No live session under the queried id.
    Inactive {
        /// Always `false`.
        active: bool,
    },
    /// Live session status.
    Active {
        /// Always `true`.
        active: bool,
        /// Public descriptor.
        descriptor: SessionDescriptor,
        /// Whether the manifest file exists on disk.
        manifest_exists: bool,
        /// Chunk references currently listed in the manifest.
        segment_count_manifest: usize,
        /// Chunk files currently on disk.
        segment_count_disk: usize,
        /// Current counters.
        metrics: MetricsSnapshot,
    },
}

/// Listing of live sessions plus capacity utilization.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ActiveList {
    /// Public descriptors of all live sessions.
    pub sessions: Vec<SessionDescriptor>,
    /// Live count over capacity, in percent.
    pub utilization_percent: u32,
}

/// Health summary for the service endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Health {
    /// Whether the engine binary is resolvable.
    pub engine_available: bool,
    /// Live session count.
    pub active_count: usize,
    /// Configured maximum.
    pub capacity: u32,
}

/// Stream session supervisor: admission, registry ownership, and the
/// operations the HTTP layer calls into.
#[derive(Debug)]
pub struct Supervisor {
    config: Arc<GlobalConfig>,
    registry: Arc<SessionRegistry>,
}

impl Supervisor {
    /// Construct a supervisor around a validated configuration.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// The authoritative session registry (shared with the sweeper).
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The configuration this supervisor runs with.
    #[must_use]
    pub fn config(&self) -> Arc<GlobalConfig> {
        Arc::clone(&self.config)
    }

    /// Admit and start a transcoding session.
    ///
    /// Validates inputs, resolves id collisions (live duplicate ⇒
    /// `AlreadyActive`; dead duplicate ⇒ reclaimed first), enforces the
    /// concurrency cap, spawns the engine, and waits — bounded — for
    /// readiness. A readiness timeout without a fatal signal still
    /// returns success with the session in the starting state.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidInput`, `AppError::CapacityExceeded`,
    /// `AppError::StartInProgress` when another start for the same id
    /// holds the admission slot, `AppError::EngineSpawn`, or
    /// `AppError::FatalStream` with the classified engine error text.
    pub async fn start_session(
        &self,
        source: &str,
        session_id: &str,
        requester: RequesterMeta,
    ) -> Result<StartOutcome> {
        validate_source(source)?;
        let id = normalize_session_id(session_id)?;

        let span = info_span!("start_session", session_id = %id);
        self.admit_and_start(&id, source, requester)
            .instrument(span)
            .await
    }

    async fn admit_and_start(
        &self,
        id: &str,
        source: &str,
        requester: RequesterMeta,
    ) -> Result<StartOutcome> {
        let max = usize::try_from(self.config.max_concurrent_sessions).unwrap_or(usize::MAX);

        // One registry lock decides duplicate vs capacity and claims the
        // slot, so racing starts can neither oversubscribe the cap nor
        // spawn two engines for one id. A confirmed-running duplicate is
        // returned as-is; a dead one is reclaimed and the freed slot is
        // contested again.
        let reservation = loop {
            match self.registry.reserve(id, max)? {
                Admission::Reserved(reservation) => break reservation,
                Admission::Existing(existing) => {
                    let running = {
                        let mut child = existing.child.lock().await;
                        matches!(child.try_wait(), Ok(None))
                    };
                    if running {
                        info!("start request matched live session");
                        return Ok(StartOutcome::AlreadyActive {
                            descriptor: existing.descriptor(manifest_url(id)),
                        });
                    }
                    self.reclaim_stale(&existing).await;
                }
            }
        };

        let (session, probe) = self.spawn_supervised(id, source, requester, reservation)?;

        match readiness::wait_ready(
            &session.manifest_path(),
            &probe,
            self.config.readiness_poll(),
            self.config.readiness_timeout(),
        )
        .await
        {
            Ok(ReadyState::Ready) => {
                session.ready.store(true, Ordering::SeqCst);
                info!("session ready");
            }
            Ok(ReadyState::TimedOut { soft_ready }) => {
                // Soft failure: the source may just be slow. Keep the
                // session registered and report it as starting.
                warn!(soft_ready, "readiness timed out, session kept as starting");
            }
            Err(err) => {
                warn!(%err, "fatal signal during startup, tearing down");
                lifecycle::terminate_and_purge(
                    &self.registry,
                    &session,
                    "fatal stream error",
                    self.config.stop_grace(),
                    self.config.cleanup_delay(),
                )
                .await;
                return Err(err);
            }
        }

        Ok(StartOutcome::Started {
            descriptor: session.descriptor(manifest_url(id)),
        })
    }

    /// Stop a session and report its final metrics.
    ///
    /// Idempotent: stopping an unknown (or already stopped) id returns
    /// `StopOutcome::NotFound` rather than an error. If the sweeper or
    /// exit watcher wins the same termination race, the caller still
    /// gets the final snapshot — both paths land in the same terminal
    /// state.
    pub async fn stop_session(&self, session_id: &str) -> StopOutcome {
        let Ok(id) = normalize_session_id(session_id) else {
            return StopOutcome::NotFound;
        };

        let span = info_span!("stop_session", session_id = %id);
        self.stop_by_id(&id).instrument(span).await
    }

    async fn stop_by_id(&self, id: &str) -> StopOutcome {
        let Some(session) = self.registry.get(id) else {
            debug!("stop for unknown session");
            return StopOutcome::NotFound;
        };

        lifecycle::terminate_and_purge(
            &self.registry,
            &session,
            "explicit stop",
            self.config.stop_grace(),
            self.config.cleanup_delay(),
        )
        .await;

        // Snapshot after termination so diagnostics the engine emitted
        // during the grace window make it into the final report.
        StopOutcome::Stopped {
            metrics: session.metrics.snapshot(),
        }
    }

    /// Status for one session id. Reading status counts as activity for
    /// the idle-timeout policy.
    pub async fn status(&self, session_id: &str) -> StatusReport {
        let Ok(id) = normalize_session_id(session_id) else {
            return StatusReport::Inactive { active: false };
        };

        let Some(session) = self.registry.get(&id) else {
            return StatusReport::Inactive { active: false };
        };

        session.touch();

        let manifest_path = session.manifest_path();
        let manifest_exists = readiness::manifest_exists(&manifest_path).await;
        let segment_count_manifest = readiness::manifest_segment_count(&manifest_path).await;
        if segment_count_manifest > 0 {
            session.ready.store(true, Ordering::SeqCst);
        }
        let segment_count_disk = readiness::disk_segment_count(&session.output_dir).await;

        StatusReport::Active {
            active: true,
            descriptor: session.descriptor(manifest_url(&id)),
            manifest_exists,
            segment_count_manifest,
            segment_count_disk,
            metrics: session.metrics.snapshot(),
        }
    }

    /// All live sessions plus capacity utilization.
    #[must_use]
    pub fn list_active(&self) -> ActiveList {
        let sessions: Vec<SessionDescriptor> = self
            .registry
            .list()
            .into_iter()
            .map(|session| {
                let url = manifest_url(&session.id);
                session.descriptor(url)
            })
            .collect();

        let capacity = self.config.max_concurrent_sessions.max(1);
        let utilization_percent =
            u32::try_from(sessions.len() * 100).unwrap_or(u32::MAX) / capacity;

        ActiveList {
            sessions,
            utilization_percent,
        }
    }

    /// Service health: engine availability plus registry utilization.
    #[must_use]
    pub fn health_check(&self) -> Health {
        Health {
            engine_available: engine_resolvable(&self.config.engine.binary),
            active_count: self.registry.live_count(),
            capacity: self.config.max_concurrent_sessions,
        }
    }

    /// Stop every live session; used during service shutdown.
    pub async fn stop_all(&self) {
        for session in self.registry.list() {
            lifecycle::terminate_and_purge(
                &self.registry,
                &session,
                "service shutdown",
                self.config.stop_grace(),
                self.config.cleanup_delay(),
            )
            .await;
        }
    }

    /// Spawn the engine for an admitted start and wire up the session:
    /// output pumps on both channels, registry entry, exit watcher, and
    /// the scheduled max-uptime stop.
    ///
    /// Both pumps are attached before anything awaits, so no engine
    /// output is dropped.
    fn spawn_supervised(
        &self,
        id: &str,
        source: &str,
        requester: RequesterMeta,
        reservation: Reservation,
    ) -> Result<(Arc<Session>, Arc<StartupProbe>)> {
        let output_dir = output_dir_for(&self.config.output_root, id);
        let mut child = lifecycle::spawn_engine(&self.config.engine, source, &output_dir)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let session = Arc::new(Session::new(
            id.to_owned(),
            source.to_owned(),
            output_dir,
            child,
            requester,
        ));
        let probe = Arc::new(StartupProbe::default());

        if let Some(stream) = stdout {
            session.attach_pump(tokio::spawn(lifecycle::run_pump(
                id.to_owned(),
                "stdout",
                stream,
                Arc::clone(&session.metrics),
                Arc::clone(&probe),
                self.config.startup_error_budget,
                session.cancel.clone(),
            )));
        }
        if let Some(stream) = stderr {
            session.attach_pump(tokio::spawn(lifecycle::run_pump(
                id.to_owned(),
                "stderr",
                stream,
                Arc::clone(&session.metrics),
                Arc::clone(&probe),
                self.config.startup_error_budget,
                session.cancel.clone(),
            )));
        }

        reservation.fulfill(Arc::clone(&session));

        let _exit_watcher = lifecycle::spawn_exit_watcher(
            Arc::clone(&self.registry),
            Arc::clone(&session),
            self.config.cleanup_delay(),
        );
        let _uptime_timer = lifecycle::spawn_uptime_timer(
            Arc::clone(&self.registry),
            Arc::clone(&session),
            std::time::Duration::from_secs(self.config.timing.max_uptime_seconds),
            self.config.stop_grace(),
            self.config.cleanup_delay(),
        );

        Ok((session, probe))
    }

    /// Reclaim a registry entry whose process has exited, synchronously
    /// enough that a replacement start can reuse the id and directory.
    async fn reclaim_stale(&self, existing: &Arc<Session>) {
        info!(session_id = existing.id, "reclaiming stale session before restart");
        if existing.begin_termination() {
            let _ = self.registry.remove(&existing.id);
            existing.cancel.cancel();
            self.registry.purge_metrics(&existing.id);
            if let Err(err) = tokio::fs::remove_dir_all(&existing.output_dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        session_id = existing.id,
                        %err,
                        "stale directory removal failed"
                    );
                }
            }
        } else {
            // The exit watcher claimed it first; its purge has already
            // deregistered the id (or will within its poll interval).
            let _ = self.registry.remove(&existing.id);
        }
    }
}

/// URL path of a session's manifest under the static-serving prefix.
fn manifest_url(session_id: &str) -> String {
    format!("{STREAM_URL_PREFIX}/{session_id}/{MANIFEST_NAME}")
}

/// Whether the engine binary can be resolved: an explicit path must
/// exist, a bare name must be present in some `PATH` entry.
fn engine_resolvable(binary: &str) -> bool {
    let path = std::path::Path::new(binary);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
    })
}
