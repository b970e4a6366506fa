//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Transcoding engine invocation settings.
///
/// The argument set built from these values is treated as an opaque
/// payload: the supervisor only relies on the engine writing a manifest
/// plus chunk files into the session's output directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Engine binary (e.g. `ffmpeg`); resolved via `PATH` if relative.
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Target duration of each produced chunk, in seconds.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    /// Number of chunks retained in the manifest's sliding window.
    #[serde(default = "default_retained_segments")]
    pub retained_segments: u32,
    /// Extra flags appended verbatim (reconnect/backoff tuning lives here).
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_engine_binary() -> String {
    "ffmpeg".into()
}

fn default_segment_seconds() -> u32 {
    2
}

fn default_retained_segments() -> u32 {
    6
}

/// Timing knobs for readiness detection and session reclamation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Interval between manifest polls while waiting for readiness.
    #[serde(default = "default_readiness_poll_millis")]
    pub readiness_poll_millis: u64,
    /// Overall bound on the readiness wait.
    #[serde(default = "default_readiness_timeout_seconds")]
    pub readiness_timeout_seconds: u64,
    /// Grace window between the stop signal and a forceful kill.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Delay between process exit and output-directory removal.
    #[serde(default = "default_cleanup_delay_seconds")]
    pub cleanup_delay_seconds: u64,
    /// Interval between reconciliation sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Idle time (since last status read) before a session is reclaimed.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Hard ceiling on session uptime.
    #[serde(default = "default_max_uptime_seconds")]
    pub max_uptime_seconds: u64,
    /// Minimum age (mtime) before an untracked directory is reclaimed.
    #[serde(default = "default_orphan_age_seconds")]
    pub orphan_age_seconds: u64,
}

fn default_readiness_poll_millis() -> u64 {
    1500
}

fn default_readiness_timeout_seconds() -> u64 {
    40
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_cleanup_delay_seconds() -> u64 {
    5
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

fn default_idle_timeout_seconds() -> u64 {
    300
}

fn default_max_uptime_seconds() -> u64 {
    86_400
}

fn default_orphan_age_seconds() -> u64 {
    600
}

fn default_max_concurrent_sessions() -> u32 {
    8
}

fn default_startup_error_budget() -> u64 {
    10
}

fn default_session_error_budget() -> u64 {
    20
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory under which each session gets its own subdirectory.
    pub output_root: PathBuf,
    /// Maximum concurrent transcoding sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Classified error count that aborts startup before readiness.
    #[serde(default = "default_startup_error_budget")]
    pub startup_error_budget: u64,
    /// Classified error count that triggers sweep-time reclamation.
    #[serde(default = "default_session_error_budget")]
    pub session_error_budget: u64,
    /// Engine invocation settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Readiness and reclamation timing.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            segment_seconds: default_segment_seconds(),
            retained_segments: default_retained_segments(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readiness_poll_millis: default_readiness_poll_millis(),
            readiness_timeout_seconds: default_readiness_timeout_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
            cleanup_delay_seconds: default_cleanup_delay_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_uptime_seconds: default_max_uptime_seconds(),
            orphan_age_seconds: default_orphan_age_seconds(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between manifest polls during readiness detection.
    #[must_use]
    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.timing.readiness_poll_millis)
    }

    /// Overall bound on the readiness wait.
    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.readiness_timeout_seconds)
    }

    /// Grace window between the graceful stop signal and a forceful kill.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.timing.stop_grace_seconds)
    }

    /// Delay between process exit and output-directory removal.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.timing.cleanup_delay_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.engine.segment_seconds == 0 {
            return Err(AppError::Config(
                "engine.segment_seconds must be greater than zero".into(),
            ));
        }

        if self.timing.readiness_poll_millis == 0 {
            return Err(AppError::Config(
                "timing.readiness_poll_millis must be greater than zero".into(),
            ));
        }

        // The output root is created eagerly so path canonicalization and
        // the orphan sweep have a stable base to work against.
        fs::create_dir_all(&self.output_root)
            .map_err(|err| AppError::Config(format!("cannot create output_root: {err}")))?;
        let canonical_root = self
            .output_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("output_root invalid: {err}")))?;
        self.output_root = canonical_root;

        Ok(())
    }
}
