//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Source locator or session identifier failed validation.
    InvalidInput(String),
    /// A start for the same session id is already in flight.
    StartInProgress(String),
    /// Live session count reached the configured maximum.
    CapacityExceeded {
        /// Live session count at rejection time.
        active: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The transcoding engine process could not be started.
    EngineSpawn(String),
    /// The engine reported a fatal condition via its output streams.
    FatalStream(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::StartInProgress(id) => {
                write!(f, "session {id}: another start is already in flight")
            }
            Self::CapacityExceeded { active, max } => {
                write!(f, "capacity exceeded: {active}/{max} sessions active")
            }
            Self::EngineSpawn(msg) => write!(f, "engine spawn: {msg}"),
            Self::FatalStream(msg) => write!(f, "fatal stream error: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
