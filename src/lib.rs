#![forbid(unsafe_code)]

//! `hls-relay` — stream session supervisor.
//!
//! Exposes live video sources as segmented HLS by supervising one
//! external transcoding process per active source: admission, lifecycle,
//! readiness detection, metrics, and periodic reconciliation.

pub mod classify;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod readiness;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod sweeper;
pub mod validate;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use supervisor::Supervisor;
