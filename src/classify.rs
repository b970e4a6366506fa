//! Engine output classification.
//!
//! The transcoding engine exposes no structured health API — only
//! free-text diagnostic streams. This module is the single seam that
//! turns those lines into a small tagged-event type consumed by both the
//! readiness path and the metrics collector. All brittle text matching
//! lives here and nowhere else.

/// Classified engine output event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine announced it opened the manifest for writing (soft-ready).
    OutputOpened,
    /// Engine opened a new chunk file for writing.
    ChunkProduced,
    /// Engine is re-establishing the source connection.
    Reconnect,
    /// Engine reported an error condition.
    Error {
        /// Whether the condition aborts startup rather than waiting out
        /// the readiness timeout.
        fatal: bool,
        /// The raw line, kept as the last-error detail string.
        detail: String,
    },
    /// Line matched no known pattern; logged by the caller, no metric effect.
    Unclassified,
}

/// Substrings that mark a line as a fatal startup condition.
const FATAL_PATTERNS: &[&str] = &[
    "Connection refused",
    "Connection timed out",
    "No route to host",
    "Network is unreachable",
    "Name or service not known",
    "Failed to resolve hostname",
    "Invalid data found",
    "404 Not Found",
    "Server returned 404",
    "Server returned 403",
    "Immediate exit requested",
];

/// Substrings that mark a non-fatal error line.
const ERROR_PATTERNS: &[&str] = &[
    "error",
    "Error",
    "failed",
    "Failed",
    "Broken pipe",
    "Conversion failed",
];

/// Substrings that mark a reconnect attempt.
const RECONNECT_PATTERNS: &[&str] = &["reconnect", "Reconnecting", "will reconnect"];

/// Classify one engine output line into an [`EngineEvent`].
///
/// First-match-wins, most specific first: chunk/manifest writes, then
/// reconnects, then fatal errors, then generic errors. A line that
/// mentions the manifest extension while opening a file is the soft-ready
/// signal; one that opens any other file in the output directory is a
/// produced chunk.
#[must_use]
pub fn classify_line(line: &str) -> EngineEvent {
    // ffmpeg logs `Opening 'path' for writing` for every muxer output.
    if line.contains("for writing") && line.contains("Opening") {
        if line.contains(".m3u8") {
            return EngineEvent::OutputOpened;
        }
        return EngineEvent::ChunkProduced;
    }

    if RECONNECT_PATTERNS.iter().any(|p| line.contains(p)) {
        return EngineEvent::Reconnect;
    }

    if FATAL_PATTERNS.iter().any(|p| line.contains(p)) {
        return EngineEvent::Error {
            fatal: true,
            detail: line.trim().to_owned(),
        };
    }

    if ERROR_PATTERNS.iter().any(|p| line.contains(p)) {
        return EngineEvent::Error {
            fatal: false,
            detail: line.trim().to_owned(),
        };
    }

    EngineEvent::Unclassified
}
