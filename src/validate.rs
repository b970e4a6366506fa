//! Source locator and session identifier validation.
//!
//! Runs before any admission decision: a request that fails here is
//! rejected with `InvalidInput` and has no side effects.

use crate::{AppError, Result};

/// URI schemes accepted as live video sources.
///
/// HTTP covers progressive/FLV-over-HTTP pulls; the rest are the native
/// streaming schemes the engine knows how to ingest.
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "rtsp", "rtmp", "rtmps"];

/// Validate that a source locator is a well-formed URI with an allowed scheme.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if the locator is empty, has no
/// scheme separator, or uses a scheme outside the allow-list.
pub fn validate_source(locator: &str) -> Result<()> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("source locator is empty".into()));
    }

    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Err(AppError::InvalidInput(format!(
            "source locator has no scheme: {trimmed}"
        )));
    };

    if rest.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "source locator has no authority: {trimmed}"
        )));
    }

    let scheme = scheme.to_ascii_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return Err(AppError::InvalidInput(format!(
            "scheme {scheme:?} is not allowed (expected one of {ALLOWED_SCHEMES:?})"
        )));
    }

    Ok(())
}

/// Normalize a session identifier to a filesystem-safe token.
///
/// Alphanumerics, `-`, `_` and `.` pass through; every other character is
/// replaced with `_`. Leading dots are stripped so the token can never
/// name a hidden file or a path traversal component.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` if the identifier is empty or
/// normalizes to the empty string.
pub fn normalize_session_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("session id is empty".into()));
    }

    let normalized: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let normalized = normalized.trim_start_matches('.').to_owned();
    if normalized.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "session id {raw:?} normalizes to an empty token"
        )));
    }

    Ok(normalized)
}
