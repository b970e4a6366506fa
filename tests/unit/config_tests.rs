//! Unit tests for configuration parsing and validation.

use hls_relay::config::GlobalConfig;
use hls_relay::AppError;

fn minimal_toml(root: &std::path::Path) -> String {
    format!("output_root = \"{}\"\n", root.display())
}

#[test]
fn minimal_config_gets_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::from_toml_str(&minimal_toml(dir.path())).expect("parse");

    assert_eq!(config.max_concurrent_sessions, 8);
    assert_eq!(config.startup_error_budget, 10);
    assert_eq!(config.session_error_budget, 20);
    assert_eq!(config.engine.binary, "ffmpeg");
    assert_eq!(config.engine.segment_seconds, 2);
    assert_eq!(config.timing.readiness_poll_millis, 1500);
    assert_eq!(config.timing.readiness_timeout_seconds, 40);
    assert_eq!(config.timing.sweep_interval_seconds, 30);
    assert_eq!(config.timing.idle_timeout_seconds, 300);
    assert_eq!(config.timing.max_uptime_seconds, 86_400);
    assert_eq!(config.timing.orphan_age_seconds, 600);
}

#[test]
fn output_root_is_created_and_canonicalized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("a").join("b");
    let toml = format!("output_root = \"{}\"\n", nested.display());

    let config = GlobalConfig::from_toml_str(&toml).expect("parse");
    assert!(nested.is_dir());
    assert!(config.output_root.is_absolute());
}

#[test]
fn explicit_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
output_root = "{root}"
max_concurrent_sessions = 2

[engine]
binary = "/opt/ffmpeg/bin/ffmpeg"
segment_seconds = 4
retained_segments = 10
extra_args = ["-reconnect", "1"]

[timing]
idle_timeout_seconds = 60
"#,
        root = dir.path().display()
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("parse");
    assert_eq!(config.max_concurrent_sessions, 2);
    assert_eq!(config.engine.binary, "/opt/ffmpeg/bin/ffmpeg");
    assert_eq!(config.engine.segment_seconds, 4);
    assert_eq!(config.engine.retained_segments, 10);
    assert_eq!(config.engine.extra_args, vec!["-reconnect", "1"]);
    assert_eq!(config.timing.idle_timeout_seconds, 60);
    // Unspecified timing values keep defaults.
    assert_eq!(config.timing.sweep_interval_seconds, 30);
}

#[test]
fn zero_capacity_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "output_root = \"{}\"\nmax_concurrent_sessions = 0\n",
        dir.path().display()
    );
    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn zero_segment_duration_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "output_root = \"{}\"\n\n[engine]\nsegment_seconds = 0\n",
        dir.path().display()
    );
    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn malformed_toml_is_rejected() {
    assert!(matches!(
        GlobalConfig::from_toml_str("output_root = [broken"),
        Err(AppError::Config(_))
    ));
}
