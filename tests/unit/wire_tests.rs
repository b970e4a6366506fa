//! Unit tests pinning the JSON shapes the HTTP layer will serve.

use chrono::{TimeZone, Utc};

use hls_relay::metrics::MetricsSnapshot;
use hls_relay::session::{SessionDescriptor, SessionState};
use hls_relay::supervisor::{Health, StatusReport, StopOutcome};

fn descriptor() -> SessionDescriptor {
    SessionDescriptor {
        id: "cam1".to_owned(),
        source: "rtsp://cam.local/ch0".to_owned(),
        manifest_url: "/streams/cam1/stream.m3u8".to_owned(),
        started_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("ts"),
        uptime_seconds: 42,
        state: SessionState::Active,
    }
}

#[test]
fn descriptor_serializes_with_snake_case_state() {
    let json = serde_json::to_value(descriptor()).expect("serialize");
    assert_eq!(json["id"], "cam1");
    assert_eq!(json["manifest_url"], "/streams/cam1/stream.m3u8");
    assert_eq!(json["uptime_seconds"], 42);
    assert_eq!(json["state"], "active");
}

#[test]
fn inactive_status_is_a_flat_active_false_object() {
    let json = serde_json::to_value(StatusReport::Inactive { active: false }).expect("serialize");
    assert_eq!(json, serde_json::json!({ "active": false }));
}

#[test]
fn active_status_inlines_descriptor_and_metrics() {
    let report = StatusReport::Active {
        active: true,
        descriptor: descriptor(),
        manifest_exists: true,
        segment_count_manifest: 3,
        segment_count_disk: 3,
        metrics: MetricsSnapshot {
            reconnect_count: 1,
            error_count: 2,
            segment_count: 3,
            last_error: Some("tag error".to_owned()),
        },
    };

    let json = serde_json::to_value(report).expect("serialize");
    // Untagged: no enum wrapper object around the payload.
    assert_eq!(json["active"], true);
    assert_eq!(json["descriptor"]["state"], "active");
    assert_eq!(json["segment_count_manifest"], 3);
    assert_eq!(json["metrics"]["last_error"], "tag error");
}

#[test]
fn stop_outcome_carries_final_metrics() {
    let outcome = StopOutcome::Stopped {
        metrics: MetricsSnapshot {
            reconnect_count: 0,
            error_count: 0,
            segment_count: 7,
            last_error: None,
        },
    };

    let json = serde_json::to_value(outcome).expect("serialize");
    assert_eq!(json["stopped"]["metrics"]["segment_count"], 7);
    assert_eq!(json["stopped"]["metrics"]["last_error"], serde_json::Value::Null);
}

#[test]
fn health_reports_engine_and_capacity() {
    let health = Health {
        engine_available: true,
        active_count: 2,
        capacity: 8,
    };

    let json = serde_json::to_value(health).expect("serialize");
    assert_eq!(
        json,
        serde_json::json!({
            "engine_available": true,
            "active_count": 2,
            "capacity": 8,
        })
    );
}
