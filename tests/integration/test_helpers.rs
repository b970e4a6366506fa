//! Shared fixtures: fake engine scripts and test configurations.
//!
//! The engine is faked with `/bin/sh` scripts that accept the real
//! argument set, derive the manifest path from the final argument, and
//! then behave as scripted (write output, emit diagnostics, hang, or
//! exit). Timing knobs are tightened so bounded waits resolve fast.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hls_relay::config::GlobalConfig;

/// Engine that writes a valid manifest referencing 3 chunks, then hangs
/// like a live transcode would.
pub const READY_ENGINE: &str = r#"#!/bin/sh
for a in "$@"; do last="$a"; done
dir=$(dirname "$last")
touch "$dir/seg_00000.ts" "$dir/seg_00001.ts" "$dir/seg_00002.ts"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n' > "$last"
printf '#EXTINF:2.0,\nseg_00000.ts\n#EXTINF:2.0,\nseg_00001.ts\n#EXTINF:2.0,\nseg_00002.ts\n' >> "$last"
exec sleep 60
"#;

/// Engine that produces no output at all and hangs (slow source).
pub const SILENT_ENGINE: &str = "#!/bin/sh\nexec sleep 60\n";

/// Engine that reports a refused connection and hangs.
pub const FATAL_ENGINE: &str = r#"#!/bin/sh
echo "http://src/a.flv: Connection refused" >&2
exec sleep 60
"#;

/// Engine that exits immediately without producing anything.
pub const EXIT_ENGINE: &str = "#!/bin/sh\nexit 1\n";

/// Engine that becomes ready, then emits one diagnostic line while
/// shutting down in response to the termination signal.
pub const NOISY_STOP_ENGINE: &str = r#"#!/bin/sh
trap 'kill $! 2>/dev/null; echo "Error flushing muxer queue" >&2; exit 0' TERM
for a in "$@"; do last="$a"; done
dir=$(dirname "$last")
touch "$dir/seg_00000.ts"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nseg_00000.ts\n' > "$last"
sleep 60 &
wait $!
"#;

/// Write an executable fake engine script into `dir`.
pub fn write_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-engine.sh");
    std::fs::write(&path, body).expect("write engine script");
    let mut perms = std::fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// Build a validated config with tight timing around a fake engine.
pub fn test_config(output_root: &Path, engine: &Path, max_sessions: u32) -> Arc<GlobalConfig> {
    test_config_with(output_root, engine, max_sessions, 600)
}

/// Like [`test_config`] but with an explicit orphan-age threshold.
pub fn test_config_with(
    output_root: &Path,
    engine: &Path,
    max_sessions: u32,
    orphan_age_seconds: u64,
) -> Arc<GlobalConfig> {
    let toml = format!(
        r#"
output_root = "{root}"
max_concurrent_sessions = {max_sessions}

[engine]
binary = "{engine}"

[timing]
readiness_poll_millis = 50
readiness_timeout_seconds = 2
stop_grace_seconds = 1
cleanup_delay_seconds = 0
sweep_interval_seconds = 30
idle_timeout_seconds = 300
max_uptime_seconds = 86400
orphan_age_seconds = {orphan_age_seconds}
"#,
        root = output_root.display(),
        engine = engine.display(),
    );
    Arc::new(GlobalConfig::from_toml_str(&toml).expect("test config"))
}
