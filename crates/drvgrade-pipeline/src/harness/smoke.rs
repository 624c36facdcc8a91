//! Write a payload, then poll for anything to read back.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::probe::{BoundedSample, ProbeKind, ProbeMetrics, ProbeResult, SmokeMetrics};

use super::endpoint::Endpoint;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_BUFFER: usize = 256;

/// Passes when the write did not hard-fail or any bytes came back.
pub fn run(endpoint: &dyn Endpoint, config: &HarnessConfig) -> ProbeResult {
    let mut handle = match endpoint.open() {
        Ok(handle) => handle,
        Err(e) => {
            return ProbeResult::errored(ProbeKind::Smoke, format!("open {}: {e}", endpoint.path()))
        }
    };
    let mut errors = BoundedSample::new(config.error_sample_limit);

    let payload = config.smoke_payload.as_bytes();
    let (bytes_written, write_hard_failed) = match handle.write(payload) {
        Ok(n) => (n, false),
        Err(e) if e.kind() == ErrorKind::WouldBlock => {
            errors.record(format!("write would block: {e}"));
            (0, false)
        }
        Err(e) => {
            errors.record(format!("write failed: {e}"));
            (0, true)
        }
    };

    let deadline = Instant::now() + Duration::from_millis(config.smoke_read_timeout_ms);
    let mut buf = [0u8; READ_BUFFER];
    let mut read_back: Vec<u8> = Vec::new();
    loop {
        match handle.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                read_back.extend_from_slice(&buf[..n]);
                break;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                errors.record(format!("read failed: {e}"));
                break;
            }
        }
    }

    let bytes_read = read_back.len();
    let metrics = SmokeMetrics {
        bytes_written,
        bytes_read,
        read_preview: (bytes_read > 0).then(|| String::from_utf8_lossy(&read_back).into_owned()),
    };
    ProbeResult::completed(
        ProbeKind::Smoke,
        !write_hard_failed || bytes_read > 0,
        ProbeMetrics::Smoke(metrics),
    )
    .with_errors(errors.into_items())
}
