//! Single-writer throughput in fixed-size chunks.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::probe::{
    throughput_mbps, BoundedSample, ProbeKind, ProbeMetrics, ProbeResult, ThroughputMetrics,
};

use super::endpoint::Endpoint;

const BACKOFF: Duration = Duration::from_millis(10);

/// Would-block backs off and retries until the deadline; a hard error stops
/// early. Partial progress is always reported.
pub fn run(endpoint: &dyn Endpoint, config: &HarnessConfig) -> ProbeResult {
    let mut handle = match endpoint.open() {
        Ok(handle) => handle,
        Err(e) => {
            return ProbeResult::errored(
                ProbeKind::Throughput,
                format!("open {}: {e}", endpoint.path()),
            )
        }
    };

    let total = config.throughput_total_bytes;
    let chunk = vec![b'x'; config.throughput_chunk_bytes.max(1)];
    let mut errors = BoundedSample::new(config.error_sample_limit);
    let mut written = 0usize;
    let mut backoffs = 0usize;
    let mut stopped = false;

    let start = Instant::now();
    let deadline = start + Duration::from_millis(config.throughput_deadline_ms);
    while written < total {
        if Instant::now() >= deadline {
            errors.record(format!(
                "deadline of {} ms elapsed after {written} bytes",
                config.throughput_deadline_ms
            ));
            stopped = true;
            break;
        }
        let len = chunk.len().min(total - written);
        match handle.write(&chunk[..len]) {
            Ok(0) => {
                errors.record("write accepted 0 bytes");
                stopped = true;
                break;
            }
            Ok(n) => written += n.min(len),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                backoffs += 1;
                std::thread::sleep(BACKOFF);
            }
            Err(e) => {
                errors.record(format!("write failed after {written} bytes: {e}"));
                stopped = true;
                break;
            }
        }
    }
    let elapsed_secs = start.elapsed().as_secs_f64();

    let metrics = ThroughputMetrics {
        requested_bytes: total,
        written_bytes: written,
        elapsed_secs,
        mb_per_sec: throughput_mbps(written, elapsed_secs),
        backoffs,
    };
    ProbeResult::completed(
        ProbeKind::Throughput,
        !stopped && written == total,
        ProbeMetrics::Throughput(metrics),
    )
    .with_errors(errors.into_items())
}
