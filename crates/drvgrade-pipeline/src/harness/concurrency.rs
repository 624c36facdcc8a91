//! Many workers writing to the same endpoint at once.
//!
//! All outcomes land in one mutex-guarded tally, so
//! `success + fail == threads * iterations` holds exactly.

use std::io;
use std::sync::{Mutex, PoisonError};

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::probe::{
    BoundedSample, ConcurrencyMetrics, ProbeKind, ProbeMetrics, ProbeResult,
};

use super::endpoint::Endpoint;

struct Tally {
    success: usize,
    fail: usize,
    errors: BoundedSample,
}

pub fn run(endpoint: &dyn Endpoint, config: &HarnessConfig) -> ProbeResult {
    let threads = config.threads;
    let iterations = config.iterations;
    let payload = vec![b'x'; config.payload_bytes];
    let tally = Mutex::new(Tally {
        success: 0,
        fail: 0,
        errors: BoundedSample::new(config.error_sample_limit),
    });

    std::thread::scope(|scope| {
        for worker in 0..threads {
            let tally = &tally;
            let payload = payload.as_slice();
            scope.spawn(move || {
                let mut handle = endpoint.open();
                for _ in 0..iterations {
                    let outcome = match handle.as_mut() {
                        Ok(h) => h.write(payload).map(|_| ()),
                        Err(e) => Err(io::Error::new(e.kind(), format!("open: {e}"))),
                    };
                    let mut t = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    match outcome {
                        Ok(()) => t.success += 1,
                        Err(e) => {
                            t.fail += 1;
                            t.errors.record(format!("worker {worker}: {e}"));
                        }
                    }
                }
            });
        }
    });

    let tally = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    let metrics = ConcurrencyMetrics {
        threads,
        iterations,
        success: tally.success,
        fail: tally.fail,
    };
    ProbeResult::completed(
        ProbeKind::Concurrency,
        tally.fail == 0,
        ProbeMetrics::Concurrency(metrics),
    )
    .with_errors(tally.errors.into_items())
}
