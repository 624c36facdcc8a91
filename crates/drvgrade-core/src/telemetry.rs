//! Tracing setup for the drvgrade binary.
//!
//! Human-readable (or JSON) lines go to stderr, keeping stdout for the
//! report. An optional log file receives every event as JSON together with
//! the enclosing `drvgrade.run` span, so each line names its run id and
//! source file.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::Result;

/// Install the global subscriber. Only the first call in a process takes
/// effect.
///
/// `level` applies when `RUST_LOG` is unset. Fails only if `log_file`
/// cannot be opened for appending.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    let (plain, structured) = if json {
        let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);
        (None, Some(stderr.json().with_current_span(true)))
    } else {
        let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);
        (Some(stderr), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .with(file_layer)
        .try_init()
        .ok();
    Ok(())
}

/// Open `path` for appending, creating missing parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_init_twice_is_noop() {
        init_tracing(false, Level::WARN, None).unwrap();
        init_tracing(true, Level::DEBUG, None).unwrap();
    }

    #[test]
    fn test_log_file_appends_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("drvgrade.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_tracing(false, Level::WARN, Some(dir.path())).unwrap_err();
        assert!(matches!(err, crate::error::EvalError::Io(_)));
    }
}
