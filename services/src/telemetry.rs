//! Process-wide tracing setup.

use crate::config::{LogEncoding, LogOutput, LoggerConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging setup errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log file path does not name a file.
    #[error("Log output path {} does not name a file", path.display())]
    InvalidPath {
        /// Configured path
        path: PathBuf,
    },

    /// The log file could not be opened.
    #[error("Cannot open log file {}: {source}", path.display())]
    Open {
        /// Configured path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: InitError,
    },

    /// A global subscriber is already installed.
    #[error(transparent)]
    Init(#[from] TryInitError),
}

/// Writer for `output`.
///
/// Files are opened for appending and created along with missing parent
/// directories.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the file cannot be opened.
pub fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, TelemetryError> {
    match output {
        LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
        LogOutput::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
        LogOutput::File(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| TelemetryError::InvalidPath { path: path.clone() })?;
            let directory = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy())
                .build(directory)
                .map_err(|source| TelemetryError::Open {
                    path: path.clone(),
                    source,
                })?;
            Ok(BoxMakeWriter::new(appender))
        },
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured level. ANSI
/// colours are only used on terminal streams.
///
/// # Errors
///
/// Returns an error if the output cannot be opened or a global subscriber is
/// already installed.
pub fn init(config: &LoggerConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let writer = make_writer(&config.output)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.encoding {
        LogEncoding::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer),
            )
            .try_init()?,
        LogEncoding::Console => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.output.is_stream())
                    .with_writer(writer),
            )
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn file_output_appends_to_the_configured_file() {
        let dir = std::env::temp_dir().join(format!("eda-telemetry-{}", uuid::Uuid::new_v4()));
        let path = dir.join("logs").join("service.log");
        let writer = make_writer(&LogOutput::File(path.clone())).unwrap();

        writer.make_writer().write_all(b"first\n").unwrap();
        writer.make_writer().write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let err = make_writer(&LogOutput::File(PathBuf::from(".."))).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidPath { .. }));
    }
}
