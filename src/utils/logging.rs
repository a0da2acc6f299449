//! Structured logging setup driven by [`LoggingConfig`].

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global `tracing` subscriber.
///
/// Console output goes to stderr. When file logging is enabled the file is
/// opened in append mode and receives the same events. Nothing is written to
/// stderr when the console is off.
///
/// # Errors
/// `ConfigError` if neither output is enabled, the log file cannot be opened,
/// or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let writer = make_writer(config)?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_writer(writer);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    let file = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ProtocolError::ConfigError(format!("Failed to open log file {path}: {e}"))
                })?,
        ),
        (true, None) => {
            return Err(ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".to_string(),
            ))
        }
        _ => None,
    };

    match (config.log_to_console, file) {
        (true, Some(file)) => Ok(BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file)))),
        (false, Some(file)) => Ok(BoxMakeWriter::new(Mutex::new(file))),
        (true, None) => Ok(BoxMakeWriter::new(std::io::stderr)),
        (false, None) => Err(ProtocolError::ConfigError(
            "At least one logging output (console or file) must be enabled".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_output_rejected() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_file_only_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: true,
            log_file_path: Some(path.to_string_lossy().into_owned()),
            ..LoggingConfig::default()
        };
        assert!(make_writer(&config).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_file_without_path_rejected() {
        let config = LoggingConfig {
            log_to_file: true,
            ..LoggingConfig::default()
        };
        assert!(make_writer(&config).is_err());
    }
}
