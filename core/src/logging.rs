//! Install-time logging setup.
//!
//! Mirrors `distributed-vm/bin/*.rs`'s `setup_logger()` call at the top of
//! `main`, adapted for a plugin that doesn't own its own entrypoint: the
//! log target is whatever the host-supplied `log_file` option names,
//! defaulting to stderr, rather than always stderr.

use std::fs::OpenOptions;
use std::path::Path;

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::error::{Result, TracerError};

fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Initializes the global logger from the plugin's `log_file`/`log_level`
/// options. `log_file == "-"` logs to stderr; any other value is opened as
/// an append-mode file, failing with `MissingLogDirectory` or
/// `LogFileOpenFailed` as appropriate.
///
/// Safe to call at most once per process; a second call is a programming
/// error in the caller, not something this function guards against, since
/// `env_logger::Builder::try_init` already reports it.
pub fn init(log_file: &str, log_level: u8) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(level_filter(log_level));

    if log_file == "-" {
        builder
            .try_init()
            .map_err(|e| TracerError::Failure(e.to_string()))?;
        return Ok(());
    }

    let path = Path::new(log_file);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(TracerError::MissingLogDirectory(parent.display().to_string()));
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TracerError::LogFileOpenFailed(format!("{}: {e}", path.display())))?;

    builder
        .target(Target::Pipe(Box::new(file)))
        .try_init()
        .map_err(|e| TracerError::Failure(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_maps_known_range() {
        assert_eq!(level_filter(0), LevelFilter::Off);
        assert_eq!(level_filter(1), LevelFilter::Error);
        assert_eq!(level_filter(2), LevelFilter::Warn);
        assert_eq!(level_filter(3), LevelFilter::Info);
        assert_eq!(level_filter(4), LevelFilter::Debug);
    }

    #[test]
    fn missing_log_directory_is_reported() {
        let err = init("/definitely/not/a/real/dir/out.log", 3).unwrap_err();
        assert!(matches!(err, TracerError::MissingLogDirectory(_)));
    }
}
