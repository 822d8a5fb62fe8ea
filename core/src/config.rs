//! Plugin option parsing.
//!
//! The host hands the plugin exactly one comma-separated `key=value` string
//! at install time, not an argv a `clap::Parser` could consume. Hand-rolled
//! parsing here mirrors `distributed-vm::common::parse`'s small `FromStr`
//! helper functions, which sit beside that workspace's `clap`-derived
//! configs for the same reason: some inputs just aren't argv.

use crate::error::{Result, TracerError};

pub const DEFAULT_SOCK_PATH: &str = "/dev/shm/cannonball.sock";
pub const DEFAULT_LOG_LEVEL: u8 = 3;

/// Parsed plugin options, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOptions {
    pub log_file: String,
    pub log_level: u8,
    pub sock_path: String,
    pub trace_pc: bool,
    pub trace_reads: bool,
    pub trace_writes: bool,
    pub trace_syscalls: bool,
    pub trace_instrs: bool,
    pub trace_branches: bool,
}

impl Default for PluginOptions {
    fn default() -> Self {
        PluginOptions {
            log_file: "-".to_string(),
            log_level: DEFAULT_LOG_LEVEL,
            sock_path: DEFAULT_SOCK_PATH.to_string(),
            trace_pc: false,
            trace_reads: false,
            trace_writes: false,
            trace_syscalls: false,
            trace_instrs: false,
            trace_branches: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(TracerError::ArgumentError(format!(
            "{key}: expected a boolean literal, got {other:?}"
        ))),
    }
}

impl PluginOptions {
    /// Parses the host-supplied `key=value,key=value,...` string.
    ///
    /// `help` (a bare flag, no `=value`) surfaces as
    /// `TracerError::ArgumentHandlerExit` rather than a parsed value: the
    /// caller is expected to print usage and abort install.
    pub fn parse(raw: &str) -> Result<PluginOptions> {
        let mut options = PluginOptions::default();
        if raw.trim().is_empty() {
            return Ok(options);
        }
        for field in raw.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            if field == "help" {
                return Err(TracerError::ArgumentHandlerExit);
            }
            let (key, value) = field.split_once('=').ok_or_else(|| {
                TracerError::ArgumentError(format!("malformed option {field:?}, expected key=value"))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "log_file" => options.log_file = value.to_string(),
                "log_level" => {
                    let level: u8 = value.parse().map_err(|_| {
                        TracerError::ArgumentError(format!("log_level: invalid integer {value:?}"))
                    })?;
                    if level > 4 {
                        return Err(TracerError::ArgumentError(format!(
                            "log_level: {level} out of range 0-4"
                        )));
                    }
                    options.log_level = level;
                }
                "sock_path" => options.sock_path = value.to_string(),
                "trace_pc" => options.trace_pc = parse_bool(key, value)?,
                "trace_reads" => options.trace_reads = parse_bool(key, value)?,
                "trace_writes" => options.trace_writes = parse_bool(key, value)?,
                "trace_syscalls" => options.trace_syscalls = parse_bool(key, value)?,
                "trace_instrs" => options.trace_instrs = parse_bool(key, value)?,
                "trace_branches" => options.trace_branches = parse_bool(key, value)?,
                other => {
                    return Err(TracerError::ArgumentError(format!(
                        "unknown option {other:?}"
                    )))
                }
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_yields_defaults() {
        assert_eq!(PluginOptions::parse("").unwrap(), PluginOptions::default());
    }

    #[test]
    fn parses_known_options() {
        let opts = PluginOptions::parse(
            "trace_pc=true,trace_syscalls=yes,log_level=4,sock_path=/tmp/x.sock",
        )
        .unwrap();
        assert!(opts.trace_pc);
        assert!(opts.trace_syscalls);
        assert_eq!(opts.log_level, 4);
        assert_eq!(opts.sock_path, "/tmp/x.sock");
    }

    #[test]
    fn help_flag_requests_early_exit() {
        let err = PluginOptions::parse("help").unwrap_err();
        assert!(matches!(err, TracerError::ArgumentHandlerExit));
    }

    #[test]
    fn unknown_key_is_argument_error() {
        let err = PluginOptions::parse("bogus=1").unwrap_err();
        assert!(matches!(err, TracerError::ArgumentError(_)));
    }

    #[test]
    fn out_of_range_log_level_is_rejected() {
        let err = PluginOptions::parse("log_level=9").unwrap_err();
        assert!(matches!(err, TracerError::ArgumentError(_)));
    }

    #[test]
    fn malformed_field_is_rejected() {
        let err = PluginOptions::parse("trace_pc").unwrap_err();
        assert!(matches!(err, TracerError::ArgumentError(_)));
    }
}
