use thiserror::Error;

/// Errors surfaced at the core's boundary with the plugin shim.
///
/// There is no `Success` variant: Rust's `Result<T, TracerError>` already
/// carries that distinction, so an all-clear outcome is just `Ok(())`.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("internal failure: {0}")]
    Failure(String),

    #[error("allocation failed while handling an event")]
    OutOfMemory,

    #[error("invalid plugin argument: {0}")]
    ArgumentError(String),

    #[error("argument handler requested early exit")]
    ArgumentHandlerExit,

    #[error("failed to initialize the batch sender: {0}")]
    SenderInitError(String),

    #[error("invalid log file path: {0}")]
    InvalidLogFilePath(String),

    #[error("log file directory does not exist: {0}")]
    MissingLogDirectory(String),

    #[error("failed to open log file: {0}")]
    LogFileOpenFailed(String),

    #[error("system-mode (whole machine) emulation is not supported")]
    SystemEmulationUnsupported,
}

pub type Result<T> = std::result::Result<T, TracerError>;
