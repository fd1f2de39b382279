use thiserror::Error;

/// User-input errors raised while turning a target specification into addresses.
///
/// These are reported synchronously before any scan starts and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("start and end addresses must be the same IP version")]
    VersionMismatch,

    #[error("start address {start} is greater than end address {end}")]
    ReversedRange { start: String, end: String },

    #[error("range contains {count} addresses, the limit is {cap}")]
    RangeTooLarge { count: u128, cap: usize },
}

/// Errors returned when a scan session cannot be started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("a scan session is already running")]
    AlreadyRunning,

    #[error("no targets to scan")]
    NoTargets,
}
