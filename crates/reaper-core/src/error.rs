use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The OS refused to hand out a system-wide process listing. Nothing was attempted.
    #[error("process table snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// The grouping object could not be allocated. The session runs with sweep-only
    /// containment.
    #[error("failed to create containment group: {0}")]
    GroupCreateFailed(String),

    /// The group exists but will not kill its members on release.
    #[error("failed to configure kill-on-release for containment group: {0}")]
    GroupConfigureFailed(String),
}
