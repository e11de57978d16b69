use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

/// Failures from the storage collaborator the audit subscriber and
/// retention service depend on. Always local: the audit subscriber logs
/// and swallows these, it never propagates them to the publisher.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to persist audit record: {0}")]
    PersistFailed(String),
    #[error("failed to run retention cleanup: {0}")]
    RetentionFailed(String),
}
