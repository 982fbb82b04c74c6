use sea_orm::DbErr;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure taxonomy of the pipeline engine.
///
/// `Conflict` is the only retryable variant; everything else is surfaced to
/// the caller verbatim. A failed operation never leaves a partially
/// renumbered board behind (the transaction is the atomicity boundary).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage not found")]
    StageNotFound,
    #[error("deal not found")]
    DealNotFound,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("concurrent modification, retry against fresh state")]
    Conflict,
    #[error("deal is locked; reopen it before moving")]
    DealLocked,
    #[error("stage still contains deals; supply a reassignment target")]
    StageNotEmpty,
    #[error("storage failure")]
    Internal(#[source] DbErr),
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Machine-readable code attached to GraphQL error extensions.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StageNotFound | Self::DealNotFound => "NOT_FOUND",
            Self::InvalidArgument(_) => "BAD_REQUEST",
            Self::Conflict => "CONFLICT",
            Self::DealLocked | Self::StageNotEmpty => "PRECONDITION_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Serialization failures, deadlocks and SQLite writer contention all mean
/// the same thing to callers: re-read and retry.
fn retryable_db_error(err: &DbErr) -> bool {
    let text = err.to_string();
    text.contains("40001")
        || text.contains("40P01")
        || text.contains("deadlock detected")
        || text.contains("database is locked")
}

impl From<DbErr> for PipelineError {
    fn from(err: DbErr) -> Self {
        if retryable_db_error(&err) {
            Self::Conflict
        } else {
            Self::Internal(err)
        }
    }
}
