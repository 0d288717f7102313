//! Application error taxonomy.
//!
//! Every fallible operation in the pipeline returns `Result<T, AppError>`.
//! The kind set is closed: callers branch on [`ErrorKind`] to decide whether
//! to retry, short-circuit a single ticker, or abort.

use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    External,
    NoData,
    Invalid,
    Db,
    Calculation,
    Configuration,
    Exhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::RateLimit => "RATELIMIT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::External => "EXTERNAL",
            ErrorKind::NoData => "NODATA",
            ErrorKind::Invalid => "INVALID",
            ErrorKind::Db => "DBERROR",
            ErrorKind::Calculation => "CALCULATION",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Exhausted => "EXHAUSTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("RATELIMIT: {0}")]
    RateLimit(String),

    #[error("TIMEOUT: {0}")]
    Timeout(String),

    #[error("EXTERNAL: {0}")]
    External(String),

    #[error("NODATA: {0}")]
    NoData(String),

    #[error("INVALID: {0}")]
    Invalid(String),

    #[error("DBERROR: {0}")]
    Db(String),

    /// Replicated-store generation mismatch. Reported under the DB family but
    /// kept as its own variant so callers can re-read and re-apply.
    #[error("DBERROR: generation conflict: {0}")]
    Conflict(String),

    #[error("CALCULATION: {0}")]
    Calculation(String),

    #[error("CONFIGURATION: {0}")]
    Configuration(String),

    /// Budget gate tripped. Distinct from `External` so downstream logic can
    /// route to a free fallback instead of retrying.
    #[error("EXHAUSTED: {0}")]
    Exhausted(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RateLimit(_) => ErrorKind::RateLimit,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::External(_) => ErrorKind::External,
            AppError::NoData(_) => ErrorKind::NoData,
            AppError::Invalid(_) => ErrorKind::Invalid,
            AppError::Db(_) | AppError::Conflict(_) => ErrorKind::Db,
            AppError::Calculation(_) => ErrorKind::Calculation,
            AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::Exhausted(_) => ErrorKind::Exhausted,
        }
    }

    /// Whether the backoff retry layer may re-attempt the operation.
    ///
    /// Contract violations, missing data, and configuration problems never
    /// become valid by waiting. Budget exhaustion routes to a fallback, not
    /// a retry. `Db` is deliberately excluded here: persistence failures get
    /// exactly one extra attempt at the call site (`infra::retry_db_once`),
    /// never the exponential-backoff treatment, and a `Conflict` must reach
    /// the caller so it can re-read and re-apply.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimit(_) | AppError::Timeout(_) | AppError::External(_)
        )
    }

    /// Map an HTTP status + body snippet to the matching kind.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            429 => AppError::RateLimit(detail),
            401 | 403 => AppError::External(format!("auth rejected ({status}): {detail}")),
            404 => AppError::NoData(detail),
            400 | 422 => AppError::Invalid(detail),
            s if s >= 500 => AppError::External(format!("{s}: {detail}")),
            s => AppError::External(format!("{s}: {detail}")),
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::External(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Db(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AppError::RateLimit("429".into()).is_retryable());
        assert!(AppError::Timeout("deadline".into()).is_retryable());
        assert!(AppError::External("502".into()).is_retryable());

        assert!(!AppError::NoData("no chain".into()).is_retryable());
        assert!(!AppError::Invalid("mean <= 0".into()).is_retryable());
        assert!(!AppError::Configuration("weights".into()).is_retryable());
        assert!(!AppError::Exhausted("budget".into()).is_retryable());
        assert!(!AppError::Conflict("gen 4 != 5".into()).is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::from_status(429, "slow down").kind(), ErrorKind::RateLimit);
        assert_eq!(AppError::from_status(404, "unknown ticker").kind(), ErrorKind::NoData);
        assert_eq!(AppError::from_status(503, "upstream").kind(), ErrorKind::External);
        assert_eq!(AppError::from_status(422, "bad expiration").kind(), ErrorKind::Invalid);
    }

    #[test]
    fn conflict_reports_under_db_family() {
        let e = AppError::Conflict("expected 7, found 9".into());
        assert_eq!(e.kind(), ErrorKind::Db);
        assert!(e.to_string().starts_with("DBERROR"));
    }
}
