use thiserror::Error;

/// Failure talking to the seen-identity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Other(String),
}

/// Errors a cycle or rule load can surface to the caller.
///
/// Missing fields and unresolvable identities never show up here: the
/// extractor substitutes sentinels or drops the card and counts it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed filter rules: {reason}")]
    FilterRuleMalformed { reason: String },
    #[error("seen store unavailable")]
    SeenStoreUnavailable(#[source] StoreError),
    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::FilterRuleMalformed {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::SeenStoreUnavailable(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
