use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// A schema step was rejected by the store. Fatal for startup.
    #[error("migration '{id}' failed: {reason}")]
    Migration { id: String, reason: String },

    /// A uniqueness index rejected the write. Callers treat this as
    /// "already exists", not as a failure of the store.
    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: i64, actual: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("panel library is disabled")]
    FeatureDisabled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Duplicate(_))
    }
}
