//! Persistence errors
//!
//! Catalog and artifact store failures share one error type. The service
//! layer turns conflicts into publish rejections and connectivity failures
//! into `StorageUnavailable`.

use thiserror::Error;

/// Result type alias for persistence operations
pub type DbResult<T> = Result<T, DbError>;

/// Persistence-layer errors
#[derive(Debug, Error)]
pub enum DbError {
    /// The database could not be reached
    #[error("database unreachable: {0}")]
    Connection(String),

    /// No pooled connection became available in time
    #[error("connection pool: {0}")]
    Pool(String),

    /// A statement failed for a non-transient reason
    #[error("query failed: {0}")]
    Query(String),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    Migration(String),

    /// Serialization failure or deadlock; the transaction may be replayed
    #[error("transaction aborted: {0}")]
    Transaction(String),

    /// Release, channel or artifact does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The (project, channel, version) triple is taken
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Monotonic channel refused a version that is not newer than its latest
    #[error("{0}")]
    OutOfOrder(String),

    /// Raw SQLSTATE 23505 before it is attributed to a release
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Row points at a parent that does not exist (SQLSTATE 23503)
    #[error("missing referenced row: {0}")]
    MissingReference(String),

    /// Check or not-null constraint rejected the row
    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    /// Stored row could not be turned back into domain types
    #[error("corrupt row: {0}")]
    InvalidData(String),

    /// Artifact blob I/O failed
    #[error("artifact storage: {0}")]
    Storage(String),

    /// Bad connection settings
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Anything sqlx reports that fits none of the above
    #[error("internal database error: {0}")]
    Internal(String),

    /// Domain validation failed while decoding a row
    #[error(transparent)]
    Domain(#[from] update_butler_core::ButlerError),
}

impl DbError {
    /// Whether the lookup target was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }

    /// Whether the write lost to an existing release
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DbError::AlreadyExists(_) | DbError::UniqueViolation(_))
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Connection(_)
                | DbError::Pool(_)
                | DbError::Transaction(_)
                | DbError::Storage(_)
        )
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                match db_err.code().as_deref() {
                    Some("23505") => DbError::UniqueViolation(message),
                    Some("23503") => DbError::MissingReference(message),
                    Some(code) if code.starts_with("23") => DbError::ConstraintViolation(message),
                    Some("40001") | Some("40P01") => DbError::Transaction(message),
                    _ => DbError::Query(message),
                }
            }
            sqlx::Error::PoolTimedOut => {
                DbError::Pool("timed out waiting for a connection".to_string())
            }
            sqlx::Error::PoolClosed => DbError::Pool("pool is closed".to_string()),
            sqlx::Error::Io(e) => DbError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => DbError::Connection(format!("tls: {}", e)),
            sqlx::Error::Protocol(msg) => DbError::Connection(format!("protocol: {}", msg)),
            sqlx::Error::ColumnNotFound(column) => {
                DbError::InvalidData(format!("no column {}", column))
            }
            sqlx::Error::Decode(e) => DbError::InvalidData(e.to_string()),
            sqlx::Error::Migrate(e) => DbError::Migration(e.to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

impl From<url::ParseError> for DbError {
    fn from(err: url::ParseError) -> Self {
        DbError::Configuration(format!("database url: {}", err))
    }
}

/// Filesystem errors from the artifact store
impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => DbError::NotFound(format!("artifact ({})", err)),
            _ => DbError::Storage(err.to_string()),
        }
    }
}
