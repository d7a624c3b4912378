use safecircle_core::errors::{DatabaseError, Error};
use thiserror::Error;

/// Storage-layer failures before they are mapped onto the core error type.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A core error raised inside a write transaction.
    #[error(transparent)]
    Core(Box<Error>),
}

impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        StorageError::Core(Box::new(err))
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Query(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::Pool(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Connection(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Migration(msg) => Error::Database(DatabaseError::MigrationFailed(msg)),
            StorageError::Io(e) => Error::Database(DatabaseError::Internal(e.to_string())),
            StorageError::Core(e) => *e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_survive_the_round_trip() {
        let storage: StorageError = Error::validation("bad key").into();
        let core: Error = storage.into();
        assert!(matches!(core, Error::Validation(msg) if msg == "bad key"));
    }

    #[test]
    fn diesel_errors_map_to_query_failures() {
        let core: Error = StorageError::from(diesel::result::Error::NotFound).into();
        assert!(matches!(
            core,
            Error::Database(DatabaseError::QueryFailed(_))
        ));
        assert!(core.is_persistence());
    }
}
