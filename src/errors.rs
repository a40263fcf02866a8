use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

/// Service-level error type.
///
/// Deduction anomalies (unmapped ingredient, cross-store mapping, empty
/// recipe, insufficient stock) are NOT represented here: they are collected
/// into the per-sale result so a sale is never blocked by them. `ServiceError`
/// is reserved for malformed input, configuration problems and
/// infrastructure failures.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// True for failures worth retrying with backoff: connection-level
    /// database errors and lost optimistic-update races. Application-level
    /// failures (missing rows, validation) are never retryable.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::DatabaseError(err) => {
                matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
            }
            ServiceError::ConcurrentModification(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let conn = ServiceError::DatabaseError(DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "connection reset".into(),
        )));
        assert!(conn.is_transient());

        let missing = ServiceError::NotFound("inventory item".into());
        assert!(!missing.is_transient());

        let lost_race = ServiceError::ConcurrentModification(Uuid::new_v4());
        assert!(lost_race.is_transient());
    }
}
