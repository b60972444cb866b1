use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

use crate::sync_engine::{Classify, ErrorClass, PersistError, PlanningError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Diesel(#[from] DieselError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Pool(_) | Self::Unavailable(_) => ErrorClass::Transient,
            Self::Diesel(DieselError::DatabaseError(kind, _)) => match kind {
                DatabaseErrorKind::SerializationFailure
                | DatabaseErrorKind::ClosedConnection
                | DatabaseErrorKind::UnableToSendCommand => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            Self::Diesel(DieselError::RollbackTransaction) => ErrorClass::Transient,
            Self::Diesel(_) => ErrorClass::Fatal,
        }
    }
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err.class() {
            ErrorClass::Transient => PersistError::transient(message),
            ErrorClass::Fatal => PersistError::fatal(message),
        }
    }
}

impl StoreError {
    pub fn into_existence_error(self) -> PlanningError {
        PlanningError::ExistenceQuery(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;
    use crate::sync_engine::{Classify, ErrorClass, PersistError};
    use diesel::result::Error as DieselError;

    #[test]
    fn unavailable_store_is_transient() {
        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(err.class(), ErrorClass::Transient);
        let persist: PersistError = err.into();
        assert_eq!(persist.class, ErrorClass::Transient);
        assert!(persist.message.contains("connection refused"));
    }

    #[test]
    fn not_found_is_fatal() {
        assert_eq!(StoreError::Diesel(DieselError::NotFound).class(), ErrorClass::Fatal);
    }

    #[test]
    fn existence_error_keeps_message() {
        let err = StoreError::Unavailable("timeout".to_string()).into_existence_error();
        assert!(err.to_string().contains("timeout"));
    }
}
