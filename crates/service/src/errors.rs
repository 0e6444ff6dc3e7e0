use thiserror::Error;

use crate::azure::GatewayError;

/// Errors surfaced by broker operations to the protocol adapter.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    Validation(String),
    #[error("The format of the parameters is not valid JSON")]
    RawParamsInvalid,
    #[error("app_guid is a required field but was not provided")]
    AppGuidNotProvided,
    #[error("instance does not exist")]
    InstanceDoesNotExist,
    #[error("instance already exists")]
    InstanceAlreadyExists,
    #[error("storage account {0:?} is already used by another instance in this space")]
    StorageAccountInUse(String),
    #[error("binding does not exist")]
    BindingDoesNotExist,
    #[error("binding already exists")]
    BindingAlreadyExists,
    /// Create or delete refused by the operator's control settings.
    #[error("{0}")]
    Policy(String),
    /// An Azure call failed; the message carries the resource context.
    #[error("{0}")]
    Gateway(String),
    #[error("unrecognized operationData: {0:?}")]
    UnrecognizedOperation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            BrokerError::Validation(_) => 1001,
            BrokerError::RawParamsInvalid => 1002,
            BrokerError::AppGuidNotProvided => 1003,
            BrokerError::InstanceDoesNotExist => 1101,
            BrokerError::BindingDoesNotExist => 1102,
            BrokerError::InstanceAlreadyExists => 1201,
            BrokerError::BindingAlreadyExists => 1202,
            BrokerError::StorageAccountInUse(_) => 1203,
            BrokerError::Policy(_) => 1301,
            BrokerError::Gateway(_) => 1401,
            BrokerError::UnrecognizedOperation(_) => 1501,
            BrokerError::Store(StoreError::LockTimeout { .. }) => 1601,
            BrokerError::Store(_) => 1600,
        }
    }

    pub(crate) fn gateway(context: impl std::fmt::Display, err: GatewayError) -> Self {
        Self::Gateway(format!("{context}: {err}"))
    }
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    /// Another instance in the same organization and space owns the account.
    #[error("storage account {0:?} is already in use")]
    AccountInUse(String),
    #[error("cannot get the lock {name:?} for update in {seconds} seconds")]
    LockTimeout { name: String, seconds: u64 },
    #[error("database error: {0}")]
    Db(String),
    #[error("state file error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl StoreError {
    pub fn not_found(entity: &str, id: &str) -> Self { Self::NotFound(format!("{entity} {id:?}")) }
    pub fn conflict(entity: &str, id: &str) -> Self { Self::Conflict(format!("{entity} {id:?}")) }
}

impl From<models::errors::ModelError> for StoreError {
    fn from(e: models::errors::ModelError) -> Self {
        match e {
            models::errors::ModelError::Conflict(msg) => StoreError::Conflict(msg),
            other => StoreError::Db(other.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self { StoreError::Db(e.to_string()) }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self { StoreError::Serde(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_names_lock_and_timeout() {
        let err = BrokerError::from(StoreError::LockTimeout { name: "i1-s1".into(), seconds: 30 });
        assert_eq!(err.to_string(), "cannot get the lock \"i1-s1\" for update in 30 seconds");
        assert_eq!(err.code(), 1601);
    }

    #[test]
    fn model_conflict_maps_to_store_conflict() {
        let err: StoreError = models::errors::ModelError::Conflict("dup".into()).into();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
