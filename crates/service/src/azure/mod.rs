//! Storage account gateway contract.
//!
//! The broker core talks to Azure Storage Management and the File Service only
//! through [`StorageAccountGateway`]. A [`GatewayFactory`] binds a gateway to one
//! storage account; the production adapter lives outside this crate.

pub mod account;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use account::{SkuName, StorageAccount};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Request(String),
    #[error("invalid storage account: {0}")]
    InvalidAccount(String),
}

/// Operations on one storage account and its file shares.
#[async_trait]
pub trait StorageAccountGateway: Send + Sync {
    async fn exists(&self) -> Result<bool, GatewayError>;
    async fn create(&self) -> Result<(), GatewayError>;
    async fn delete(&self) -> Result<(), GatewayError>;
    async fn has_share(&self, name: &str) -> Result<bool, GatewayError>;
    async fn create_share(&self, name: &str) -> Result<(), GatewayError>;
    async fn delete_share(&self, name: &str) -> Result<(), GatewayError>;
    /// SMB source for the share, e.g. `//account.file.core.windows.net/share`.
    async fn share_url(&self, name: &str) -> Result<String, GatewayError>;
    async fn access_key(&self) -> Result<String, GatewayError>;
}

/// Builds a gateway bound to the given account coordinates.
pub trait GatewayFactory: Send + Sync {
    fn connect(&self, account: &StorageAccount) -> Result<Arc<dyn StorageAccountGateway>, GatewayError>;
}
