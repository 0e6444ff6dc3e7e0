//! Persistence for service instances, bindings and file-share reference counts.
//!
//! Two interchangeable backends implement [`BrokerStore`]:
//! - [`file_store::FileStore`]: one JSON document rewritten after every mutation,
//!   locks are no-ops (single broker process only).
//! - [`sql_store::SqlStore`]: rows via sea-orm, with database advisory locks for
//!   cross-process exclusion on a file share.

pub mod json_document_store;
pub mod file_store;
pub mod sql_store;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::broker::domain::{BindingDetails, FileShare, ServiceInstance};
use crate::errors::StoreError;

/// Advisory lock acquisition timeout for share mutations.
pub const LOCK_TIMEOUT_SECS: u64 = 30;

/// Lock name guarding one share of one instance.
pub fn file_share_lock_name(instance_id: &str, file_share_name: &str) -> String {
    format!("{instance_id}-{file_share_name}")
}

/// A held share lock.
///
/// Give it back with [`ShareLock::release`]. A lock dropped without release,
/// as happens when a bind or unbind future is cancelled, frees itself.
#[must_use = "the lock is freed as soon as it is dropped"]
pub struct ShareLock {
    name: String,
    held: Option<sql_store::HeldLock>,
}

impl ShareLock {
    /// A lock with nothing behind it.
    pub(crate) fn noop(name: &str) -> Self {
        Self { name: name.to_string(), held: None }
    }

    pub(crate) fn held(name: &str, held: sql_store::HeldLock) -> Self {
        Self { name: name.to_string(), held: Some(held) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) -> Result<(), StoreError> {
        if let Some(held) = self.held.take() {
            held.release(&self.name).await?;
            debug!(lock = %self.name, "lock_released");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ShareLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareLock")
            .field("name", &self.name)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl Drop for ShareLock {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            warn!(lock = %self.name, "lock_dropped_without_release");
            held.abandon(&self.name);
        }
    }
}

#[async_trait]
pub trait BrokerStore: Send + Sync {
    /// Returns the instance with its file shares populated.
    async fn retrieve_instance(&self, id: &str) -> Result<ServiceInstance, StoreError>;
    async fn create_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError>;
    /// Updates the instance's own fields; file shares are persisted through the share operations.
    async fn update_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError>;
    async fn delete_instance(&self, id: &str) -> Result<(), StoreError>;

    async fn retrieve_binding(&self, id: &str) -> Result<BindingDetails, StoreError>;
    async fn create_binding(&self, id: &str, details: &BindingDetails) -> Result<(), StoreError>;
    async fn delete_binding(&self, id: &str) -> Result<(), StoreError>;

    /// `Ok(None)` when the instance exists but does not know the share.
    async fn retrieve_file_share(&self, instance_id: &str, name: &str) -> Result<Option<FileShare>, StoreError>;
    async fn create_file_share(&self, share: &FileShare) -> Result<(), StoreError>;
    async fn update_file_share(&self, share: &FileShare) -> Result<(), StoreError>;
    async fn delete_file_share(&self, instance_id: &str, name: &str) -> Result<(), StoreError>;

    async fn is_instance_conflict(&self, id: &str) -> bool {
        self.retrieve_instance(id).await.is_ok()
    }

    async fn is_binding_conflict(&self, id: &str) -> bool {
        self.retrieve_binding(id).await.is_ok()
    }

    /// Blocks up to `timeout_secs`, then fails with [`StoreError::LockTimeout`].
    async fn acquire_lock(&self, name: &str, timeout_secs: u64) -> Result<ShareLock, StoreError>;

    /// Flush the whole state to durable storage.
    async fn save(&self) -> Result<(), StoreError>;
    /// Reload the whole state from durable storage.
    async fn restore(&self) -> Result<(), StoreError>;
}
