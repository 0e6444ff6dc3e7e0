use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::json_document_store::JsonDocumentStore;
use super::{BrokerStore, ShareLock};
use crate::broker::domain::{BindingDetails, FileShare, ServiceInstance};
use crate::errors::StoreError;

/// On-disk shape of the file store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerState {
    #[serde(default)]
    pub instances: BTreeMap<String, ServiceInstance>,
    #[serde(default)]
    pub bindings: BTreeMap<String, BindingDetails>,
}

/// Single-process store backed by one JSON file.
///
/// Every mutation rewrites the file. Locks are no-ops, so two broker
/// processes must never share a state file.
pub struct FileStore {
    doc: JsonDocumentStore<BrokerState>,
}

impl FileStore {
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let doc = JsonDocumentStore::<BrokerState>::open(path).await?;
        let (instances, bindings) = doc.read(|s| (s.instances.len(), s.bindings.len())).await;
        info!(path = ?doc.path(), instances, bindings, "file_store_opened");
        Ok(Self { doc })
    }

    pub fn in_memory() -> Self {
        Self { doc: JsonDocumentStore::in_memory() }
    }
}

fn instance_mut<'a>(state: &'a mut BrokerState, id: &str) -> Result<&'a mut ServiceInstance, StoreError> {
    state.instances.get_mut(id).ok_or_else(|| StoreError::not_found("service instance", id))
}

/// One instance per storage account within an organization and space.
fn same_account(a: &ServiceInstance, b: &ServiceInstance) -> bool {
    a.organization_guid == b.organization_guid
        && a.space_guid == b.space_guid
        && a.storage_account_name == b.storage_account_name
}

#[async_trait]
impl BrokerStore for FileStore {
    async fn retrieve_instance(&self, id: &str) -> Result<ServiceInstance, StoreError> {
        self.doc
            .read(|s| s.instances.get(id).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("service instance", id))
    }

    async fn create_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                if s.instances.contains_key(id) {
                    return Err(StoreError::conflict("service instance", id));
                }
                if s.instances.values().any(|other| same_account(other, instance)) {
                    return Err(StoreError::AccountInUse(instance.storage_account_name.clone()));
                }
                s.instances.insert(id.to_string(), instance.clone());
                Ok(())
            })
            .await
    }

    async fn update_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                let stored = instance_mut(s, id)?;
                let shares = std::mem::take(&mut stored.file_shares);
                *stored = ServiceInstance { file_shares: shares, ..instance.clone() };
                Ok(())
            })
            .await
    }

    async fn delete_instance(&self, id: &str) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                s.instances.remove(id).map(|_| ()).ok_or_else(|| StoreError::not_found("service instance", id))
            })
            .await
    }

    async fn retrieve_binding(&self, id: &str) -> Result<BindingDetails, StoreError> {
        self.doc
            .read(|s| s.bindings.get(id).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("service binding", id))
    }

    async fn create_binding(&self, id: &str, details: &BindingDetails) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                if s.bindings.contains_key(id) {
                    return Err(StoreError::conflict("service binding", id));
                }
                s.bindings.insert(id.to_string(), details.clone());
                Ok(())
            })
            .await
    }

    async fn delete_binding(&self, id: &str) -> Result<(), StoreError> {
        self.doc
            .update(|s| s.bindings.remove(id).map(|_| ()).ok_or_else(|| StoreError::not_found("service binding", id)))
            .await
    }

    async fn retrieve_file_share(&self, instance_id: &str, name: &str) -> Result<Option<FileShare>, StoreError> {
        self.doc
            .read(|s| {
                s.instances
                    .get(instance_id)
                    .map(|i| i.file_shares.get(name).cloned())
                    .ok_or_else(|| StoreError::not_found("service instance", instance_id))
            })
            .await
    }

    async fn create_file_share(&self, share: &FileShare) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                let instance = instance_mut(s, &share.instance_id)?;
                if instance.file_shares.contains_key(&share.file_share_name) {
                    return Err(StoreError::conflict("file share", &share.file_share_name));
                }
                instance.file_shares.insert(share.file_share_name.clone(), share.clone());
                Ok(())
            })
            .await
    }

    async fn update_file_share(&self, share: &FileShare) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                let instance = instance_mut(s, &share.instance_id)?;
                let stored = instance
                    .file_shares
                    .get_mut(&share.file_share_name)
                    .ok_or_else(|| StoreError::not_found("file share", &share.file_share_name))?;
                *stored = share.clone();
                Ok(())
            })
            .await
    }

    async fn delete_file_share(&self, instance_id: &str, name: &str) -> Result<(), StoreError> {
        self.doc
            .update(|s| {
                instance_mut(s, instance_id)?
                    .file_shares
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| StoreError::not_found("file share", name))
            })
            .await
    }

    async fn acquire_lock(&self, name: &str, _timeout_secs: u64) -> Result<ShareLock, StoreError> {
        debug!(lock = name, "file_store_lock_noop");
        Ok(ShareLock::noop(name))
    }

    async fn save(&self) -> Result<(), StoreError> {
        self.doc.save().await
    }

    async fn restore(&self) -> Result<(), StoreError> {
        self.doc.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bind_details, instance, share};

    #[tokio::test]
    async fn instance_and_binding_crud() -> anyhow::Result<()> {
        let store = FileStore::in_memory();
        store.create_instance("i1", &instance("acct")).await?;
        assert!(store.is_instance_conflict("i1").await);
        assert!(matches!(store.create_instance("i1", &instance("other")).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.retrieve_instance("i1").await?.storage_account_name, "acct");

        store.create_binding("b1", &bind_details("s1")).await?;
        assert!(store.is_binding_conflict("b1").await);
        assert!(matches!(store.create_binding("b1", &bind_details("s1")).await, Err(StoreError::Conflict(_))));
        store.delete_binding("b1").await?;
        assert!(!store.is_binding_conflict("b1").await);
        assert!(matches!(store.delete_binding("b1").await, Err(StoreError::NotFound(_))));

        store.delete_instance("i1").await?;
        assert!(matches!(store.retrieve_instance("i1").await, Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn account_is_owned_by_one_instance_per_space() -> anyhow::Result<()> {
        let store = FileStore::in_memory();
        store.create_instance("i1", &instance("acct")).await?;
        let err = store.create_instance("i2", &instance("acct")).await.expect_err("account taken");
        assert!(matches!(err, StoreError::AccountInUse(ref a) if a == "acct"));

        let mut elsewhere = instance("acct");
        elsewhere.space_guid = "other-space".into();
        store.create_instance("i3", &elsewhere).await?;
        Ok(())
    }

    #[tokio::test]
    async fn share_records_are_independent_of_instance_updates() -> anyhow::Result<()> {
        let store = FileStore::in_memory();
        store.create_instance("i1", &instance("acct")).await?;
        assert_eq!(store.retrieve_file_share("i1", "s1").await?, None);
        assert!(matches!(store.retrieve_file_share("nope", "s1").await, Err(StoreError::NotFound(_))));

        store.create_file_share(&share("i1", "s1", 1)).await?;
        store.create_file_share(&share("i1", "s2", 1)).await?;
        store.update_file_share(&share("i1", "s1", 3)).await?;

        // an instance update carries no shares but must not drop the stored ones
        let mut updated = instance("acct");
        updated.use_https = false;
        store.update_instance("i1", &updated).await?;

        let got = store.retrieve_instance("i1").await?;
        assert!(!got.use_https);
        assert_eq!(got.file_shares.len(), 2);
        assert_eq!(got.file_shares["s1"].count, 3);

        store.delete_file_share("i1", "s1").await?;
        assert_eq!(store.retrieve_file_share("i1", "s1").await?, None);
        assert!(matches!(store.update_file_share(&share("i1", "s1", 1)).await, Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn state_file_round_trips_through_restore() -> anyhow::Result<()> {
        let tmp = std::env::temp_dir().join(format!("file_store_{}.json", uuid::Uuid::new_v4()));
        let store = FileStore::open(&tmp).await?;
        store.create_instance("i1", &instance("acct")).await?;
        store.create_file_share(&share("i1", "s1", 2)).await?;
        store.create_binding("b1", &bind_details("s1")).await?;

        let raw: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&tmp).await?)?;
        assert!(raw["instances"]["i1"].is_object());
        assert!(raw["bindings"]["b1"].is_object());

        let reopened = FileStore::open(&tmp).await?;
        assert_eq!(reopened.retrieve_file_share("i1", "s1").await?.map(|s| s.count), Some(2));

        store.delete_binding("b1").await?;
        reopened.restore().await?;
        assert!(!reopened.is_binding_conflict("b1").await);

        let _ = tokio::fs::remove_file(&tmp).await;
        Ok(())
    }
}
