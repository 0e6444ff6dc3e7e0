use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::domain::{
    BindDetails, BindOptions, Binding, Configuration, DeprovisionServiceSpec, FileShare, LastOperation,
    ProvisionDetails, ProvisionedServiceSpec, Service, ServiceInstance, ServicePlan, SharedDevice, VolumeMount,
};
use super::mount::MountOptions;
use super::shares::{self, Release};
use crate::azure::{GatewayFactory, StorageAccount, StorageAccountGateway};
use crate::errors::{BrokerError, StoreError};
use crate::storage::{file_share_lock_name, BrokerStore, ShareLock, LOCK_TIMEOUT_SECS};

const DEFAULT_CONTAINER_PATH: &str = "/var/vcap/data";
const DRIVER_NAME: &str = "smbdriver";
const DEVICE_TYPE_SHARED: &str = "shared";
const PLAN_ID: &str = "06948cb0-cad7-4buh-leba-9ed8b5c345a4";
const PLAN_NAME: &str = "AzureFileShare";

/// Settings the broker reads on every call.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub service: configs::ServiceConfig,
    pub azure: configs::AzureConfig,
    pub control: configs::ControlConfig,
    pub mount: MountOptions,
}

impl BrokerSettings {
    pub fn from_config(cfg: &configs::BrokerConfig) -> Result<Self, BrokerError> {
        Ok(Self {
            service: cfg.service.clone(),
            azure: cfg.azure.clone(),
            control: cfg.control,
            mount: MountOptions::from_config(&cfg.mount)?,
        })
    }
}

/// The broker context: one per process.
///
/// All lifecycle calls run under one async mutex. Share reference counts are
/// additionally guarded by a per-share store lock, which is what keeps two
/// broker processes on one SQL store from racing on the same Azure share.
pub struct Broker {
    store: Arc<dyn BrokerStore>,
    gateways: Arc<dyn GatewayFactory>,
    settings: BrokerSettings,
    mutex: Mutex<()>,
}

impl Broker {
    pub fn new(store: Arc<dyn BrokerStore>, gateways: Arc<dyn GatewayFactory>, settings: BrokerSettings) -> Self {
        Self { store, gateways, settings, mutex: Mutex::new(()) }
    }

    pub fn store(&self) -> &Arc<dyn BrokerStore> {
        &self.store
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Catalog advertised to the platform.
    pub fn services(&self) -> Vec<Service> {
        vec![Service {
            id: self.settings.service.id.clone(),
            name: self.settings.service.name.clone(),
            description: "Azure File Service".to_string(),
            bindable: true,
            plan_updateable: false,
            tags: vec!["azurefile".to_string(), "smb".to_string()],
            requires: vec!["volume_mount".to_string()],
            plans: vec![ServicePlan {
                id: PLAN_ID.to_string(),
                name: PLAN_NAME.to_string(),
                description: "The Azure File Share plan".to_string(),
            }],
        }]
    }

    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn provision(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
        async_allowed: bool,
    ) -> Result<ProvisionedServiceSpec, BrokerError> {
        debug!(async_allowed, plan_id = %details.plan_id, "provision_requested");
        let mut configuration: Configuration = decode_parameters(details.raw_parameters.as_ref())?;
        if configuration.subscription_id.is_empty() {
            configuration.subscription_id = self.settings.azure.default_subscription_id.clone();
        }
        if configuration.resource_group_name.is_empty() {
            configuration.resource_group_name = self.settings.azure.default_resource_group_name.clone();
        }
        let missing = configuration.missing_keys();
        if !missing.is_empty() {
            let keys: Vec<String> = missing.iter().map(|k| format!("{k:?}")).collect();
            let err = BrokerError::Validation(format!("Missing required parameters: {}", keys.join(", ")));
            error!(err = %err, "provision_invalid_parameters");
            return Err(err);
        }
        let account = StorageAccount::from_configuration(&configuration)?;

        let _guard = self.mutex.lock().await;

        let is_created_storage_account = self.resolve_storage_account(&account).await?;

        // an account created above stays in Azure when the id turns out to be taken
        if self.store.is_instance_conflict(instance_id).await {
            error!("service_instance_already_exists");
            return Err(BrokerError::InstanceAlreadyExists);
        }

        let instance = ServiceInstance {
            service_id: details.service_id,
            plan_id: details.plan_id,
            organization_guid: details.organization_guid,
            space_guid: details.space_guid,
            subscription_id: account.subscription_id,
            resource_group_name: account.resource_group_name,
            storage_account_name: account.storage_account_name,
            use_https: account.use_https,
            is_created_storage_account,
            file_shares: BTreeMap::new(),
        };
        self.store.create_instance(instance_id, &instance).await.map_err(|e| match e {
            StoreError::Conflict(_) => BrokerError::InstanceAlreadyExists,
            StoreError::AccountInUse(account) => {
                error!(account = %account, "storage_account_in_use");
                BrokerError::StorageAccountInUse(account)
            }
            other => {
                error!(err = %other, "create_service_instance_failed");
                BrokerError::Store(other)
            }
        })?;
        info!(account = %instance.storage_account_name, is_created_storage_account, "service_instance_created");

        Ok(ProvisionedServiceSpec { is_async: false, dashboard_url: None })
    }

    /// Returns whether the broker created the account.
    async fn resolve_storage_account(&self, account: &StorageAccount) -> Result<bool, BrokerError> {
        let name = &account.storage_account_name;
        let gateway = self.connect(account)?;
        let exists = gateway
            .exists()
            .await
            .map_err(|e| BrokerError::gateway(format!("Failed to check whether the storage account {name:?} exists"), e))?;
        if exists {
            info!(account = %name, "storage_account_reused");
            return Ok(false);
        }
        if !self.settings.control.allow_create_storage_account {
            let err = BrokerError::Policy(format!(
                "The storage account {name:?} does not exist under the resource group {:?} in the subscription {:?} and the administrator does not allow to create it automatically",
                account.resource_group_name, account.subscription_id
            ));
            error!(err = %err, "storage_account_creation_not_allowed");
            return Err(err);
        }
        gateway.create().await.map_err(|e| {
            let err = BrokerError::gateway(format!("Failed to create the storage account {name:?}"), e);
            error!(err = %err, "create_storage_account_failed");
            err
        })?;
        info!(account = %name, sku = %account.sku_name, location = %account.location, "storage_account_created");
        Ok(true)
    }

    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn deprovision(&self, instance_id: &str) -> Result<DeprovisionServiceSpec, BrokerError> {
        let _guard = self.mutex.lock().await;

        let instance = self.retrieve_instance(instance_id).await?;

        if instance.is_created_storage_account && self.settings.control.allow_delete_storage_account {
            let name = &instance.storage_account_name;
            let gateway = self.connect(&existing_account(&instance))?;
            let context = format!("Failed to delete the storage account {name:?}");
            let exists = gateway.exists().await.map_err(|e| BrokerError::gateway(&context, e))?;
            if exists {
                gateway.delete().await.map_err(|e| {
                    let err = BrokerError::gateway(&context, e);
                    error!(err = %err, "delete_storage_account_failed");
                    err
                })?;
                info!(account = %name, "storage_account_deleted");
            } else {
                info!(account = %name, "storage_account_already_absent");
            }
        }

        self.store.delete_instance(instance_id).await?;
        info!("service_instance_deleted");

        Ok(DeprovisionServiceSpec { is_async: false, operation_data: "deprovision".to_string() })
    }

    /// Bind `binding_id` to a share of the instance and return its volume mount.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use service::azure::mock::InMemoryAzure;
    /// use service::broker::{Broker, BrokerSettings, domain::{BindDetails, ProvisionDetails}};
    /// use service::storage::file_store::FileStore;
    ///
    /// let mut cfg = configs::BrokerConfig::default();
    /// cfg.azure.default_subscription_id = "sub".into();
    /// cfg.azure.default_resource_group_name = "rg".into();
    /// let azure = InMemoryAzure::new().with_account("acct");
    /// let broker = Broker::new(Arc::new(FileStore::in_memory()), Arc::new(azure), BrokerSettings::from_config(&cfg).unwrap());
    ///
    /// let provision = ProvisionDetails { raw_parameters: Some(serde_json::json!({ "storage_account_name": "acct" })), ..Default::default() };
    /// tokio_test::block_on(broker.provision("i1", provision, false)).unwrap();
    /// let bind = BindDetails { app_guid: "app".into(), raw_parameters: Some(serde_json::json!({ "share": "data" })), ..Default::default() };
    /// let binding = tokio_test::block_on(broker.bind("i1", "b1", bind)).unwrap();
    /// assert_eq!(binding.volume_mounts[0].container_dir, "/var/vcap/data/i1");
    /// ```
    #[instrument(skip_all, fields(instance_id = %instance_id, binding_id = %binding_id))]
    pub async fn bind(&self, instance_id: &str, binding_id: &str, details: BindDetails) -> Result<Binding, BrokerError> {
        if details.app_guid.is_empty() {
            error!("missing_app_guid");
            return Err(BrokerError::AppGuidNotProvided);
        }
        let options: BindOptions = decode_parameters(details.raw_parameters.as_ref())?;
        if options.file_share_name.is_empty() {
            error!("missing_share_parameter");
            return Err(BrokerError::Validation("Missing required parameters: \"share\"".to_string()));
        }
        let mut mount = self.settings.mount.clone();
        mount.set_entries(options.to_entries()).map_err(|e| {
            error!(err = %e, share = %options.file_share_name, "set_mount_entries_failed");
            e
        })?;

        let _guard = self.mutex.lock().await;

        let instance = self.retrieve_instance(instance_id).await?;

        let lock_name = file_share_lock_name(instance_id, &options.file_share_name);
        let lock = self.acquire_lock(&lock_name).await?;
        let bound = self.bind_share(instance_id, binding_id, &instance, &options.file_share_name, &details).await;
        release_lock(lock).await;
        let (share, gateway) = bound?;

        let mut mount_config = mount.make_config();
        mount_config.insert("source".to_string(), share.url.clone());
        mount_config.insert("username".to_string(), instance.storage_account_name.clone());
        debug!(driver = DRIVER_NAME, share = %share.file_share_name, count = share.count, "volume_service_binding");
        let fingerprint = fingerprint(&mount_config)?;

        let access_key = gateway.access_key().await.map_err(|e| {
            let err = BrokerError::gateway(
                format!("Failed to get the access key of the storage account {:?}", instance.storage_account_name),
                e,
            );
            error!(err = %err, "get_access_key_failed");
            err
        })?;
        mount_config.insert("password".to_string(), access_key);

        Ok(Binding {
            credentials: serde_json::json!({}),
            volume_mounts: vec![VolumeMount {
                driver: DRIVER_NAME.to_string(),
                container_dir: container_path(&options, instance_id),
                mode: if options.readonly { "r" } else { "rw" }.to_string(),
                device_type: DEVICE_TYPE_SHARED.to_string(),
                device: SharedDevice { volume_id: format!("{instance_id}-{fingerprint}"), mount_config },
            }],
        })
    }

    /// Reference the share and persist the share record and the binding.
    /// Runs under the share lock.
    async fn bind_share(
        &self,
        instance_id: &str,
        binding_id: &str,
        instance: &ServiceInstance,
        file_share_name: &str,
        details: &BindDetails,
    ) -> Result<(FileShare, Arc<dyn StorageAccountGateway>), BrokerError> {
        let stored = self.store.retrieve_file_share(instance_id, file_share_name).await?;
        let is_new = stored.is_none();
        if is_new {
            info!(share = %file_share_name, "file_share_not_in_store");
        }
        let mut share = stored.unwrap_or_else(|| FileShare::absent(instance_id, file_share_name));

        let gateway = self.connect(&existing_account(instance))?;
        shares::acquire_reference(
            gateway.as_ref(),
            &instance.storage_account_name,
            &mut share,
            self.settings.control.allow_create_file_share,
        )
        .await
        .map_err(|e| {
            error!(err = %e, share = %file_share_name, "handle_bind_share_failed");
            e
        })?;

        // the incremented count has not been written yet; a duplicate leaves the record as it was
        if self.store.is_binding_conflict(binding_id).await {
            error!("service_binding_already_exists");
            return Err(BrokerError::BindingAlreadyExists);
        }

        if is_new {
            self.store.create_file_share(&share).await?;
            info!(share = %file_share_name, is_created = share.is_created, "file_share_inserted");
        } else {
            self.store.update_file_share(&share).await?;
            info!(share = %file_share_name, count = share.count, "file_share_updated");
        }

        self.store.create_binding(binding_id, details).await.map_err(|e| match e {
            StoreError::Conflict(_) => BrokerError::BindingAlreadyExists,
            other => BrokerError::Store(other),
        })?;
        info!("binding_details_created");

        Ok((share, gateway))
    }

    #[instrument(skip_all, fields(instance_id = %instance_id, binding_id = %binding_id))]
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<(), BrokerError> {
        let _guard = self.mutex.lock().await;

        let instance = self.retrieve_instance(instance_id).await?;
        let details = self.store.retrieve_binding(binding_id).await.map_err(|e| {
            error!(err = %e, "retrieve_binding_details_failed");
            match e {
                StoreError::NotFound(_) => BrokerError::BindingDoesNotExist,
                other => BrokerError::Store(other),
            }
        })?;
        let options: BindOptions = decode_parameters(details.raw_parameters.as_ref())?;

        let lock_name = file_share_lock_name(instance_id, &options.file_share_name);
        let lock = self.acquire_lock(&lock_name).await?;
        let unbound = self.unbind_share(instance_id, binding_id, &instance, &options.file_share_name).await;
        release_lock(lock).await;
        unbound
    }

    /// Drop the binding's reference and its binding record. Runs under the share lock.
    async fn unbind_share(
        &self,
        instance_id: &str,
        binding_id: &str,
        instance: &ServiceInstance,
        file_share_name: &str,
    ) -> Result<(), BrokerError> {
        let mut share = self
            .store
            .retrieve_file_share(instance_id, file_share_name)
            .await?
            .ok_or_else(|| StoreError::not_found("file share", &file_share_lock_name(instance_id, file_share_name)))?;

        let account = existing_account(instance);
        let allow_delete = self.settings.control.allow_delete_file_share;
        match shares::release_reference(&mut share, allow_delete, || self.gateways.connect(&account)).await {
            Release::Referenced => {
                self.store.update_file_share(&share).await?;
                info!(share = %file_share_name, count = share.count, "file_share_updated");
            }
            Release::Unreferenced { delete_error } => {
                // the record goes even when the Azure share could not be deleted
                if let Some(e) = delete_error {
                    warn!(err = %e, share = %file_share_name, "delete_file_share_failed");
                } else if share.is_created && allow_delete {
                    info!(share = %file_share_name, "file_share_deleted");
                }
                self.store.delete_file_share(instance_id, file_share_name).await?;
                info!(share = %file_share_name, "file_share_removed_from_store");
            }
        }

        self.store.delete_binding(binding_id).await?;
        info!("binding_details_deleted");
        Ok(())
    }

    /// Every operation completes synchronously, so there is never anything to poll.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn last_operation(&self, instance_id: &str, operation_data: &str) -> Result<LastOperation, BrokerError> {
        let _guard = self.mutex.lock().await;
        Err(BrokerError::UnrecognizedOperation(operation_data.to_string()))
    }

    async fn retrieve_instance(&self, instance_id: &str) -> Result<ServiceInstance, BrokerError> {
        self.store.retrieve_instance(instance_id).await.map_err(|e| {
            error!(err = %e, "retrieve_service_instance_failed");
            match e {
                StoreError::NotFound(_) => BrokerError::InstanceDoesNotExist,
                other => BrokerError::Store(other),
            }
        })
    }

    fn connect(&self, account: &StorageAccount) -> Result<Arc<dyn StorageAccountGateway>, BrokerError> {
        self.gateways.connect(account).map_err(|e| {
            BrokerError::gateway(format!("Failed to connect to the storage account {:?}", account.storage_account_name), e)
        })
    }

    async fn acquire_lock(&self, name: &str) -> Result<ShareLock, BrokerError> {
        self.store.acquire_lock(name, LOCK_TIMEOUT_SECS).await.map_err(|e| {
            error!(err = %e, lock = name, "get_lock_for_update_failed");
            BrokerError::Store(e)
        })
    }
}

async fn release_lock(lock: ShareLock) {
    let name = lock.name().to_string();
    if let Err(e) = lock.release().await {
        warn!(err = %e, lock = %name, "release_lock_failed");
    }
}

/// Absent parameters and anything that is not a JSON object count as malformed.
fn decode_parameters<T: DeserializeOwned>(raw: Option<&serde_json::Value>) -> Result<T, BrokerError> {
    let raw = match raw {
        Some(v) if v.is_object() => v,
        _ => {
            error!("raw_parameters_not_an_object");
            return Err(BrokerError::RawParamsInvalid);
        }
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        error!(err = %e, "decode_raw_parameters_failed");
        BrokerError::RawParamsInvalid
    })
}

fn existing_account(instance: &ServiceInstance) -> StorageAccount {
    StorageAccount::existing(
        &instance.subscription_id,
        &instance.resource_group_name,
        &instance.storage_account_name,
        instance.use_https,
    )
}

fn container_path(options: &BindOptions, instance_id: &str) -> String {
    if !options.mount.is_empty() {
        return options.mount.clone();
    }
    Path::new(DEFAULT_CONTAINER_PATH).join(instance_id).to_string_lossy().into_owned()
}

/// MD5 over the JSON encoding of the mount config; keys are sorted so equal configs hash equal.
fn fingerprint(mount_config: &BTreeMap<String, String>) -> Result<String, BrokerError> {
    let bytes = serde_json::to_vec(mount_config)
        .map_err(|e| BrokerError::Validation(format!("error calculating volume id: {e}")))?;
    Ok(hex::encode(Md5::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_equal_configs() -> Result<(), BrokerError> {
        let a: BTreeMap<String, String> =
            [("vers", "3.0"), ("source", "//a/s")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let b: BTreeMap<String, String> =
            [("source", "//a/s"), ("vers", "3.0")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assert_eq!(fingerprint(&a)?, fingerprint(&b)?);
        assert_eq!(fingerprint(&a)?.len(), 32);
        Ok(())
    }

    #[test]
    fn container_path_prefers_caller_mount() {
        let mut options = BindOptions { file_share_name: "s1".into(), ..Default::default() };
        assert_eq!(container_path(&options, "i1"), "/var/vcap/data/i1");
        options.mount = "/mnt/data".into();
        assert_eq!(container_path(&options, "i1"), "/mnt/data");
    }

    #[test]
    fn parameters_must_be_an_object() {
        let res: Result<BindOptions, _> = decode_parameters(None);
        assert!(matches!(res, Err(BrokerError::RawParamsInvalid)));
        let res: Result<BindOptions, _> = decode_parameters(Some(&serde_json::json!("share")));
        assert!(matches!(res, Err(BrokerError::RawParamsInvalid)));
        let res: Result<BindOptions, _> = decode_parameters(Some(&serde_json::json!({ "readonly": "yes" })));
        assert!(matches!(res, Err(BrokerError::RawParamsInvalid)));
    }
}
