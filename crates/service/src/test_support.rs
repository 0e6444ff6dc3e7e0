#![cfg(test)]
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use crate::azure::mock::InMemoryAzure;
use crate::broker::domain::{BindDetails, FileShare, ServiceInstance};
use crate::broker::{Broker, BrokerSettings};
use crate::storage::{sql_store::SqlStore, BrokerStore};

/// A SQLite file under the temp dir, removed on drop.
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        Self { path: std::env::temp_dir().join(format!("broker_{}.db", uuid::Uuid::new_v4())) }
    }

    pub fn config(&self) -> configs::DatabaseConfig {
        configs::DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", self.path.display()),
            max_connections: 8,
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_lifetime_secs: 60,
            acquire_timeout_secs: 10,
            sqlx_logging: false,
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A migrated SQL store on a fresh SQLite file. Keep the `TempDb` alive for the test.
pub async fn sqlite_store() -> anyhow::Result<(SqlStore, TempDb)> {
    let tmp = TempDb::new();
    let store = SqlStore::connect(&tmp.config()).await?;
    Ok((store, tmp))
}

pub fn instance(account: &str) -> ServiceInstance {
    ServiceInstance {
        service_id: "svc".into(),
        plan_id: "plan".into(),
        organization_guid: "org".into(),
        space_guid: "space".into(),
        subscription_id: "sub".into(),
        resource_group_name: "rg".into(),
        storage_account_name: account.into(),
        use_https: true,
        is_created_storage_account: false,
        file_shares: BTreeMap::new(),
    }
}

pub fn share(instance_id: &str, name: &str, count: u32) -> FileShare {
    FileShare {
        instance_id: instance_id.into(),
        file_share_name: name.into(),
        is_created: true,
        count,
        url: format!("//acct.file.core.windows.net/{name}"),
    }
}

pub fn bind_details(share: &str) -> BindDetails {
    bind_details_with(json!({ "share": share }))
}

pub fn bind_details_with(parameters: serde_json::Value) -> BindDetails {
    BindDetails {
        app_guid: "app-guid".into(),
        plan_id: "plan".into(),
        service_id: "svc".into(),
        raw_parameters: Some(parameters),
    }
}

/// Broker settings from a default config with the given control flags applied.
pub fn settings(control: configs::ControlConfig) -> BrokerSettings {
    let mut cfg = configs::BrokerConfig::default();
    cfg.control = control;
    cfg.azure.default_subscription_id = "sub".into();
    cfg.azure.default_resource_group_name = "rg".into();
    BrokerSettings::from_config(&cfg).expect("default settings")
}

pub fn broker_with(store: Arc<dyn BrokerStore>, azure: &InMemoryAzure, control: configs::ControlConfig) -> Broker {
    Broker::new(store, Arc::new(azure.clone()), settings(control))
}

pub fn allow_all() -> configs::ControlConfig {
    configs::ControlConfig {
        allow_create_storage_account: true,
        allow_create_file_share: true,
        allow_delete_storage_account: true,
        allow_delete_file_share: true,
    }
}
