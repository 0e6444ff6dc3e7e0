use std::sync::Arc;

use common::utils::logging::{init_logging_default, init_logging_json};
use dotenvy::dotenv;
use tracing::info;

use configs::{BrokerConfig, LoggingConfig, StoreKind};

use crate::azure::GatewayFactory;
use crate::broker::{Broker, BrokerSettings};
use crate::storage::{file_store::FileStore, sql_store::SqlStore, BrokerStore};

/// Install the process-wide subscriber. Later calls are ignored.
pub fn init_logging(cfg: &LoggingConfig) {
    if cfg.json {
        init_logging_json();
    } else {
        init_logging_default();
    }
}

/// Open the store selected by `store.kind`.
pub async fn build_store(config: &BrokerConfig) -> anyhow::Result<Arc<dyn BrokerStore>> {
    let store: Arc<dyn BrokerStore> = match config.store.kind {
        StoreKind::File => {
            let store = FileStore::open(&config.store.state_file).await?;
            store.restore().await?;
            Arc::new(store)
        }
        StoreKind::Sql => Arc::new(SqlStore::connect(&config.database).await?),
    };
    info!(kind = ?config.store.kind, "broker_store_ready");
    Ok(store)
}

/// Build the broker context from a validated configuration.
pub async fn build_broker(config: &BrokerConfig, gateways: Arc<dyn GatewayFactory>) -> anyhow::Result<Broker> {
    let settings = BrokerSettings::from_config(config)?;
    let store = build_store(config).await?;
    info!(service = %settings.service.name, control = ?settings.control, "broker_ready");
    Ok(Broker::new(store, gateways, settings))
}

/// Load `.env` and the config file named by `CONFIG_PATH`, start logging,
/// then build the broker.
pub async fn build_broker_from_env(gateways: Arc<dyn GatewayFactory>) -> anyhow::Result<Broker> {
    dotenv().ok();
    let config = BrokerConfig::load_and_validate()?;
    init_logging(&config.logging);
    build_broker(&config, gateways).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::mock::InMemoryAzure;
    use crate::test_support::TempDb;

    #[test]
    fn logging_can_be_initialized_more_than_once() {
        init_logging(&LoggingConfig { json: true });
        init_logging(&LoggingConfig::default());
        tracing::info!("logging_ready");
    }

    #[tokio::test]
    async fn file_store_broker_creates_state_file() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("broker_bootstrap_{}", uuid::Uuid::new_v4()));
        let mut config = configs::from_toml_str(&format!(
            "[store]\nkind = \"file\"\nstate_file = \"{}\"\n",
            dir.join("state.json").display()
        ))?;
        config.normalize_and_validate()?;

        let broker = build_broker(&config, Arc::new(InMemoryAzure::new())).await?;
        assert!(dir.join("state.json").exists());
        assert_eq!(broker.services()[0].name, "azuresmbvolume");

        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }

    #[tokio::test]
    async fn sql_store_broker_runs_migrations() -> anyhow::Result<()> {
        let tmp = TempDb::new();
        let mut config = BrokerConfig::default();
        config.store.kind = StoreKind::Sql;
        config.database = tmp.config();
        config.normalize_and_validate()?;

        let broker = build_broker(&config, Arc::new(InMemoryAzure::new())).await?;
        assert!(!broker.store().is_instance_conflict("i1").await);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_mount_defaults_fail_the_build() {
        let mut config = BrokerConfig::default();
        config.mount.default_options = "vers".into();
        assert!(build_broker(&config, Arc::new(InMemoryAzure::new())).await.is_err());
    }
}
