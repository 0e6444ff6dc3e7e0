use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use migration::MigratorTrait;
use models::{file_share, service_binding, service_instance};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement, TransactionTrait,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{BrokerStore, ShareLock};
use crate::broker::domain::{BindingDetails, FileShare, ServiceInstance};
use crate::errors::StoreError;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// MySQL rejects user lock names longer than this.
const MYSQL_LOCK_NAME_MAX: usize = 64;

type LocalLocks = Arc<Mutex<HashSet<String>>>;

/// A lock this process currently holds, owned by its [`ShareLock`].
pub(crate) enum HeldLock {
    /// Postgres xact lock; ends with its transaction.
    Transaction(DatabaseTransaction),
    /// MySQL `GET_LOCK`, owned by the session pinned in the transaction.
    Session(DatabaseTransaction),
    /// SQLite has no advisory locks; exclusion is process local.
    Local(LocalLocks),
}

impl HeldLock {
    pub(crate) async fn release(self, name: &str) -> Result<(), StoreError> {
        match self {
            HeldLock::Transaction(txn) => txn.commit().await?,
            HeldLock::Session(txn) => {
                txn.execute(mysql_release(name)).await?;
                txn.commit().await?;
            }
            HeldLock::Local(set) => {
                local_set(&set).remove(name);
            }
        }
        Ok(())
    }

    /// Free the lock from `Drop`, finishing database work on the runtime.
    pub(crate) fn abandon(self, name: &str) {
        match self {
            HeldLock::Local(set) => {
                local_set(&set).remove(name);
            }
            HeldLock::Transaction(txn) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = txn.rollback().await {
                            warn!(err = %e, "abandoned_lock_rollback_failed");
                        }
                    });
                }
                // the transaction's own drop queues the rollback
                Err(_) => drop(txn),
            },
            HeldLock::Session(txn) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let stmt = mysql_release(name);
                    let name = name.to_string();
                    handle.spawn(async move {
                        if let Err(e) = txn.execute(stmt).await {
                            warn!(err = %e, lock = %name, "abandoned_lock_release_failed");
                        }
                        let _ = txn.rollback().await;
                    });
                }
                Err(_) => {
                    warn!(lock = name, "abandoned_lock_outlives_session");
                    drop(txn);
                }
            },
        }
    }
}

/// Store backed by the `service_instances`, `service_bindings` and
/// `file_shares` tables.
///
/// Instance rows hold the instance document without its shares; shares are
/// rows of their own so concurrent binds on different shares never overwrite
/// each other. Share mutations are serialized across processes with database
/// advisory locks:
/// - Postgres: `pg_try_advisory_xact_lock`, polled until the timeout.
/// - MySQL: `GET_LOCK` with the timeout passed to the server.
/// - SQLite: an in-process set of held names.
pub struct SqlStore {
    db: DatabaseConnection,
    local: LocalLocks,
}

impl SqlStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, local: Arc::default() }
    }

    /// Connect with the configured pool and bring the schema up to date.
    pub async fn connect(cfg: &configs::DatabaseConfig) -> anyhow::Result<Self> {
        let db = models::db::connect_with_config(cfg).await?;
        migration::Migrator::up(&db, None).await?;
        info!(backend = ?db.get_database_backend(), "sql_store_ready");
        Ok(Self::new(db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn lock_postgres(&self, name: &str, timeout_secs: u64) -> Result<HeldLock, StoreError> {
        let txn = self.db.begin().await?;
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_try_advisory_xact_lock(hashtext($1)) AS acquired",
            [name.into()],
        );
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            let acquired = match txn.query_one(stmt.clone()).await? {
                Some(row) => row.try_get::<bool>("", "acquired")?,
                None => false,
            };
            if acquired {
                return Ok(HeldLock::Transaction(txn));
            }
            if Instant::now() >= deadline {
                txn.rollback().await?;
                return Err(timeout(name, timeout_secs));
            }
            sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn lock_mysql(&self, name: &str, timeout_secs: u64) -> Result<HeldLock, StoreError> {
        let txn = self.db.begin().await?;
        let stmt = Statement::from_sql_and_values(
            DbBackend::MySql,
            "SELECT GET_LOCK(?, ?) AS acquired",
            [mysql_lock_name(name).into(), (timeout_secs as i64).into()],
        );
        let acquired = match txn.query_one(stmt).await? {
            Some(row) => row.try_get::<Option<i64>>("", "acquired")?,
            None => None,
        };
        match acquired {
            Some(1) => Ok(HeldLock::Session(txn)),
            Some(_) => {
                txn.rollback().await?;
                Err(timeout(name, timeout_secs))
            }
            None => {
                txn.rollback().await?;
                Err(StoreError::Db(format!("GET_LOCK failed for {name:?}")))
            }
        }
    }

    async fn lock_local(&self, name: &str, timeout_secs: u64) -> Result<HeldLock, StoreError> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            let inserted = local_set(&self.local).insert(name.to_string());
            if inserted {
                return Ok(HeldLock::Local(Arc::clone(&self.local)));
            }
            if Instant::now() >= deadline {
                return Err(timeout(name, timeout_secs));
            }
            sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn write_instance_row(&self, id: &str, instance: &ServiceInstance, create: bool) -> Result<bool, StoreError> {
        let value = instance_document(instance)?;
        let cols = service_instance::InstanceColumns {
            organization_guid: &instance.organization_guid,
            space_guid: &instance.space_guid,
            storage_account_name: &instance.storage_account_name,
        };
        if create {
            service_instance::create(&self.db, id, cols, value).await?;
            Ok(true)
        } else {
            Ok(service_instance::update(&self.db, id, cols, value).await?)
        }
    }
}

fn timeout(name: &str, seconds: u64) -> StoreError {
    StoreError::LockTimeout { name: name.to_string(), seconds }
}

fn local_set(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

fn mysql_release(name: &str) -> Statement {
    Statement::from_sql_and_values(DbBackend::MySql, "SELECT RELEASE_LOCK(?) AS released", [mysql_lock_name(name).into()])
}

fn mysql_lock_name(name: &str) -> String {
    if name.len() <= MYSQL_LOCK_NAME_MAX {
        return name.to_string();
    }
    format!("afb-{}", hex::encode(Md5::digest(name.as_bytes())))
}

/// Instance document without shares; those live in `file_shares`.
fn instance_document(instance: &ServiceInstance) -> Result<String, StoreError> {
    let mut doc = serde_json::to_value(instance)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("file_shares");
    }
    Ok(serde_json::to_string(&doc)?)
}

#[async_trait]
impl BrokerStore for SqlStore {
    async fn retrieve_instance(&self, id: &str) -> Result<ServiceInstance, StoreError> {
        let row = service_instance::find(&self.db, id).await?.ok_or_else(|| StoreError::not_found("service instance", id))?;
        let mut instance: ServiceInstance = serde_json::from_str(&row.value)?;
        for share_row in file_share::list_for_instance(&self.db, id).await? {
            let share: FileShare = serde_json::from_str(&share_row.value)?;
            instance.file_shares.insert(share_row.file_share_name, share);
        }
        Ok(instance)
    }

    async fn create_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError> {
        match self.write_instance_row(id, instance, true).await {
            Ok(_) => Ok(()),
            // the primary key and the (org, space, account) index both raise a unique violation
            Err(StoreError::Conflict(_)) => {
                if service_instance::find(&self.db, id).await?.is_some() {
                    Err(StoreError::conflict("service instance", id))
                } else {
                    Err(StoreError::AccountInUse(instance.storage_account_name.clone()))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn update_instance(&self, id: &str, instance: &ServiceInstance) -> Result<(), StoreError> {
        if !self.write_instance_row(id, instance, false).await? {
            return Err(StoreError::not_found("service instance", id));
        }
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), StoreError> {
        // share rows go with the instance through the cascading foreign key
        if !service_instance::delete(&self.db, id).await? {
            return Err(StoreError::not_found("service instance", id));
        }
        Ok(())
    }

    async fn retrieve_binding(&self, id: &str) -> Result<BindingDetails, StoreError> {
        let row = service_binding::find(&self.db, id).await?.ok_or_else(|| StoreError::not_found("service binding", id))?;
        Ok(serde_json::from_str(&row.value)?)
    }

    async fn create_binding(&self, id: &str, details: &BindingDetails) -> Result<(), StoreError> {
        service_binding::create(&self.db, id, serde_json::to_string(details)?).await?;
        Ok(())
    }

    async fn delete_binding(&self, id: &str) -> Result<(), StoreError> {
        if !service_binding::delete(&self.db, id).await? {
            return Err(StoreError::not_found("service binding", id));
        }
        Ok(())
    }

    async fn retrieve_file_share(&self, instance_id: &str, name: &str) -> Result<Option<FileShare>, StoreError> {
        if service_instance::find(&self.db, instance_id).await?.is_none() {
            return Err(StoreError::not_found("service instance", instance_id));
        }
        match file_share::find(&self.db, instance_id, name).await? {
            Some(row) => Ok(Some(serde_json::from_str(&row.value)?)),
            None => Ok(None),
        }
    }

    async fn create_file_share(&self, share: &FileShare) -> Result<(), StoreError> {
        if service_instance::find(&self.db, &share.instance_id).await?.is_none() {
            return Err(StoreError::not_found("service instance", &share.instance_id));
        }
        file_share::create(&self.db, &share.instance_id, &share.file_share_name, serde_json::to_string(share)?).await?;
        Ok(())
    }

    async fn update_file_share(&self, share: &FileShare) -> Result<(), StoreError> {
        let value = serde_json::to_string(share)?;
        if !file_share::update(&self.db, &share.instance_id, &share.file_share_name, value).await? {
            return Err(StoreError::not_found("file share", &format!("{}/{}", share.instance_id, share.file_share_name)));
        }
        Ok(())
    }

    async fn delete_file_share(&self, instance_id: &str, name: &str) -> Result<(), StoreError> {
        if !file_share::delete(&self.db, instance_id, name).await? {
            return Err(StoreError::not_found("file share", &format!("{instance_id}/{name}")));
        }
        Ok(())
    }

    async fn acquire_lock(&self, name: &str, timeout_secs: u64) -> Result<ShareLock, StoreError> {
        let backend = self.db.get_database_backend();
        debug!(lock = name, ?backend, timeout_secs, "lock_acquiring");
        let held = match backend {
            DbBackend::Postgres => self.lock_postgres(name, timeout_secs).await?,
            DbBackend::MySql => self.lock_mysql(name, timeout_secs).await?,
            DbBackend::Sqlite => self.lock_local(name, timeout_secs).await?,
        };
        debug!(lock = name, "lock_acquired");
        Ok(ShareLock::held(name, held))
    }

    async fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn restore(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
