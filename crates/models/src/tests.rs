//! Row helper tests against a throwaway SQLite file with migrations applied.

use migration::MigratorTrait;
use sea_orm::DatabaseConnection;

use crate::errors::ModelError;
use crate::{file_share, service_binding, service_instance};

async fn sqlite_db() -> anyhow::Result<(DatabaseConnection, std::path::PathBuf)> {
    let path = std::env::temp_dir().join(format!("models_{}.db", uuid::Uuid::new_v4()));
    let cfg = configs::DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", path.display()),
        max_connections: 4,
        min_connections: 1,
        connect_timeout_secs: 5,
        idle_timeout_secs: 60,
        max_lifetime_secs: 60,
        acquire_timeout_secs: 5,
        sqlx_logging: false,
    };
    let db = crate::db::connect_with_config(&cfg).await?;
    migration::Migrator::up(&db, None).await?;
    Ok((db, path))
}

fn cols<'a>(account: &'a str) -> service_instance::InstanceColumns<'a> {
    service_instance::InstanceColumns { organization_guid: "org", space_guid: "space", storage_account_name: account }
}

#[tokio::test]
async fn instance_rows_crud() -> anyhow::Result<()> {
    let (db, path) = sqlite_db().await?;

    service_instance::create(&db, "i1", cols("acct1"), "{}".into()).await?;
    let found = service_instance::find(&db, "i1").await?.expect("row");
    assert_eq!(found.storage_account_name, "acct1");

    // same id again violates the primary key
    let dup = service_instance::create(&db, "i1", cols("acct2"), "{}".into()).await;
    assert!(matches!(dup, Err(ModelError::Conflict(_))));

    assert!(service_instance::update(&db, "i1", cols("acct1"), "{\"a\":1}".into()).await?);
    assert!(!service_instance::update(&db, "missing", cols("x"), "{}".into()).await?);
    assert_eq!(service_instance::find(&db, "i1").await?.expect("row").value, "{\"a\":1}");

    assert!(service_instance::delete(&db, "i1").await?);
    assert!(!service_instance::delete(&db, "i1").await?);
    assert!(service_instance::find(&db, "i1").await?.is_none());

    drop(db);
    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn file_share_rows_are_keyed_by_instance_and_name() -> anyhow::Result<()> {
    let (db, path) = sqlite_db().await?;
    service_instance::create(&db, "i1", cols("acct1"), "{}".into()).await?;

    file_share::create(&db, "i1", "s2", "{\"count\":1}".into()).await?;
    file_share::create(&db, "i1", "s1", "{\"count\":1}".into()).await?;
    let row = file_share::find(&db, "i1", "s1").await?.expect("row");
    assert_eq!(row.id, "2:i1-s1");

    let names: Vec<String> = file_share::list_for_instance(&db, "i1").await?.into_iter().map(|r| r.file_share_name).collect();
    assert_eq!(names, vec!["s1".to_string(), "s2".to_string()]);

    assert!(file_share::update(&db, "i1", "s1", "{\"count\":2}".into()).await?);
    assert!(file_share::delete(&db, "i1", "s1").await?);
    assert!(file_share::find(&db, "i1", "s1").await?.is_none());

    assert!(matches!(file_share::create(&db, "i1", " ", "{}".into()).await, Err(ModelError::Validation(_))));

    drop(db);
    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn hyphenated_ids_do_not_collide() -> anyhow::Result<()> {
    let (db, path) = sqlite_db().await?;
    service_instance::create(&db, "a-b", cols("acct1"), "{}".into()).await?;
    service_instance::create(&db, "a", cols("acct2"), "{}".into()).await?;

    file_share::create(&db, "a-b", "c", "{\"count\":1}".into()).await?;
    file_share::create(&db, "a", "b-c", "{\"count\":7}".into()).await?;

    assert_eq!(file_share::find(&db, "a", "b-c").await?.expect("row").value, "{\"count\":7}");
    assert!(file_share::delete(&db, "a", "b-c").await?);
    assert!(file_share::find(&db, "a-b", "c").await?.is_some());
    assert!(!file_share::update(&db, "a", "b-c", "{}".into()).await?);

    drop(db);
    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn binding_rows_crud() -> anyhow::Result<()> {
    let (db, path) = sqlite_db().await?;
    service_binding::create(&db, "b1", "{\"app_guid\":\"a\"}".into()).await?;
    assert!(service_binding::find(&db, "b1").await?.is_some());
    assert!(matches!(service_binding::create(&db, "b1", "{}".into()).await, Err(ModelError::Conflict(_))));
    assert!(service_binding::delete(&db, "b1").await?);
    assert!(service_binding::find(&db, "b1").await?.is_none());

    drop(db);
    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}
