use sea_orm::{entity::prelude::*, Set, ActiveModelTrait, ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::{errors::ModelError, file_share};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub storage_account_name: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { FileShare }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::FileShare => Entity::has_many(file_share::Entity).into(),
        }
    }
}

impl Related<file_share::Entity> for Entity {
    fn to() -> RelationDef { Relation::FileShare.def() }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lookup columns stored alongside the serialized instance.
#[derive(Clone, Debug, Default)]
pub struct InstanceColumns<'a> {
    pub organization_guid: &'a str,
    pub space_guid: &'a str,
    pub storage_account_name: &'a str,
}

pub async fn find<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Model>, ModelError> {
    Ok(Entity::find_by_id(id.to_string()).one(db).await?)
}

pub async fn create<C: ConnectionTrait>(db: &C, id: &str, cols: InstanceColumns<'_>, value: String) -> Result<Model, ModelError> {
    if id.trim().is_empty() { return Err(ModelError::Validation("instance id required".into())); }
    let am = ActiveModel {
        id: Set(id.to_string()),
        organization_guid: Set(cols.organization_guid.to_string()),
        space_guid: Set(cols.space_guid.to_string()),
        storage_account_name: Set(cols.storage_account_name.to_string()),
        value: Set(value),
    };
    Ok(am.insert(db).await?)
}

/// Replace the stored document; returns false when no row matched.
pub async fn update<C: ConnectionTrait>(db: &C, id: &str, cols: InstanceColumns<'_>, value: String) -> Result<bool, ModelError> {
    let Some(found) = find(db, id).await? else { return Ok(false) };
    let mut am: ActiveModel = found.into();
    am.organization_guid = Set(cols.organization_guid.to_string());
    am.space_guid = Set(cols.space_guid.to_string());
    am.storage_account_name = Set(cols.storage_account_name.to_string());
    am.value = Set(value);
    am.update(db).await?;
    Ok(true)
}

pub async fn delete<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ModelError> {
    let res = Entity::delete_by_id(id.to_string()).exec(db).await?;
    Ok(res.rows_affected > 0)
}
