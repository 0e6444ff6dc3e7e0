use sea_orm::{entity::prelude::*, Set, ActiveModelTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::{errors::ModelError, service_instance};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_shares")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub instance_id: String,
    pub file_share_name: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { ServiceInstance }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::ServiceInstance => Entity::belongs_to(service_instance::Entity)
                .from(Column::InstanceId)
                .to(service_instance::Column::Id)
                .into(),
        }
    }
}

impl Related<service_instance::Entity> for Entity {
    fn to() -> RelationDef { Relation::ServiceInstance.def() }
}

impl ActiveModelBehavior for ActiveModel {}

/// Row id for a share under an instance. The length prefix keeps
/// ("a-b", "c") and ("a", "b-c") apart.
pub fn row_id(instance_id: &str, file_share_name: &str) -> String {
    format!("{}:{instance_id}-{file_share_name}", instance_id.len())
}

fn share_of(instance_id: &str, file_share_name: &str) -> sea_orm::Condition {
    sea_orm::Condition::all()
        .add(Column::InstanceId.eq(instance_id.to_string()))
        .add(Column::FileShareName.eq(file_share_name.to_string()))
}

pub async fn find<C: ConnectionTrait>(db: &C, instance_id: &str, file_share_name: &str) -> Result<Option<Model>, ModelError> {
    Ok(Entity::find().filter(share_of(instance_id, file_share_name)).one(db).await?)
}

pub async fn list_for_instance<C: ConnectionTrait>(db: &C, instance_id: &str) -> Result<Vec<Model>, ModelError> {
    let rows = Entity::find()
        .filter(Column::InstanceId.eq(instance_id.to_string()))
        .order_by_asc(Column::FileShareName)
        .all(db)
        .await?;
    Ok(rows)
}

pub async fn create<C: ConnectionTrait>(db: &C, instance_id: &str, file_share_name: &str, value: String) -> Result<Model, ModelError> {
    if file_share_name.trim().is_empty() { return Err(ModelError::Validation("file share name required".into())); }
    let am = ActiveModel {
        id: Set(row_id(instance_id, file_share_name)),
        instance_id: Set(instance_id.to_string()),
        file_share_name: Set(file_share_name.to_string()),
        value: Set(value),
    };
    Ok(am.insert(db).await?)
}

/// Replace the stored document; returns false when no row matched.
pub async fn update<C: ConnectionTrait>(db: &C, instance_id: &str, file_share_name: &str, value: String) -> Result<bool, ModelError> {
    let Some(found) = find(db, instance_id, file_share_name).await? else { return Ok(false) };
    let mut am: ActiveModel = found.into();
    am.value = Set(value);
    am.update(db).await?;
    Ok(true)
}

pub async fn delete<C: ConnectionTrait>(db: &C, instance_id: &str, file_share_name: &str) -> Result<bool, ModelError> {
    let res = Entity::delete_many().filter(share_of(instance_id, file_share_name)).exec(db).await?;
    Ok(res.rows_affected > 0)
}
