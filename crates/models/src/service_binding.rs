use sea_orm::{entity::prelude::*, Set, ActiveModelTrait, ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_bindings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Model>, ModelError> {
    Ok(Entity::find_by_id(id.to_string()).one(db).await?)
}

pub async fn create<C: ConnectionTrait>(db: &C, id: &str, value: String) -> Result<Model, ModelError> {
    if id.trim().is_empty() { return Err(ModelError::Validation("binding id required".into())); }
    let am = ActiveModel { id: Set(id.to_string()), value: Set(value) };
    Ok(am.insert(db).await?)
}

pub async fn delete<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ModelError> {
    let res = Entity::delete_by_id(id.to_string()).exec(db).await?;
    Ok(res.rows_affected > 0)
}
