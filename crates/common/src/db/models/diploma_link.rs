//! Reference edge from a diploma to a reference entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "diploma_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub diploma_name: String,

    /// Kind of the target entity, which doubles as the edge label
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub target: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::diploma::Entity",
        from = "Column::DiplomaName",
        to = "super::diploma::Column::Name",
        on_delete = "Cascade"
    )]
    Diploma,
}

impl Related<super::diploma::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Diploma.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
