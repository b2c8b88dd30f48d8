//! Scored recommendation edge (user -> diploma)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recommendations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_email: String,

    #[sea_orm(primary_key, auto_increment = false, indexed)]
    pub diploma_name: String,

    /// Match score in basis points
    pub score: i32,

    /// Position in the predictor ranking
    pub rank: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserEmail",
        to = "super::user::Column::Email"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::diploma::Entity",
        from = "Column::DiplomaName",
        to = "super::diploma::Column::Name"
    )]
    Diploma,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::diploma::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Diploma.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
