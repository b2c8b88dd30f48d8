//! Feedback edge (user -> diploma)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "feedback")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_email: String,

    #[sea_orm(primary_key, auto_increment = false, indexed)]
    pub diploma_name: String,

    /// 0.0 to 5.0
    pub rating: f64,

    pub liked: bool,

    /// JSON array of free-text notes
    #[sea_orm(column_type = "Json")]
    pub notes: Json,

    /// Recommendation score at the time of the last write, in basis points
    pub cached_score: Option<i32>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
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
