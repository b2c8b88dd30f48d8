//! User entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub email: String,

    /// JSON array of subject names
    #[sea_orm(column_type = "Json")]
    pub subjects: Json,

    /// JSON array of career aspirations
    #[sea_orm(column_type = "Json")]
    pub career_aspirations: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub filiere: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub mention: Option<String>,

    pub duration: Option<i32>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    /// Commit time of the last successful synchronization
    pub last_synced_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recommendation::Entity")]
    Recommendations,

    #[sea_orm(has_many = "super::feedback::Entity")]
    Feedback,
}

impl Related<super::recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recommendations.def()
    }
}

impl Related<super::feedback::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Feedback.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
