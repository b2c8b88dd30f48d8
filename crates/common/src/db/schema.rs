//! Schema bootstrap
//!
//! Tables are derived from the entity models. Natural keys are primary keys,
//! so the storage layer rejects a second node with the same key.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::{ConnectionTrait, EntityTrait, Schema};
use tracing::debug;

/// Create every table and secondary index that does not exist yet.
///
/// Order matters: edge tables reference node tables.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, UserEntity).await?;
    create_table(db, &schema, DiplomaEntity).await?;
    create_table(db, &schema, ReferenceEntity).await?;
    create_table(db, &schema, DiplomaLinkEntity).await?;
    create_table(db, &schema, RecommendationEntity).await?;
    create_table(db, &schema, FeedbackEntity).await?;

    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait + Copy,
{
    let backend = db.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    debug!(table = entity.table_name(), "Table ready");
    Ok(())
}
