//! Reference entity registry
//!
//! Resolves (kind, name) pairs to exactly one persisted node, creating it on
//! first use. Concurrent creators race on the primary key; the loser refetches.

use crate::db::{queries, Repository};
use crate::errors::{AppError, Result};
use crate::graph::{natural_key, EntityKind, EntityRef};
use crate::metrics;
use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tracing::debug;

/// Trait for reference entity resolution
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// Return the entity keyed by (kind, trimmed name), creating it if absent.
    async fn find_or_create(&self, kind: EntityKind, name: &str) -> Result<EntityRef>;

    /// Lookup without creating
    async fn find(&self, kind: EntityKind, name: &str) -> Result<Option<EntityRef>>;
}

/// Registry backed by the primary database connection
#[derive(Clone)]
pub struct SeaOrmRegistry {
    repo: Repository,
}

impl SeaOrmRegistry {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn shared(repo: Repository) -> Arc<dyn EntityRegistry> {
        Arc::new(Self::new(repo))
    }
}

#[async_trait]
impl EntityRegistry for SeaOrmRegistry {
    async fn find_or_create(&self, kind: EntityKind, name: &str) -> Result<EntityRef> {
        find_or_create_on(self.repo.write_conn(), kind, name).await
    }

    async fn find(&self, kind: EntityKind, name: &str) -> Result<Option<EntityRef>> {
        let key = natural_key(kind, name)?;
        Ok(queries::find_reference(self.repo.read_conn(), kind, &key)
            .await?
            .map(|_| EntityRef::new(kind, key)))
    }
}

/// [`EntityRegistry::find_or_create`] on an explicit connection or transaction.
pub async fn find_or_create_on<C: ConnectionTrait>(
    conn: &C,
    kind: EntityKind,
    name: &str,
) -> Result<EntityRef> {
    let key = natural_key(kind, name)?;

    if queries::find_reference(conn, kind, &key).await?.is_some() {
        return Ok(EntityRef::new(kind, key));
    }

    match queries::insert_reference(conn, kind, &key).await {
        Ok(()) => {
            debug!(kind = %kind, name = %key, "Reference entity created");
            metrics::record_entity(kind.as_str(), true, false);
            Ok(EntityRef::new(kind, key))
        }
        Err(AppError::Duplicate { .. }) => {
            debug!(kind = %kind, name = %key, "Reference entity created concurrently, refetching");
            metrics::record_entity(kind.as_str(), false, true);

            queries::find_reference(conn, kind, &key)
                .await?
                .map(|_| EntityRef::new(kind, key.clone()))
                .ok_or_else(|| AppError::Internal {
                    message: format!("{}/{} missing after duplicate insert", kind, key),
                })
        }
        Err(e) => Err(e),
    }
}
