//! Diploma upsert
//!
//! Writes a predictor-described diploma into the graph: the node itself plus
//! one reference edge per attribute value, each target resolved through the
//! entity registry. No transaction spans the whole write.

use diploma_common::db::queries::{self, DiplomaWrite};
use diploma_common::errors::{AppError, Result};
use diploma_common::graph::{Diploma, DiplomaAttributes};
use diploma_common::registry::{self, EntityRegistry};
use diploma_common::Repository;
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Creates or updates diploma nodes with their reference edges
#[derive(Clone)]
pub struct DiplomaUpserter {
    repo: Repository,
    registry: Arc<dyn EntityRegistry>,
}

impl DiplomaUpserter {
    pub fn new(repo: Repository, registry: Arc<dyn EntityRegistry>) -> Self {
        Self { repo, registry }
    }

    /// Validate, resolve references, then insert or overwrite the diploma.
    ///
    /// Nothing is written when validation fails.
    #[instrument(skip(self, attributes), fields(diploma = %attributes.name))]
    pub async fn upsert(&self, attributes: &DiplomaAttributes) -> Result<Diploma> {
        let diploma = attributes.clone().into_diploma()?;

        for link in diploma.links() {
            self.registry.find_or_create(link.kind, &link.name).await?;
        }

        let conn = self.repo.write_conn();
        let outcome = match queries::write_diploma(conn, &diploma).await {
            // Inserted concurrently by another writer: the second pass takes the update path
            Err(e) if e.is_unique_violation() => queries::write_diploma(conn, &diploma).await?,
            other => other?,
        };

        log_write(&diploma, outcome);
        Ok(diploma)
    }

    /// Load a diploma with its reference edges
    pub async fn load(&self, name: &str) -> Result<Diploma> {
        self.repo
            .load_diploma(name.trim())
            .await?
            .ok_or_else(|| AppError::DiplomaNotFound {
                name: name.trim().to_string(),
            })
    }
}

/// Write an already normalized diploma on `conn`, creating missing reference
/// entities first. Used to restore a diploma inside an open transaction.
pub async fn write_on<C: ConnectionTrait>(conn: &C, diploma: &Diploma) -> Result<DiplomaWrite> {
    for link in diploma.links() {
        registry::find_or_create_on(conn, link.kind, &link.name).await?;
    }
    let outcome = queries::write_diploma(conn, diploma).await?;
    log_write(diploma, outcome);
    Ok(outcome)
}

fn log_write(diploma: &Diploma, outcome: DiplomaWrite) {
    if outcome.is_noop() {
        debug!(diploma = %diploma.name, "Diploma unchanged");
    } else {
        debug!(
            diploma = %diploma.name,
            created = outcome.created,
            updated = outcome.updated,
            links_added = outcome.links_added,
            links_removed = outcome.links_removed,
            "Diploma written"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diploma_common::db::GraphStats;
    use diploma_common::graph::EntityKind;
    use diploma_common::registry::SeaOrmRegistry;
    use diploma_common::DbPool;

    async fn upserter() -> (DiplomaUpserter, Repository) {
        let repo = Repository::new(DbPool::sqlite_in_memory().await.unwrap());
        let registry = SeaOrmRegistry::shared(repo.clone());
        (DiplomaUpserter::new(repo.clone(), registry), repo)
    }

    fn cs_bsc() -> DiplomaAttributes {
        DiplomaAttributes {
            name: "CS-BSc".into(),
            city: Some("Rabat".into()),
            school: Some("ENSIAS".into()),
            duration: Some(3),
            mention: Some("Bien".into()),
            careers: vec!["Software Engineer".into(), "Data Scientist".into()],
            subjects: vec!["Algorithms".into()],
            previous_diplomas: vec!["Bac Sciences Maths".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_node_edges_and_entities() {
        let (upserter, repo) = upserter().await;

        let diploma = upserter.upsert(&cs_bsc()).await.unwrap();
        assert_eq!(upserter.load("CS-BSc").await.unwrap(), diploma);

        let stats = repo.graph_stats().await.unwrap();
        assert_eq!(stats.diplomas, 1);
        // city, school, mention, 2 careers, 1 subject, 1 previous diploma
        assert_eq!(stats.diploma_links, 7);
        assert_eq!(stats.reference_entities, 7);
        assert_eq!(repo.count_references(EntityKind::School).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_edges_and_clears_scalars() {
        let (upserter, repo) = upserter().await;
        upserter.upsert(&cs_bsc()).await.unwrap();

        let mut changed = cs_bsc();
        changed.careers = vec!["Data Scientist".into(), "Researcher".into()];
        changed.duration = None;
        changed.school = None;
        let diploma = upserter.upsert(&changed).await.unwrap();

        let loaded = upserter.load("CS-BSc").await.unwrap();
        assert_eq!(loaded, diploma);
        assert_eq!(loaded.duration, None);
        assert_eq!(loaded.school, None);
        assert!(loaded.careers.contains("Researcher"));
        assert!(!loaded.careers.contains("Software Engineer"));

        // Reference entities are never deleted
        assert_eq!(repo.count_references(EntityKind::Career).await.unwrap(), 3);
        assert_eq!(repo.graph_stats().await.unwrap().diplomas, 1);
    }

    #[tokio::test]
    async fn test_identical_upsert_is_stable() {
        let (upserter, repo) = upserter().await;
        upserter.upsert(&cs_bsc()).await.unwrap();
        let before = repo.graph_stats().await.unwrap();

        upserter.upsert(&cs_bsc()).await.unwrap();
        assert_eq!(repo.graph_stats().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_invalid_diploma_writes_nothing() {
        let (upserter, repo) = upserter().await;

        let mut negative = cs_bsc();
        negative.duration = Some(-2);
        assert!(matches!(
            upserter.upsert(&negative).await,
            Err(AppError::Validation { .. })
        ));
        assert!(upserter.upsert(&DiplomaAttributes::named(" ")).await.is_err());

        assert_eq!(repo.graph_stats().await.unwrap(), GraphStats::default());
    }

    #[tokio::test]
    async fn test_load_unknown_diploma() {
        let (upserter, _) = upserter().await;
        assert!(matches!(
            upserter.load("Nothing").await,
            Err(AppError::DiplomaNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_on_transaction() {
        let (upserter, repo) = upserter().await;
        let diploma = cs_bsc().into_diploma().unwrap();

        let txn = repo.begin().await.unwrap();
        let outcome = write_on(&txn, &diploma).await.unwrap();
        assert!(outcome.created);
        txn.commit().await.unwrap();

        assert_eq!(upserter.load("CS-BSc").await.unwrap(), diploma);
    }
}
