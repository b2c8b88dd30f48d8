//! Recommendation synchronizer
//!
//! Makes a user's stored recommendation set equal to the predictor's current
//! output. One run per user:
//! 1. Fetch ranked suggestions from the predictor
//! 2. Stage every usable suggestion as a diploma node (outside any transaction)
//! 3. In one transaction: retire stale edges, install or rescore staged ones,
//!    stamp the user and commit
//!
//! A predictor failure, or a storage failure while staging, leaves the
//! recommendation set untouched. Diplomas nobody else references are deleted
//! when retired.

use crate::diploma::{self, DiplomaUpserter};
use crate::locks::UserLocks;
use diploma_common::config::SyncConfig;
use diploma_common::db::queries;
use diploma_common::errors::{AppError, Result};
use diploma_common::graph::{Diploma, MatchScore, Profile, RecommendationView};
use diploma_common::metrics::{self, SyncCounts};
use diploma_common::predictor::{PredictedItem, Predictor};
use diploma_common::registry::{EntityRegistry, SeaOrmRegistry};
use diploma_common::{DbPool, Repository};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;
use validator::Validate;

/// A predicted item left out of the recommendation set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Position in the predictor response
    pub rank: u32,
    pub name: Option<String>,
    pub reason: String,
}

/// Outcome of one successful synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub email: String,
    /// The committed recommendation set, best ranked first
    pub recommendations: Vec<RecommendationView>,
    pub installed: usize,
    pub rescored: usize,
    pub unchanged: usize,
    pub retired: usize,
    /// Diploma nodes deleted because nothing referenced them any more
    pub deleted_diplomas: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    fn counts(&self) -> SyncCounts {
        SyncCounts {
            installed: self.installed,
            rescored: self.rescored,
            retired: self.retired,
            skipped: self.skipped.len(),
            deleted_diplomas: self.deleted_diplomas.len(),
        }
    }
}

/// A user whose run failed during a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFailure {
    pub email: String,
    pub error: String,
    pub retryable: bool,
}

/// Outcome of a batch run over every user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Emails synchronized successfully, sorted
    pub succeeded: Vec<String>,
    /// Failed users, sorted by email
    pub failed: Vec<UserFailure>,
    pub retrained: bool,
}

/// A staged (diploma, score) pair awaiting commit
struct Staged {
    diploma: Diploma,
    score: MatchScore,
    rank: u32,
}

/// Synchronizes stored recommendations with the predictor
#[derive(Clone)]
pub struct Synchronizer {
    repo: Repository,
    predictor: Arc<dyn Predictor>,
    upserter: DiplomaUpserter,
    locks: Option<Arc<UserLocks>>,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(pool: DbPool, predictor: Arc<dyn Predictor>, config: SyncConfig) -> Self {
        let repo = Repository::new(pool);
        let registry = SeaOrmRegistry::shared(repo.clone());
        Self::with_registry(repo, registry, predictor, config)
    }

    pub fn with_registry(
        repo: Repository,
        registry: Arc<dyn EntityRegistry>,
        predictor: Arc<dyn Predictor>,
        config: SyncConfig,
    ) -> Self {
        let locks = config
            .serialize_per_user
            .then(|| Arc::new(UserLocks::new()));

        Self {
            upserter: DiplomaUpserter::new(repo.clone(), registry),
            repo,
            predictor,
            locks,
            config,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn upserter(&self) -> &DiplomaUpserter {
        &self.upserter
    }

    // ========================================================================
    // Profile Operations
    // ========================================================================

    /// Create the user or replace their profile.
    pub async fn save_profile(&self, email: &str, mut profile: Profile) -> Result<Profile> {
        profile.email = email.trim().to_string();
        profile.validate()?;

        self.repo.save_profile(&profile).await?;
        info!(email = %profile.email, "Profile saved");
        Ok(profile)
    }

    /// Save the profile, then synchronize against it.
    pub async fn sync_with_profile(&self, email: &str, profile: Profile) -> Result<SyncReport> {
        let profile = self.save_profile(email, profile).await?;
        self.sync_user(&profile.email).await
    }

    /// Stored recommendations, best ranked first
    pub async fn recommendations(&self, email: &str) -> Result<Vec<RecommendationView>> {
        if self.repo.find_user(email).await?.is_none() {
            return Err(AppError::UserNotFound {
                email: email.to_string(),
            });
        }
        self.repo.recommendations(email).await
    }

    /// Stored recommendations, or a fresh synchronization when there are none.
    pub async fn recommend(&self, email: &str) -> Result<Vec<RecommendationView>> {
        let stored = self.recommendations(email).await?;
        if !stored.is_empty() {
            return Ok(stored);
        }
        Ok(self.sync_user(email).await?.recommendations)
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Run one synchronization for `email`.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn sync_user(&self, email: &str) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));

        let started = Instant::now();
        let result = self.run(run_id, email).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                metrics::record_sync(elapsed, true, report.counts());
                info!(
                    recommendations = report.recommendations.len(),
                    installed = report.installed,
                    rescored = report.rescored,
                    unchanged = report.unchanged,
                    retired = report.retired,
                    deleted = report.deleted_diplomas.len(),
                    skipped = report.skipped.len(),
                    duration_ms = (elapsed * 1000.0) as u64,
                    "Synchronization committed"
                );
            }
            Err(e) => {
                metrics::record_sync(elapsed, false, SyncCounts::default());
                warn!(error = %e, retryable = e.is_retryable(), "Synchronization failed");
            }
        }

        result
    }

    async fn run(&self, run_id: Uuid, email: &str) -> Result<SyncReport> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(email).await),
            None => None,
        };

        let user = self
            .repo
            .find_user(email)
            .await?
            .ok_or_else(|| AppError::UserNotFound {
                email: email.to_string(),
            })?;
        let profile = queries::profile_of(&user);

        // Fetch: any error here aborts before the store is touched
        let items = self.predictor.predict(&profile).await?;
        debug!(items = items.len(), "Predictor responded");

        let (staged, skipped) = self.stage(items).await?;

        self.commit(run_id, email, staged, skipped).await
    }

    /// Upsert every usable item. Invalid items become skipped entries; any
    /// other failure aborts the run before the commit starts.
    async fn stage(&self, items: Vec<PredictedItem>) -> Result<(Vec<Staged>, Vec<SkippedItem>)> {
        let mut staged = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();

        for (position, item) in items.into_iter().enumerate() {
            let rank = u32::try_from(position).unwrap_or(u32::MAX);

            let prediction = match item {
                Ok(prediction) => prediction,
                Err(e) => {
                    warn!(rank, error = %e, "Skipping undecodable predictor item");
                    skipped.push(SkippedItem {
                        rank,
                        name: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let name = prediction.attributes.name.trim().to_string();
            if seen.contains(&name) {
                debug!(rank, diploma = %name, "Skipping duplicate predictor item");
                skipped.push(SkippedItem {
                    rank,
                    name: Some(name),
                    reason: "duplicate of a better ranked item".to_string(),
                });
                continue;
            }

            match self.upserter.upsert(&prediction.attributes).await {
                Ok(diploma) => {
                    seen.insert(diploma.name.clone());
                    staged.push(Staged {
                        diploma,
                        score: prediction.score,
                        rank,
                    });
                }
                Err(e) if e.is_invalid_input() => {
                    warn!(rank, diploma = %name, error = %e, "Skipping predictor item");
                    skipped.push(SkippedItem {
                        rank,
                        name: Some(name),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(rank, diploma = %name, error = %e, "Staging failed, aborting run");
                    return Err(e);
                }
            }
        }

        Ok((staged, skipped))
    }

    /// Diff, retire, install and commit inside one transaction.
    ///
    /// Returning early drops the transaction, which rolls it back.
    async fn commit(
        &self,
        run_id: Uuid,
        email: &str,
        staged: Vec<Staged>,
        skipped: Vec<SkippedItem>,
    ) -> Result<SyncReport> {
        let txn = self.repo.begin().await?;

        let current = queries::recommendations_of(&txn, email).await?;
        let wanted: HashSet<&str> = staged.iter().map(|s| s.diploma.name.as_str()).collect();

        let mut retired = 0;
        let mut deleted_diplomas = Vec::new();
        let mut kept = HashMap::new();

        for edge in current {
            if wanted.contains(edge.diploma_name.as_str()) {
                kept.insert(edge.diploma_name.clone(), edge);
                continue;
            }

            queries::delete_recommendation(&txn, email, &edge.diploma_name).await?;
            retired += 1;

            if !queries::diploma_is_referenced(&txn, &edge.diploma_name, email).await?
                && queries::delete_diploma(&txn, &edge.diploma_name).await?
            {
                debug!(diploma = %edge.diploma_name, "Deleted unreferenced diploma");
                deleted_diplomas.push(edge.diploma_name);
            }
        }

        let (mut installed, mut rescored, mut unchanged) = (0, 0, 0);

        for item in &staged {
            let name = item.diploma.name.as_str();

            if queries::find_diploma_row(&txn, name).await?.is_none() {
                // Retired by another user's run since staging
                info!(diploma = %name, "Restoring diploma deleted concurrently");
                diploma::write_on(&txn, &item.diploma).await?;
            }

            match kept.remove(name) {
                None => {
                    queries::insert_recommendation(&txn, email, name, item.score, item.rank).await?;
                    installed += 1;
                }
                Some(edge) => {
                    if queries::rescore_recommendation(&txn, edge, item.score, item.rank).await? {
                        rescored += 1;
                    } else {
                        unchanged += 1;
                    }
                }
            }
        }

        queries::mark_synced(&txn, email).await?;
        let recommendations = queries::recommendation_views(&txn, email).await?;

        txn.commit().await.map_err(|e| AppError::Transaction {
            message: format!("Failed to commit synchronization: {}", e),
        })?;

        Ok(SyncReport {
            run_id,
            email: email.to_string(),
            recommendations,
            installed,
            rescored,
            unchanged,
            retired,
            deleted_diplomas,
            skipped,
            synced_at: Utc::now(),
        })
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Synchronize every user. Per-user failures are reported, never raised.
    #[instrument(skip(self), fields(batch_id = tracing::field::Empty))]
    pub async fn sync_all(&self) -> Result<BatchReport> {
        let batch_id = Uuid::new_v4();
        Span::current().record("batch_id", tracing::field::display(batch_id));

        let mut retrained = false;
        if self.config.retrain_before_batch {
            match self.predictor.retrain().await {
                Ok(()) => {
                    info!("Predictor retrained");
                    retrained = true;
                }
                Err(e) => warn!(error = %e, "Retrain failed, continuing with the current model"),
            }
        }

        let emails = self.repo.list_user_emails().await?;
        info!(users = emails.len(), concurrency = self.config.concurrency, "Starting batch");

        let outcomes: Vec<(String, Result<SyncReport>)> = stream::iter(emails)
            .map(|email| async move {
                let result = self.sync_user(&email).await;
                (email, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = BatchReport {
            batch_id,
            retrained,
            ..Default::default()
        };

        for (email, result) in outcomes {
            match result {
                Ok(_) => report.succeeded.push(email),
                Err(e) => {
                    error!(email = %email, error = %e, "User synchronization failed in batch");
                    report.failed.push(UserFailure {
                        email,
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        report.succeeded.sort();
        report.failed.sort_by(|a, b| a.email.cmp(&b.email));
        metrics::record_batch(report.failed.len());

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diploma_common::graph::DiplomaAttributes;
    use diploma_common::predictor::{MockPredictor, Prediction};

    fn config() -> SyncConfig {
        SyncConfig {
            concurrency: 2,
            retrain_before_batch: true,
            ..Default::default()
        }
    }

    async fn synchronizer(predictor: Arc<MockPredictor>) -> Synchronizer {
        let pool = DbPool::sqlite_in_memory().await.unwrap();
        Synchronizer::new(pool, predictor, config())
    }

    fn predicted(name: &str, percent: f64) -> Prediction {
        Prediction::new(
            DiplomaAttributes::named(name),
            MatchScore::from_percent(percent).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let sync = synchronizer(Arc::new(MockPredictor::new())).await;
        assert!(matches!(
            sync.sync_user("ghost@x.com").await,
            Err(AppError::UserNotFound { .. })
        ));
        assert!(matches!(
            sync.recommendations("ghost@x.com").await,
            Err(AppError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_profile_validates_email() {
        let sync = synchronizer(Arc::new(MockPredictor::new())).await;
        let err = sync
            .save_profile("not-an-email", Profile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_stage_skips_bad_and_duplicate_items() {
        let predictor = Arc::new(MockPredictor::new());
        predictor.respond_items(
            "a@x.com",
            vec![
                Ok(predicted("CS-BSc", 92.0)),
                Err("no name".into()),
                Ok(predicted(" CS-BSc", 40.0)),
                Ok(Prediction::new(
                    DiplomaAttributes {
                        duration: Some(-1),
                        ..DiplomaAttributes::named("Bad-Duration")
                    },
                    MatchScore::ZERO,
                )),
                Ok(predicted("Math-BSc", 70.0)),
            ],
        );
        let sync = synchronizer(predictor).await;
        sync.save_profile("a@x.com", Profile::default()).await.unwrap();

        let report = sync.sync_user("a@x.com").await.unwrap();

        let names: Vec<&str> = report
            .recommendations
            .iter()
            .map(|r| r.diploma.name.as_str())
            .collect();
        assert_eq!(names, vec!["CS-BSc", "Math-BSc"]);
        assert_eq!(report.recommendations[1].rank, 4);
        assert_eq!(report.recommendations[0].score.basis_points(), 9200);

        let skipped: Vec<u32> = report.skipped.iter().map(|s| s.rank).collect();
        assert_eq!(skipped, vec![1, 2, 3]);
        assert_eq!(report.skipped[0].name, None);
        assert_eq!(report.skipped[1].name.as_deref(), Some("CS-BSc"));
    }

    #[tokio::test]
    async fn test_rescore_and_unchanged_counts() {
        let predictor = Arc::new(MockPredictor::new());
        predictor.respond("a@x.com", vec![predicted("CS-BSc", 92.0), predicted("Math-BSc", 61.0)]);
        let sync = synchronizer(predictor.clone()).await;
        sync.save_profile("a@x.com", Profile::default()).await.unwrap();

        let first = sync.sync_user("a@x.com").await.unwrap();
        assert_eq!(first.installed, 2);

        predictor.respond("a@x.com", vec![predicted("CS-BSc", 95.5), predicted("Math-BSc", 61.0)]);
        let second = sync.sync_user("a@x.com").await.unwrap();
        assert_eq!((second.installed, second.rescored, second.unchanged), (0, 1, 1));
        assert_ne!(first.run_id, second.run_id);

        let user = sync.repository().find_user("a@x.com").await.unwrap().unwrap();
        assert!(user.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_recommend_syncs_only_when_empty() {
        let predictor = Arc::new(MockPredictor::new());
        predictor.respond("a@x.com", vec![predicted("CS-BSc", 92.0)]);
        let sync = synchronizer(predictor.clone()).await;
        sync.save_profile("a@x.com", Profile::default()).await.unwrap();

        assert_eq!(sync.recommend("a@x.com").await.unwrap().len(), 1);
        assert_eq!(sync.recommend("a@x.com").await.unwrap().len(), 1);
        assert_eq!(predictor.predict_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_survives_failed_retrain() {
        let predictor = Arc::new(MockPredictor::with_failing_retrain());
        let sync = synchronizer(predictor.clone()).await;
        sync.save_profile("a@x.com", Profile::default()).await.unwrap();

        let report = sync.sync_all().await.unwrap();
        assert!(!report.retrained);
        assert_eq!(report.succeeded, vec!["a@x.com"]);
        assert_eq!(predictor.retrain_calls(), 1);
    }
}
