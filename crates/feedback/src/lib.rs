//! Diploma Feedback Store
//!
//! One feedback edge per (user, diploma): a 0 to 5 rating, a like flag and
//! free-text notes. Each write caches the live recommendation score; reads
//! report the live score instead.

use chrono::Utc;
use diploma_common::db::models::Feedback;
use diploma_common::db::queries;
use diploma_common::errors::{AppError, Result};
use diploma_common::graph::{FeedbackView, MatchScore};
use diploma_common::metrics;
use diploma_common::{DbPool, Repository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use validator::Validate;

/// Maximum rating
pub const MAX_RATING: f64 = 5.0;

/// Fields a user writes on a diploma
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct FeedbackInput {
    /// 0.0 means not rated
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: f64,

    #[serde(default)]
    pub like: bool,

    #[serde(default)]
    pub notes: Vec<String>,
}

impl FeedbackInput {
    fn check(&self) -> Result<()> {
        if !self.rating.is_finite() {
            return Err(AppError::validation("rating", "rating must be a finite number"));
        }
        self.validate()?;
        Ok(())
    }
}

/// Feedback operations over the shared repository
#[derive(Clone)]
pub struct FeedbackStore {
    repo: Repository,
}

impl FeedbackStore {
    pub fn new(pool: DbPool) -> Self {
        Self::from_repository(Repository::new(pool))
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create or overwrite the user's feedback on a diploma.
    pub async fn upsert(
        &self,
        email: &str,
        diploma_name: &str,
        input: FeedbackInput,
    ) -> Result<FeedbackView> {
        let diploma_name = diploma_name.trim();
        if diploma_name.is_empty() {
            return Err(AppError::validation("diploma", "diploma name must not be empty"));
        }
        input.check()?;

        self.require_user(email).await?;
        let diploma = self
            .repo
            .load_diploma(diploma_name)
            .await?
            .ok_or_else(|| AppError::DiplomaNotFound {
                name: diploma_name.to_string(),
            })?;

        let live = self.live_score(email, diploma_name).await?;
        let now = Utc::now();

        let saved = self
            .repo
            .save_feedback(Feedback {
                user_email: email.to_string(),
                diploma_name: diploma_name.to_string(),
                rating: input.rating,
                liked: input.like,
                notes: serde_json::Value::from(input.notes),
                cached_score: live.map(MatchScore::basis_points),
                created_at: now.into(),
                updated_at: now.into(),
            })
            .await?;

        metrics::record_feedback("upsert");
        info!(
            email = %email,
            diploma = %diploma_name,
            rating = saved.rating,
            liked = saved.liked,
            "Feedback saved"
        );

        view(&saved, diploma, live)
    }

    /// The user's feedback on a diploma, with the live match score
    pub async fn get(&self, email: &str, diploma_name: &str) -> Result<FeedbackView> {
        let diploma_name = diploma_name.trim();
        let feedback = self
            .repo
            .find_feedback(email, diploma_name)
            .await?
            .ok_or_else(|| AppError::FeedbackNotFound {
                email: email.to_string(),
                diploma: diploma_name.to_string(),
            })?;

        let diploma = self
            .repo
            .load_diploma(diploma_name)
            .await?
            .ok_or_else(|| AppError::DiplomaNotFound {
                name: diploma_name.to_string(),
            })?;
        let live = self.live_score(email, diploma_name).await?;

        view(&feedback, diploma, live)
    }

    /// Remove the feedback edge only. Returns false if there was none.
    pub async fn delete(&self, email: &str, diploma_name: &str) -> Result<bool> {
        let diploma_name = diploma_name.trim();
        let deleted = self.repo.delete_feedback(email, diploma_name).await?;

        if deleted {
            metrics::record_feedback("delete");
            debug!(email = %email, diploma = %diploma_name, "Feedback deleted");
        } else {
            warn!(email = %email, diploma = %diploma_name, "No feedback to delete");
        }
        Ok(deleted)
    }

    /// Every feedback of the user, most recent first
    pub async fn list(&self, email: &str) -> Result<Vec<FeedbackView>> {
        self.require_user(email).await?;

        let rows = self.repo.feedback_of(email).await?;
        let names: Vec<String> = rows.iter().map(|f| f.diploma_name.clone()).collect();
        let mut diplomas = self.repo.load_diplomas(&names).await?;

        let live: HashMap<String, MatchScore> = self
            .repo
            .recommendations(email)
            .await?
            .into_iter()
            .map(|r| (r.diploma.name, r.score))
            .collect();

        rows.iter()
            .map(|feedback| {
                let diploma = diplomas.remove(&feedback.diploma_name).ok_or_else(|| {
                    AppError::Internal {
                        message: format!("feedback points at missing diploma {}", feedback.diploma_name),
                    }
                })?;
                view(feedback, diploma, live.get(&feedback.diploma_name).copied())
            })
            .collect()
    }

    /// Feedback the user marked as liked
    pub async fn list_liked(&self, email: &str) -> Result<Vec<FeedbackView>> {
        let mut views = self.list(email).await?;
        views.retain(|v| v.liked);
        Ok(views)
    }

    /// Feedback carrying a rating above zero
    pub async fn list_rated(&self, email: &str) -> Result<Vec<FeedbackView>> {
        let mut views = self.list(email).await?;
        views.retain(|v| v.rating > 0.0);
        Ok(views)
    }

    async fn require_user(&self, email: &str) -> Result<()> {
        match self.repo.find_user(email).await? {
            Some(_) => Ok(()),
            None => Err(AppError::UserNotFound {
                email: email.to_string(),
            }),
        }
    }

    async fn live_score(&self, email: &str, diploma_name: &str) -> Result<Option<MatchScore>> {
        match self.repo.find_recommendation(email, diploma_name).await? {
            Some(edge) => Ok(Some(MatchScore::from_basis_points(edge.score)?)),
            None => Ok(None),
        }
    }
}

fn view(
    feedback: &Feedback,
    diploma: diploma_common::Diploma,
    live: Option<MatchScore>,
) -> Result<FeedbackView> {
    Ok(FeedbackView {
        diploma,
        rating: feedback.rating,
        liked: feedback.liked,
        notes: queries::json_strings(&feedback.notes),
        match_score: live,
        cached_match_score: feedback
            .cached_score
            .map(MatchScore::from_basis_points)
            .transpose()?,
        updated_at: feedback.updated_at.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use diploma_common::db::GraphStats;
    use diploma_common::graph::{DiplomaAttributes, Profile};
    use sea_orm::{EntityTrait, PaginatorTrait};
    use tokio_test::{assert_err, assert_ok};

    async fn store() -> (FeedbackStore, Repository) {
        let repo = Repository::new(DbPool::sqlite_in_memory().await.unwrap());
        repo.save_profile(&Profile::new("a@x.com")).await.unwrap();

        for name in ["CS-BSc", "Math-BSc"] {
            let diploma = DiplomaAttributes::named(name).into_diploma().unwrap();
            queries::write_diploma(repo.write_conn(), &diploma).await.unwrap();
        }
        queries::insert_recommendation(
            repo.write_conn(),
            "a@x.com",
            "CS-BSc",
            MatchScore::from_percent(92.0).unwrap(),
            0,
        )
        .await
        .unwrap();

        (FeedbackStore::from_repository(repo.clone()), repo)
    }

    fn input(rating: f64, like: bool) -> FeedbackInput {
        FeedbackInput {
            rating,
            like,
            notes: vec!["great labs".into()],
        }
    }

    async fn feedback_rows(repo: &Repository) -> u64 {
        diploma_common::db::models::FeedbackEntity::find()
            .count(repo.read_conn())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row_with_latest_rating() {
        let (store, repo) = store().await;

        assert_ok!(store.upsert("a@x.com", "CS-BSc", input(3.0, false)).await);
        let view = assert_ok!(store.upsert("a@x.com", "CS-BSc", input(4.5, true)).await);

        assert_eq!(view.rating, 4.5);
        assert!(view.liked);
        assert_eq!(view.notes, vec!["great labs"]);
        assert_eq!(feedback_rows(&repo).await, 1);
        assert_eq!(store.get("a@x.com", "CS-BSc").await.unwrap().rating, 4.5);
    }

    #[tokio::test]
    async fn test_cached_score_follows_live_recommendation() {
        let (store, repo) = store().await;

        let recommended = store.upsert("a@x.com", "CS-BSc", input(4.0, true)).await.unwrap();
        assert_eq!(recommended.match_score.map(MatchScore::basis_points), Some(9200));

        let plain = store.upsert("a@x.com", "Math-BSc", input(2.0, false)).await.unwrap();
        assert_eq!(plain.match_score, None);

        let row = repo.find_feedback("a@x.com", "CS-BSc").await.unwrap().unwrap();
        assert_eq!(row.cached_score, Some(9200));
        assert_eq!(recommended.cached_match_score, recommended.match_score);
    }

    #[tokio::test]
    async fn test_reads_keep_cached_score_apart_from_live_score() {
        let (store, repo) = store().await;
        store.upsert("a@x.com", "CS-BSc", input(4.0, true)).await.unwrap();

        // The recommendation goes away after the feedback was written
        queries::delete_recommendation(repo.write_conn(), "a@x.com", "CS-BSc")
            .await
            .unwrap();

        let view = assert_ok!(store.get("a@x.com", "CS-BSc").await);
        assert_eq!(view.match_score, None);
        assert_eq!(view.cached_match_score.map(MatchScore::basis_points), Some(9200));

        let listed = store.list("a@x.com").await.unwrap();
        assert_eq!(listed[0].cached_match_score, view.cached_match_score);

        // Reads never rewrite the cache
        let row = repo.find_feedback("a@x.com", "CS-BSc").await.unwrap().unwrap();
        assert_eq!(row.cached_score, Some(9200));
    }

    #[tokio::test]
    async fn test_validation_and_missing_nodes() {
        let (store, repo) = store().await;

        for rating in [-0.5, 5.5, f64::NAN, f64::INFINITY] {
            let err = assert_err!(store.upsert("a@x.com", "CS-BSc", input(rating, false)).await);
            assert!(matches!(err, AppError::Validation { .. }), "rating {}", rating);
        }
        assert_err!(store.upsert("a@x.com", "  ", input(1.0, false)).await);

        assert!(matches!(
            store.upsert("ghost@x.com", "CS-BSc", input(1.0, false)).await,
            Err(AppError::UserNotFound { .. })
        ));
        assert!(matches!(
            store.upsert("a@x.com", "Nothing", input(1.0, false)).await,
            Err(AppError::DiplomaNotFound { .. })
        ));
        assert_eq!(feedback_rows(&repo).await, 0);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let (store, repo) = store().await;

        assert!(matches!(
            store.get("a@x.com", "CS-BSc").await,
            Err(AppError::FeedbackNotFound { .. })
        ));

        store.upsert("a@x.com", "CS-BSc", input(5.0, true)).await.unwrap();
        let before: GraphStats = repo.graph_stats().await.unwrap();

        assert!(store.delete("a@x.com", "CS-BSc").await.unwrap());
        assert!(!store.delete("a@x.com", "CS-BSc").await.unwrap());

        // Only the feedback edge goes away
        let after = repo.graph_stats().await.unwrap();
        assert_eq!(after.feedback, before.feedback - 1);
        assert_eq!(after.diplomas, before.diplomas);
        assert_eq!(after.recommendations, before.recommendations);
    }

    #[tokio::test]
    async fn test_liked_and_rated_lists() {
        let (store, _) = store().await;

        store.upsert("a@x.com", "CS-BSc", input(0.0, true)).await.unwrap();
        store.upsert("a@x.com", "Math-BSc", input(3.5, false)).await.unwrap();

        let all = store.list("a@x.com").await.unwrap();
        assert_eq!(all.len(), 2);

        let liked: Vec<String> = store
            .list_liked("a@x.com")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.diploma.name)
            .collect();
        assert_eq!(liked, vec!["CS-BSc"]);

        let rated: Vec<String> = store
            .list_rated("a@x.com")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.diploma.name)
            .collect();
        assert_eq!(rated, vec!["Math-BSc"]);

        assert!(matches!(
            store.list("ghost@x.com").await,
            Err(AppError::UserNotFound { .. })
        ));
    }
}
