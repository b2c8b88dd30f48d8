//! Repository pattern for database operations
//!
//! Pool-backed access to users, diplomas, recommendations and feedback.
//! Multi-statement changes go through [`Repository::begin`] and the
//! connection-generic functions in [`crate::db::queries`].

use crate::db::models::*;
use crate::db::queries;
use crate::db::DbPool;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::graph::{Diploma, EntityKind, Profile, RecommendationView};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::prelude::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node and edge counts, for health output and tests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub users: u64,
    pub diplomas: u64,
    pub reference_entities: u64,
    pub diploma_links: u64,
    pub recommendations: u64,
    pub feedback: u64,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    pub fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    pub fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Open a transaction on the primary.
    ///
    /// Dropping it without `commit` rolls everything back.
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.write_conn()
            .begin()
            .await
            .map_err(|e| AppError::Transaction {
                message: format!("Failed to begin transaction: {}", e),
            })
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    pub async fn graph_stats(&self) -> Result<GraphStats> {
        let conn = self.read_conn();
        Ok(GraphStats {
            users: UserEntity::find().count(conn).await?,
            diplomas: DiplomaEntity::find().count(conn).await?,
            reference_entities: ReferenceEntity::find().count(conn).await?,
            diploma_links: DiplomaLinkEntity::find().count(conn).await?,
            recommendations: RecommendationEntity::find().count(conn).await?,
            feedback: FeedbackEntity::find().count(conn).await?,
        })
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn find_user(&self, email: &str) -> Result<Option<User>> {
        queries::find_user(self.read_conn(), email).await
    }

    pub async fn find_profile(&self, email: &str) -> Result<Option<Profile>> {
        Ok(self.find_user(email).await?.as_ref().map(queries::profile_of))
    }

    /// Create the user node or replace its profile. The email is the key.
    pub async fn save_profile(&self, profile: &Profile) -> Result<User> {
        let conn = self.write_conn();
        let now = Utc::now();

        if let Some(existing) = queries::find_user(conn, &profile.email).await? {
            return update_profile(conn, existing, profile).await;
        }

        let user = UserActiveModel {
            email: Set(profile.email.clone()),
            subjects: Set(Json::from(profile.subjects.clone())),
            career_aspirations: Set(Json::from(profile.career_aspirations.clone())),
            filiere: Set(profile.filiere.clone()),
            mention: Set(profile.mention.clone()),
            duration: Set(profile.duration),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            last_synced_at: Set(None),
        };

        match UserEntity::insert(user).exec_without_returning(conn).await {
            Ok(_) => {}
            // Created concurrently: fall back to an update of the winner's row
            Err(e) if is_unique_violation(&e) => {}
            Err(e) => return Err(e.into()),
        }

        let stored = queries::find_user(conn, &profile.email)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("user {} vanished after insert", profile.email),
            })?;

        if queries::profile_of(&stored) == *profile {
            Ok(stored)
        } else {
            update_profile(conn, stored, profile).await
        }
    }

    /// Every user email, in key order
    pub async fn list_user_emails(&self) -> Result<Vec<String>> {
        UserEntity::find()
            .select_only()
            .column(UserColumn::Email)
            .order_by_asc(UserColumn::Email)
            .into_tuple::<String>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Diploma Operations
    // ========================================================================

    pub async fn load_diploma(&self, name: &str) -> Result<Option<Diploma>> {
        queries::load_diploma(self.read_conn(), name).await
    }

    pub async fn load_diplomas(&self, names: &[String]) -> Result<HashMap<String, Diploma>> {
        queries::load_diplomas(self.read_conn(), names).await
    }

    pub async fn count_references(&self, kind: EntityKind) -> Result<u64> {
        queries::count_references(self.read_conn(), kind).await
    }

    // ========================================================================
    // Recommendation Operations
    // ========================================================================

    /// Stored recommendations of a user, best ranked first
    pub async fn recommendations(&self, email: &str) -> Result<Vec<RecommendationView>> {
        queries::recommendation_views(self.read_conn(), email).await
    }

    pub async fn find_recommendation(
        &self,
        email: &str,
        diploma: &str,
    ) -> Result<Option<Recommendation>> {
        queries::find_recommendation(self.read_conn(), email, diploma).await
    }

    // ========================================================================
    // Feedback Operations
    // ========================================================================

    pub async fn find_feedback(&self, email: &str, diploma: &str) -> Result<Option<Feedback>> {
        FeedbackEntity::find_by_id((email.to_string(), diploma.to_string()))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Feedback rows of a user, most recently written first
    pub async fn feedback_of(&self, email: &str) -> Result<Vec<Feedback>> {
        FeedbackEntity::find()
            .filter(FeedbackColumn::UserEmail.eq(email))
            .order_by_desc(FeedbackColumn::UpdatedAt)
            .order_by_asc(FeedbackColumn::DiplomaName)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Insert the (user, diploma) feedback edge or overwrite its fields.
    ///
    /// `created_at` of an existing edge is preserved.
    pub async fn save_feedback(&self, feedback: Feedback) -> Result<Feedback> {
        let conn = self.write_conn();

        if let Some(existing) = self
            .find_feedback(&feedback.user_email, &feedback.diploma_name)
            .await?
        {
            return overwrite_feedback(conn, existing, feedback).await;
        }

        let row = FeedbackActiveModel {
            user_email: Set(feedback.user_email.clone()),
            diploma_name: Set(feedback.diploma_name.clone()),
            rating: Set(feedback.rating),
            liked: Set(feedback.liked),
            notes: Set(feedback.notes.clone()),
            cached_score: Set(feedback.cached_score),
            created_at: Set(feedback.created_at),
            updated_at: Set(feedback.updated_at),
        };

        match FeedbackEntity::insert(row).exec_without_returning(conn).await {
            Ok(_) => Ok(feedback),
            Err(e) if is_unique_violation(&e) => {
                let existing = self
                    .find_feedback(&feedback.user_email, &feedback.diploma_name)
                    .await?
                    .ok_or_else(|| AppError::Internal {
                        message: "feedback vanished after duplicate insert".to_string(),
                    })?;
                overwrite_feedback(conn, existing, feedback).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns false if there was nothing to delete
    pub async fn delete_feedback(&self, email: &str, diploma: &str) -> Result<bool> {
        let result = FeedbackEntity::delete_by_id((email.to_string(), diploma.to_string()))
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected > 0)
    }
}

async fn update_profile(
    conn: &DatabaseConnection,
    existing: User,
    profile: &Profile,
) -> Result<User> {
    let mut user: UserActiveModel = existing.into();
    user.subjects = Set(Json::from(profile.subjects.clone()));
    user.career_aspirations = Set(Json::from(profile.career_aspirations.clone()));
    user.filiere = Set(profile.filiere.clone());
    user.mention = Set(profile.mention.clone());
    user.duration = Set(profile.duration);
    user.updated_at = Set(Utc::now().into());
    user.update(conn).await.map_err(Into::into)
}

async fn overwrite_feedback(
    conn: &DatabaseConnection,
    existing: Feedback,
    feedback: Feedback,
) -> Result<Feedback> {
    let mut row: FeedbackActiveModel = existing.into();
    row.rating = Set(feedback.rating);
    row.liked = Set(feedback.liked);
    row.notes = Set(feedback.notes);
    row.cached_score = Set(feedback.cached_score);
    row.updated_at = Set(feedback.updated_at);
    row.update(conn).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repository() -> Repository {
        Repository::new(DbPool::sqlite_in_memory().await.unwrap())
    }

    fn profile(email: &str) -> Profile {
        Profile {
            subjects: vec!["Maths".into(), "Physics".into()],
            career_aspirations: vec!["Engineer".into()],
            filiere: Some("Sciences Maths".into()),
            duration: Some(5),
            mention: Some("Bien".into()),
            ..Profile::new(email)
        }
    }

    #[tokio::test]
    async fn test_save_profile_creates_then_replaces() {
        let repo = repository().await;

        let created = repo.save_profile(&profile("a@x.com")).await.unwrap();
        assert_eq!(created.email, "a@x.com");
        assert!(created.last_synced_at.is_none());

        let mut changed = profile("a@x.com");
        changed.subjects = vec!["Biology".into()];
        changed.mention = None;
        repo.save_profile(&changed).await.unwrap();

        assert_eq!(repo.find_profile("a@x.com").await.unwrap(), Some(changed));
        assert_eq!(repo.graph_stats().await.unwrap().users, 1);
    }

    #[tokio::test]
    async fn test_list_user_emails_is_sorted() {
        let repo = repository().await;
        for email in ["c@x.com", "a@x.com", "b@x.com"] {
            repo.save_profile(&profile(email)).await.unwrap();
        }

        assert_eq!(
            repo.list_user_emails().await.unwrap(),
            vec!["a@x.com", "b@x.com", "c@x.com"]
        );
    }

    #[tokio::test]
    async fn test_unknown_rows_read_as_none() {
        let repo = repository().await;
        assert!(repo.find_user("nobody@x.com").await.unwrap().is_none());
        assert!(repo.load_diploma("Nothing").await.unwrap().is_none());
        assert!(repo.recommendations("nobody@x.com").await.unwrap().is_empty());
        assert!(!repo.delete_feedback("nobody@x.com", "Nothing").await.unwrap());
    }
}
