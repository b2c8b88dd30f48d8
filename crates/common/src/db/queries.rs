//! Graph queries over any connection
//!
//! Every function takes a `ConnectionTrait`, so the same code runs against
//! the pool or inside an open transaction.

use crate::db::models::*;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::graph::{Diploma, EntityKind, EntityRef, MatchScore, Profile, RecommendationView};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use sea_orm::prelude::Json;
use std::collections::{BTreeSet, HashMap};

/// What a diploma write changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiplomaWrite {
    /// The diploma node did not exist before
    pub created: bool,
    /// Scalar columns changed on an existing node
    pub updated: bool,
    pub links_added: usize,
    pub links_removed: usize,
}

impl DiplomaWrite {
    pub fn is_noop(&self) -> bool {
        !self.created && !self.updated && self.links_added == 0 && self.links_removed == 0
    }
}

// ============================================================================
// Users
// ============================================================================

pub async fn find_user<C: ConnectionTrait>(conn: &C, email: &str) -> Result<Option<User>> {
    UserEntity::find_by_id(email)
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Profile stored on a user node
pub fn profile_of(user: &User) -> Profile {
    Profile {
        email: user.email.clone(),
        subjects: json_strings(&user.subjects),
        career_aspirations: json_strings(&user.career_aspirations),
        filiere: user.filiere.clone(),
        duration: user.duration,
        mention: user.mention.clone(),
    }
}

/// Stamp the commit time of a successful synchronization.
pub async fn mark_synced<C: ConnectionTrait>(conn: &C, email: &str) -> Result<()> {
    let user = find_user(conn, email)
        .await?
        .ok_or_else(|| AppError::UserNotFound {
            email: email.to_string(),
        })?;

    let mut active: UserActiveModel = user.into();
    active.last_synced_at = Set(Some(Utc::now().into()));
    active.update(conn).await?;
    Ok(())
}

// ============================================================================
// Reference entities
// ============================================================================

pub async fn find_reference<C: ConnectionTrait>(
    conn: &C,
    kind: EntityKind,
    name: &str,
) -> Result<Option<ReferenceRow>> {
    ReferenceEntity::find_by_id((kind.as_str().to_string(), name.to_string()))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Plain insert; a duplicate key surfaces as a unique violation.
pub async fn insert_reference<C: ConnectionTrait>(
    conn: &C,
    kind: EntityKind,
    name: &str,
) -> Result<()> {
    let row = ReferenceActiveModel {
        kind: Set(kind.as_str().to_string()),
        name: Set(name.to_string()),
    };
    ReferenceEntity::insert(row)
        .exec_without_returning(conn)
        .await
        .map_err(|e| duplicate_or(e, || format!("{}/{}", kind, name)))?;
    Ok(())
}

pub async fn count_references<C: ConnectionTrait>(conn: &C, kind: EntityKind) -> Result<u64> {
    ReferenceEntity::find()
        .filter(ReferenceColumn::Kind.eq(kind.as_str()))
        .count(conn)
        .await
        .map_err(Into::into)
}

// ============================================================================
// Diplomas
// ============================================================================

pub async fn find_diploma_row<C: ConnectionTrait>(
    conn: &C,
    name: &str,
) -> Result<Option<DiplomaRow>> {
    DiplomaEntity::find_by_id(name)
        .one(conn)
        .await
        .map_err(Into::into)
}

pub async fn diploma_links<C: ConnectionTrait>(conn: &C, name: &str) -> Result<BTreeSet<EntityRef>> {
    let rows = DiplomaLinkEntity::find()
        .filter(DiplomaLinkColumn::DiplomaName.eq(name))
        .all(conn)
        .await?;

    rows.into_iter().map(link_ref).collect()
}

/// Diploma node with its reference edges
pub async fn load_diploma<C: ConnectionTrait>(conn: &C, name: &str) -> Result<Option<Diploma>> {
    let Some(row) = find_diploma_row(conn, name).await? else {
        return Ok(None);
    };
    let links = diploma_links(conn, name).await?;
    Ok(Some(Diploma::from_links(
        row.name, row.city, row.school, row.duration, links,
    )))
}

/// Batch variant of [`load_diploma`]; absent names are left out.
pub async fn load_diplomas<C: ConnectionTrait>(
    conn: &C,
    names: &[String],
) -> Result<HashMap<String, Diploma>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = DiplomaEntity::find()
        .filter(DiplomaColumn::Name.is_in(names.iter().cloned()))
        .all(conn)
        .await?;

    let mut links: HashMap<String, Vec<EntityRef>> = HashMap::new();
    let link_rows = DiplomaLinkEntity::find()
        .filter(DiplomaLinkColumn::DiplomaName.is_in(names.iter().cloned()))
        .all(conn)
        .await?;
    for row in link_rows {
        let owner = row.diploma_name.clone();
        links.entry(owner).or_default().push(link_ref(row)?);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let edges = links.remove(&row.name).unwrap_or_default();
            let diploma = Diploma::from_links(row.name.clone(), row.city, row.school, row.duration, edges);
            (row.name, diploma)
        })
        .collect())
}

/// Insert or update a diploma node, then reconcile its reference edges.
///
/// Target entities must already exist. Existing edges not in `diploma`
/// are removed; an identical diploma writes nothing.
pub async fn write_diploma<C: ConnectionTrait>(conn: &C, diploma: &Diploma) -> Result<DiplomaWrite> {
    let mut outcome = DiplomaWrite::default();

    match find_diploma_row(conn, &diploma.name).await? {
        Some(row) => {
            if row.city != diploma.city || row.school != diploma.school || row.duration != diploma.duration {
                let mut active: DiplomaActiveModel = row.into();
                active.city = Set(diploma.city.clone());
                active.school = Set(diploma.school.clone());
                active.duration = Set(diploma.duration);
                active.update(conn).await?;
                outcome.updated = true;
            }
        }
        None => {
            insert_diploma_row(conn, diploma).await?;
            outcome.created = true;
        }
    }

    let (added, removed) = replace_links(conn, &diploma.name, &diploma.links()).await?;
    outcome.links_added = added;
    outcome.links_removed = removed;

    Ok(outcome)
}

/// Plain insert of the diploma node; a duplicate key surfaces as a unique violation.
pub async fn insert_diploma_row<C: ConnectionTrait>(conn: &C, diploma: &Diploma) -> Result<()> {
    let row = DiplomaActiveModel {
        name: Set(diploma.name.clone()),
        city: Set(diploma.city.clone()),
        school: Set(diploma.school.clone()),
        duration: Set(diploma.duration),
    };
    DiplomaEntity::insert(row)
        .exec_without_returning(conn)
        .await
        .map_err(|e| duplicate_or(e, || format!("diploma/{}", diploma.name)))?;
    Ok(())
}

/// Natural-key collisions become [`AppError::Duplicate`]; anything else stays a database error.
fn duplicate_or(err: DbErr, key: impl FnOnce() -> String) -> AppError {
    if is_unique_violation(&err) {
        AppError::Duplicate { message: key() }
    } else {
        AppError::Database(err)
    }
}

/// Make the diploma's edge set equal to `desired`. Returns (added, removed).
pub async fn replace_links<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    desired: &BTreeSet<EntityRef>,
) -> Result<(usize, usize)> {
    let current = diploma_links(conn, name).await?;

    let stale: Vec<&EntityRef> = current.difference(desired).collect();
    for link in &stale {
        DiplomaLinkEntity::delete_many()
            .filter(DiplomaLinkColumn::DiplomaName.eq(name))
            .filter(DiplomaLinkColumn::Kind.eq(link.kind.as_str()))
            .filter(DiplomaLinkColumn::Target.eq(link.name.as_str()))
            .exec(conn)
            .await?;
    }

    let missing: Vec<DiplomaLinkActiveModel> = desired
        .difference(&current)
        .map(|link| DiplomaLinkActiveModel {
            diploma_name: Set(name.to_string()),
            kind: Set(link.kind.as_str().to_string()),
            target: Set(link.name.clone()),
        })
        .collect();
    let added = missing.len();
    if added > 0 {
        DiplomaLinkEntity::insert_many(missing)
            .exec_without_returning(conn)
            .await?;
    }

    Ok((added, stale.len()))
}

/// Remove a diploma node with its reference edges. Returns false if absent.
pub async fn delete_diploma<C: ConnectionTrait>(conn: &C, name: &str) -> Result<bool> {
    DiplomaLinkEntity::delete_many()
        .filter(DiplomaLinkColumn::DiplomaName.eq(name))
        .exec(conn)
        .await?;

    let result = DiplomaEntity::delete_by_id(name).exec(conn).await?;
    Ok(result.rows_affected > 0)
}

/// Whether anything other than `email`'s recommendation still points at the diploma:
/// feedback from any user, or a recommendation of another user.
pub async fn diploma_is_referenced<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    email: &str,
) -> Result<bool> {
    let feedback = FeedbackEntity::find()
        .filter(FeedbackColumn::DiplomaName.eq(name))
        .count(conn)
        .await?;
    if feedback > 0 {
        return Ok(true);
    }

    let others = RecommendationEntity::find()
        .filter(
            Condition::all()
                .add(RecommendationColumn::DiplomaName.eq(name))
                .add(RecommendationColumn::UserEmail.ne(email)),
        )
        .count(conn)
        .await?;
    Ok(others > 0)
}

// ============================================================================
// Recommendations
// ============================================================================

/// Recommendation edges of a user, best ranked first
pub async fn recommendations_of<C: ConnectionTrait>(
    conn: &C,
    email: &str,
) -> Result<Vec<Recommendation>> {
    RecommendationEntity::find()
        .filter(RecommendationColumn::UserEmail.eq(email))
        .order_by_asc(RecommendationColumn::Rank)
        .order_by_asc(RecommendationColumn::DiplomaName)
        .all(conn)
        .await
        .map_err(Into::into)
}

pub async fn find_recommendation<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    diploma: &str,
) -> Result<Option<Recommendation>> {
    RecommendationEntity::find_by_id((email.to_string(), diploma.to_string()))
        .one(conn)
        .await
        .map_err(Into::into)
}

pub async fn insert_recommendation<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    diploma: &str,
    score: MatchScore,
    rank: u32,
) -> Result<()> {
    let row = RecommendationActiveModel {
        user_email: Set(email.to_string()),
        diploma_name: Set(diploma.to_string()),
        score: Set(score.basis_points()),
        rank: Set(rank_column(rank)),
    };
    RecommendationEntity::insert(row)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Rewrite score and rank in place. Returns false when both already match.
pub async fn rescore_recommendation<C: ConnectionTrait>(
    conn: &C,
    existing: Recommendation,
    score: MatchScore,
    rank: u32,
) -> Result<bool> {
    let rank = rank_column(rank);
    if existing.score == score.basis_points() && existing.rank == rank {
        return Ok(false);
    }

    let mut active: RecommendationActiveModel = existing.into();
    active.score = Set(score.basis_points());
    active.rank = Set(rank);
    active.update(conn).await?;
    Ok(true)
}

pub async fn delete_recommendation<C: ConnectionTrait>(
    conn: &C,
    email: &str,
    diploma: &str,
) -> Result<bool> {
    let result = RecommendationEntity::delete_by_id((email.to_string(), diploma.to_string()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Stored recommendations of a user with their diplomas, best ranked first
pub async fn recommendation_views<C: ConnectionTrait>(
    conn: &C,
    email: &str,
) -> Result<Vec<RecommendationView>> {
    let edges = recommendations_of(conn, email).await?;
    let names: Vec<String> = edges.iter().map(|e| e.diploma_name.clone()).collect();
    let mut diplomas = load_diplomas(conn, &names).await?;

    edges
        .into_iter()
        .map(|edge| {
            let diploma = diplomas
                .remove(&edge.diploma_name)
                .ok_or_else(|| AppError::Internal {
                    message: format!("recommendation points at missing diploma {}", edge.diploma_name),
                })?;
            Ok(RecommendationView {
                diploma,
                score: MatchScore::from_basis_points(edge.score)?,
                rank: u32::try_from(edge.rank).unwrap_or(u32::MAX),
            })
        })
        .collect()
}

// ============================================================================
// Helpers
// ============================================================================

fn link_ref(row: DiplomaLink) -> Result<EntityRef> {
    Ok(EntityRef::new(row.kind.parse()?, row.target))
}

fn rank_column(rank: u32) -> i32 {
    i32::try_from(rank).unwrap_or(i32::MAX)
}

/// String entries of a JSON array column; anything else reads as empty.
pub fn json_strings(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
