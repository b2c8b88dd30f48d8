//! Domain model of the recommendation graph
//!
//! Node kinds, natural keys and the views handed to callers. Persistence
//! lives in [`crate::db`]; these types carry no storage concerns.

mod diploma;
mod score;
mod views;

pub use diploma::{Diploma, DiplomaAttributes};
pub use score::MatchScore;
pub use views::{FeedbackView, Profile, RecommendationView};

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of reference entity a diploma can point at.
///
/// Each kind is also the label of the diploma edge leading to it, so a
/// diploma's reference edges are fully described by (kind, name) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Career,
    /// Subject taught in the diploma
    Subject,
    /// Subject the student is expected to have studied
    StudentSubject,
    Filiere,
    Mention,
    EmploymentOpportunity,
    City,
    School,
    PreviousDiploma,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Career,
        EntityKind::Subject,
        EntityKind::StudentSubject,
        EntityKind::Filiere,
        EntityKind::Mention,
        EntityKind::EmploymentOpportunity,
        EntityKind::City,
        EntityKind::School,
        EntityKind::PreviousDiploma,
    ];

    /// Stable storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Career => "career",
            EntityKind::Subject => "subject",
            EntityKind::StudentSubject => "student_subject",
            EntityKind::Filiere => "filiere",
            EntityKind::Mention => "mention",
            EntityKind::EmploymentOpportunity => "employment_opportunity",
            EntityKind::City => "city",
            EntityKind::School => "school",
            EntityKind::PreviousDiploma => "previous_diploma",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Internal {
                message: format!("unknown entity kind in storage: {}", s),
            })
    }
}

/// Handle on a persisted reference entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Trim a natural key, rejecting blank ones.
pub fn natural_key(kind: EntityKind, raw: &str) -> Result<String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(AppError::validation(kind.as_str(), "name must not be empty"));
    }
    Ok(key.to_string())
}

/// Natural key of a school node; schools are only unique within a city.
pub fn school_key(school: &str, city: Option<&str>) -> String {
    match city {
        Some(city) => format!("{}@{}", school, city),
        None => school.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("diploma".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_natural_key_trims_and_rejects_blank() {
        assert_eq!(natural_key(EntityKind::Career, "  Data Scientist ").unwrap(), "Data Scientist");
        let err = natural_key(EntityKind::Career, "   ").unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_school_key_is_scoped_by_city() {
        assert_eq!(school_key("ENSIAS", Some("Rabat")), "ENSIAS@Rabat");
        assert_eq!(school_key("ENSIAS", None), "ENSIAS");
    }
}
