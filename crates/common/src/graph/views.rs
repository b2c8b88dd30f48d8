//! Caller-facing views

use super::{Diploma, MatchScore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Academic profile of a user, the predictor's input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Profile {
    #[validate(email)]
    pub email: String,

    #[serde(default)]
    pub subjects: Vec<String>,

    #[serde(default)]
    pub career_aspirations: Vec<String>,

    pub filiere: Option<String>,

    /// Preferred programme length in years
    #[validate(range(min = 0, max = 20))]
    pub duration: Option<i32>,

    /// Baccalauréat mention
    pub mention: Option<String>,
}

impl Profile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }
}

/// A stored recommendation with its diploma
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationView {
    pub diploma: Diploma,
    pub score: MatchScore,
    /// Position in the predictor's ranking, 0 first
    pub rank: u32,
}

/// A user's feedback on a diploma
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackView {
    pub diploma: Diploma,
    pub rating: f64,
    pub liked: bool,
    pub notes: Vec<String>,
    /// Live score of the matching recommendation, if the diploma is still recommended
    pub match_score: Option<MatchScore>,
    /// Score recorded when the feedback was last written
    pub cached_match_score: Option<MatchScore>,
    pub updated_at: DateTime<Utc>,
}
