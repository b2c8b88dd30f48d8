//! Fixed-point match score

use crate::config::ScoreScale;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Predictor confidence as a percentage with two decimals, stored in basis
/// points (`9250` is 92.50%). Always within `0..=10_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct MatchScore(u16);

impl MatchScore {
    pub const ZERO: MatchScore = MatchScore(0);
    pub const MAX: MatchScore = MatchScore(10_000);

    pub fn from_basis_points(points: i32) -> Result<Self> {
        if !(0..=Self::MAX.0 as i32).contains(&points) {
            return Err(AppError::validation(
                "match_score",
                format!("{} basis points is outside 0..=10000", points),
            ));
        }
        Ok(Self(points as u16))
    }

    pub fn from_percent(percent: f64) -> Result<Self> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(AppError::validation(
                "match_percentage",
                format!("{} is not a percentage", percent),
            ));
        }
        Ok(Self((percent * 100.0).round() as u16))
    }

    /// Convert a raw predictor value according to the configured scale
    pub fn from_scaled(raw: f64, scale: ScoreScale) -> Result<Self> {
        match scale {
            ScoreScale::Percent => Self::from_percent(raw),
            ScoreScale::Fraction => {
                if !raw.is_finite() || !(0.0..=1.0).contains(&raw) {
                    return Err(AppError::validation(
                        "match_percentage",
                        format!("{} is not a fraction", raw),
                    ));
                }
                Self::from_percent(raw * 100.0)
            }
        }
    }

    pub fn basis_points(self) -> i32 {
        self.0 as i32
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl TryFrom<i32> for MatchScore {
    type Error = AppError;

    fn try_from(points: i32) -> Result<Self> {
        Self::from_basis_points(points)
    }
}

impl From<MatchScore> for i32 {
    fn from(score: MatchScore) -> i32 {
        score.basis_points()
    }
}

impl fmt::Display for MatchScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
