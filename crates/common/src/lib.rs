//! Diploma Recommender Common Library
//!
//! Shared code for the synchronizer and the feedback store including:
//! - Graph model (diplomas, reference entities, match scores)
//! - Database models and repository patterns
//! - Reference entity registry
//! - Predictor client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod graph;
pub mod metrics;
pub mod predictor;
pub mod registry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use graph::{Diploma, DiplomaAttributes, FeedbackView, MatchScore, Profile, RecommendationView};
pub use predictor::Predictor;
pub use registry::EntityRegistry;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
