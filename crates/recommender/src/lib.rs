//! Diploma Recommender
//!
//! Keeps each user's stored diploma recommendations consistent with the
//! external predictor:
//! - Diploma upsert with reference resolution
//! - Per-user run serialization
//! - Transactional synchronization and batch runs

pub mod diploma;
pub mod locks;
pub mod sync;

pub use diploma::DiplomaUpserter;
pub use locks::UserLocks;
pub use sync::{BatchReport, SkippedItem, SyncReport, Synchronizer, UserFailure};
