//! SeaORM entity models
//!
//! Nodes and edges of the recommendation graph

pub mod user;
pub mod diploma;
pub mod reference_entity;
pub mod diploma_link;
pub mod recommendation;
pub mod feedback;

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use diploma::{
    Entity as DiplomaEntity,
    Model as DiplomaRow,
    ActiveModel as DiplomaActiveModel,
    Column as DiplomaColumn,
};

pub use reference_entity::{
    Entity as ReferenceEntity,
    Model as ReferenceRow,
    ActiveModel as ReferenceActiveModel,
    Column as ReferenceColumn,
};

pub use diploma_link::{
    Entity as DiplomaLinkEntity,
    Model as DiplomaLink,
    ActiveModel as DiplomaLinkActiveModel,
    Column as DiplomaLinkColumn,
};

pub use recommendation::{
    Entity as RecommendationEntity,
    Model as Recommendation,
    ActiveModel as RecommendationActiveModel,
    Column as RecommendationColumn,
};

pub use feedback::{
    Entity as FeedbackEntity,
    Model as Feedback,
    ActiveModel as FeedbackActiveModel,
    Column as FeedbackColumn,
};
