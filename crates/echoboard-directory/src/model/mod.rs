//! Directory entity models and the derived project view.
mod config;
mod project;
mod slug;
mod token;

pub use config::{
    Category, Expressing, Expression, IdeaStatus, ProjectConfig, Support, TagGroup, Tagging,
    VersionedConfig, Voting, Workflow,
};
pub use project::{Project, ProjectRecord, ResourceType, VoteValue, WebhookListener};
pub use slug::SlugRecord;
pub use token::Token;
