//! Store traits exposed to the resource/business layer.
//!
//! # Purpose
//! The seam between REST resources and the directory core. Implementations
//! are stateless request-scoped logic over a shared backend and shared
//! caches; any number of operations may run concurrently across requests,
//! and every multi-step mutation re-validates its preconditions against
//! current backend state instead of trusting an earlier read.
use crate::error::StoreResult;
use crate::model::{Project, Token, VersionedConfig, WebhookListener};
use async_trait::async_trait;
use std::sync::Arc;

pub mod project;
pub mod token;

pub use project::KvProjectStore;
pub use token::KvTokenStore;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Resolves slug → project id → project, cache-first on both hops
    /// unless disabled. Empty when either hop misses.
    async fn project_by_slug(
        &self,
        slug: &str,
        use_cache: bool,
    ) -> StoreResult<Option<Arc<Project>>>;

    /// Loads one project, applying a lazy config-schema upgrade on backend
    /// hits. `use_cache = false` forces a strongly-consistent read.
    async fn project(&self, project_id: &str, use_cache: bool)
    -> StoreResult<Option<Arc<Project>>>;

    /// Batch-loads projects, transparently retrying unprocessed keys until
    /// the backend has serviced every one. Genuinely absent ids are omitted.
    async fn projects(
        &self,
        project_ids: &[String],
        use_cache: bool,
    ) -> StoreResult<Vec<Arc<Project>>>;

    /// Creates the project and its slug(s) in one atomic transaction.
    /// Fails with `Conflict` when any slug is already taken.
    async fn create_project(
        &self,
        account_id: &str,
        project_id: &str,
        config: VersionedConfig,
    ) -> StoreResult<Arc<Project>>;

    /// Replaces the project configuration, running the slug migration
    /// protocol when the subdomain or custom domain changed. With
    /// `previous_version` supplied, the write is conditioned on the stored
    /// version still matching; a mismatch rolls back any slug claims and
    /// fails with `Conflict`.
    async fn update_config(
        &self,
        project_id: &str,
        previous_version: Option<&str>,
        update: VersionedConfig,
    ) -> StoreResult<()>;

    async fn add_webhook_listener(
        &self,
        project_id: &str,
        listener: &WebhookListener,
    ) -> StoreResult<()>;

    async fn remove_webhook_listener(
        &self,
        project_id: &str,
        listener: &WebhookListener,
    ) -> StoreResult<()>;

    /// Deletes the project record and every slug that resolves to it,
    /// primary and grace alike.
    async fn delete_project(&self, project_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Mints a single-use token bound to the joined target-id parts.
    async fn create_token(&self, target_id_parts: &[&str]) -> StoreResult<Token>;

    /// Consumes the token and reports whether it was valid. Any attempt
    /// deletes the record, so replay is impossible even for expired tokens.
    async fn use_token(&self, token: &str, target_id_parts: &[&str]) -> StoreResult<bool>;
}
