//! Bounded, TTL-based read-through caches for slug and project resolution.
//!
//! # Purpose
//! Two independent write-expiry caches: `slug → projectId` (long TTL, slugs
//! change rarely) and `projectId → Project` (short TTL, configs change
//! often). The caches hold pure derived state — dropping an entry at any
//! time costs one backend read, never correctness. They are constructed
//! explicitly and injected; nothing here is process-global.
//!
//! Only positive lookups are inserted. Absence is never cached, so a
//! deleted-then-recreated project id cannot serve a stale miss.
use crate::config::DirectoryConfig;
use crate::model::Project;
use moka::sync::Cache;
use std::sync::Arc;

const SLUG_CACHE_CAPACITY: u64 = 100_000;
const PROJECT_CACHE_CAPACITY: u64 = 10_000;

pub struct DirectoryCaches {
    slugs: Cache<String, String>,
    projects: Cache<String, Arc<Project>>,
}

impl DirectoryCaches {
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            slugs: Cache::builder()
                .max_capacity(SLUG_CACHE_CAPACITY)
                .time_to_live(config.slug_cache_ttl)
                .build(),
            projects: Cache::builder()
                .max_capacity(PROJECT_CACHE_CAPACITY)
                .time_to_live(config.project_cache_ttl)
                .build(),
        }
    }

    pub fn slug(&self, slug: &str) -> Option<String> {
        self.slugs.get(slug)
    }

    pub fn put_slug(&self, slug: &str, project_id: &str) {
        self.slugs.insert(slug.to_string(), project_id.to_string());
    }

    pub fn invalidate_slug(&self, slug: &str) {
        self.slugs.invalidate(slug);
    }

    pub fn project(&self, project_id: &str) -> Option<Arc<Project>> {
        self.projects.get(project_id)
    }

    pub fn put_project(&self, project: Arc<Project>) {
        self.projects
            .insert(project.project_id().to_string(), project);
    }

    pub fn invalidate_project(&self, project_id: &str) {
        self.projects.invalidate(project_id);
    }
}
