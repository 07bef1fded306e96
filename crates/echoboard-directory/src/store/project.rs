//! Project directory over the conditional-write backend.
//!
//! # Purpose
//! Implements [`ProjectStore`]: project CRUD, the slug migration protocol,
//! webhook-listener set updates, and the cascading delete. All cross-entity
//! consistency rides on backend preconditions and transactions; no lock is
//! held across two backend round-trips.
//!
//! # Slug migration
//! A rename claims the new slug, commits the project record, then releases
//! the old slug into a timed grace window, in that order: the new name is
//! never live before the authoritative project write, and the old name
//! keeps resolving until the new one is durable. Failures unwind claims
//! with delete-if-still-owned so a legitimate concurrent claim is never
//! destroyed.
use crate::cache::DirectoryCaches;
use crate::codec;
use crate::config::DirectoryConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{Project, ProjectRecord, SlugRecord, VersionedConfig, WebhookListener};
use crate::{epoch_now, schema};
use async_trait::async_trait;
use echoboard_kv::{
    AttrValue, BackendError, Item, Key, KeyValueBackend, MAX_BATCH_WRITE, Precondition, TransactOp,
    UpdateAction, WriteOp,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use super::ProjectStore;

const QUERY_PAGE_SIZE: usize = 100;

pub struct KvProjectStore {
    backend: Arc<dyn KeyValueBackend>,
    caches: Arc<DirectoryCaches>,
    config: DirectoryConfig,
}

/// One changed slug kind within a config update; either side may be absent
/// (a custom domain can be added or removed).
struct SlugRename {
    from: Option<String>,
    to: Option<String>,
}

impl KvProjectStore {
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        caches: Arc<DirectoryCaches>,
        config: DirectoryConfig,
    ) -> Self {
        Self {
            backend,
            caches,
            config,
        }
    }

    /// Cache-first project load shared by the public read paths.
    async fn load_project(
        &self,
        project_id: &str,
        use_cache: bool,
    ) -> StoreResult<Option<Arc<Project>>> {
        if self.config.project_cache_read
            && use_cache
            && let Some(project) = self.caches.project(project_id)
        {
            return Ok(Some(project));
        }
        let item = self
            .backend
            .get(
                codec::PROJECT_TABLE,
                &ProjectRecord::key(project_id),
                !use_cache,
            )
            .await
            .map_err(StoreError::backend)?;
        let Some(item) = item else {
            // Absence is not cached; see the cache module notes.
            return Ok(None);
        };
        let record = self.decode_with_upgrade(item).await?;
        let project = Arc::new(Project::from_record(record)?);
        self.caches.put_project(project.clone());
        Ok(Some(project))
    }

    /// Decodes a stored project, lazily upgrading an out-of-date config
    /// schema. The write-back is conditioned on the version being unchanged;
    /// losing that race just defers the upgrade to a later read.
    async fn decode_with_upgrade(&self, item: Item) -> StoreResult<ProjectRecord> {
        let mut record = codec::decode_project(item)?;
        let Some(upgraded_json) = schema::upgrade(&record.config_json)? else {
            return Ok(record);
        };
        record.config_json = upgraded_json;
        record.schema_version = schema::CURRENT_CONFIG_SCHEMA_VERSION;
        let write_back = self
            .backend
            .put(
                codec::PROJECT_TABLE,
                codec::encode_project(&record),
                Precondition::AttrEquals {
                    attr: codec::ATTR_VERSION,
                    value: AttrValue::S(record.version.clone()),
                },
            )
            .await;
        match write_back {
            Ok(()) => {}
            Err(err) if err.is_precondition_failure() => {
                tracing::warn!(
                    project_id = %record.project_id,
                    "config schema upgrade lost a write race; deferring to a later read"
                );
            }
            Err(err) => return Err(StoreError::backend(err)),
        }
        self.caches.invalidate_project(&record.project_id);
        Ok(record)
    }

    /// Best-effort rollback of slug claims made earlier in a failed update.
    /// Delete-if-still-owned keeps a concurrent legitimate claim intact; a
    /// failure here only leaves an orphaned soft claim and is logged.
    async fn unwind_claims(&self, project_id: &str, claimed: &[String]) {
        for slug in claimed {
            let result = self
                .backend
                .delete(
                    codec::SLUG_TABLE,
                    &SlugRecord::key(slug),
                    Precondition::AttrEquals {
                        attr: codec::ATTR_PROJECT_ID,
                        value: AttrValue::S(project_id.to_string()),
                    },
                )
                .await;
            match result {
                Ok(_) => {}
                Err(err) if err.is_precondition_failure() => {
                    tracing::warn!(
                        slug = slug.as_str(),
                        project_id,
                        "slug claim already released or re-owned"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        slug = slug.as_str(),
                        project_id,
                        error = %err,
                        "failed to roll back slug claim"
                    );
                }
            }
            self.caches.invalidate_slug(slug);
        }
    }

    async fn update_webhook_listener(
        &self,
        project_id: &str,
        listener: &WebhookListener,
        add: bool,
    ) -> StoreResult<()> {
        let packed = listener.pack();
        let action = if add {
            UpdateAction::AddToSet {
                attr: codec::ATTR_WEBHOOK_LISTENERS,
                member: packed,
            }
        } else {
            UpdateAction::RemoveFromSet {
                attr: codec::ATTR_WEBHOOK_LISTENERS,
                member: packed,
            }
        };
        let result = self
            .backend
            .update(
                codec::PROJECT_TABLE,
                &ProjectRecord::key(project_id),
                vec![action],
                Precondition::Exists,
            )
            .await;
        match result {
            Ok(()) => {}
            Err(BackendError::PreconditionFailed) => {
                // Benign: the project is gone; there is nothing to update.
                tracing::warn!(project_id, "webhook listener update on missing project");
            }
            Err(err) => return Err(StoreError::backend(err)),
        }
        self.caches.invalidate_project(project_id);
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for KvProjectStore {
    async fn project_by_slug(
        &self,
        slug: &str,
        use_cache: bool,
    ) -> StoreResult<Option<Arc<Project>>> {
        if self.config.slug_cache_read
            && use_cache
            && let Some(project_id) = self.caches.slug(slug)
        {
            return self.load_project(&project_id, use_cache).await;
        }
        let item = self
            .backend
            .get(codec::SLUG_TABLE, &SlugRecord::key(slug), !use_cache)
            .await
            .map_err(StoreError::backend)?;
        let Some(item) = item else {
            return Ok(None);
        };
        let record = codec::decode_slug(item)?;
        self.caches.put_slug(slug, &record.project_id);
        self.load_project(&record.project_id, use_cache).await
    }

    async fn project(
        &self,
        project_id: &str,
        use_cache: bool,
    ) -> StoreResult<Option<Arc<Project>>> {
        self.load_project(project_id, use_cache).await
    }

    async fn projects(
        &self,
        project_ids: &[String],
        use_cache: bool,
    ) -> StoreResult<Vec<Arc<Project>>> {
        let mut seen = BTreeSet::new();
        let mut keys: Vec<Key> = project_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| ProjectRecord::key(id))
            .collect();
        let mut projects = Vec::new();
        while !keys.is_empty() {
            let batch = self
                .backend
                .batch_get(codec::PROJECT_TABLE, keys, !use_cache)
                .await
                .map_err(StoreError::backend)?;
            for item in batch.items {
                let record = self.decode_with_upgrade(item).await?;
                let project = Arc::new(Project::from_record(record)?);
                self.caches.put_project(project.clone());
                projects.push(project);
            }
            // Retry the unprocessed subset until the backend drains it;
            // backoff, if any, is the backend adapter's concern.
            keys = batch.unprocessed;
        }
        Ok(projects)
    }

    async fn create_project(
        &self,
        account_id: &str,
        project_id: &str,
        config: VersionedConfig,
    ) -> StoreResult<Arc<Project>> {
        let subdomain = config.config.slug.clone();
        validate_subdomain(&subdomain)?;
        let domain = config
            .config
            .domain
            .clone()
            .filter(|domain| !domain.is_empty());
        if let Some(domain) = &domain {
            validate_domain(domain)?;
        }
        let record = ProjectRecord {
            account_id: account_id.to_string(),
            project_id: project_id.to_string(),
            version: config.version.clone(),
            schema_version: config.config.schema_version,
            webhook_listeners: BTreeSet::new(),
            config_json: encode_config(&config)?,
        };

        // Slug(s) and project commit together or not at all.
        let mut ops = vec![
            TransactOp::Put {
                table: codec::SLUG_TABLE,
                item: codec::encode_slug(&SlugRecord::primary(subdomain.clone(), project_id)),
                precondition: Precondition::Absent,
            },
            TransactOp::Put {
                table: codec::PROJECT_TABLE,
                item: codec::encode_project(&record),
                precondition: Precondition::Absent,
            },
        ];
        if let Some(domain) = &domain {
            ops.push(TransactOp::Put {
                table: codec::SLUG_TABLE,
                item: codec::encode_slug(&SlugRecord::primary(domain.clone(), project_id)),
                precondition: Precondition::Absent,
            });
        }
        match self.backend.transact_write(ops).await {
            Ok(()) => {}
            Err(err) if err.is_precondition_failure() => {
                return Err(StoreError::Conflict(
                    "project name already taken, please choose another".into(),
                ));
            }
            Err(err) => return Err(StoreError::backend(err)),
        }
        metrics::counter!("echoboard_projects_created_total").increment(1);

        let project = Arc::new(Project::from_record(record)?);
        self.caches.put_project(project.clone());
        self.caches.put_slug(&subdomain, project_id);
        if let Some(domain) = &domain {
            self.caches.put_slug(domain, project_id);
        }
        Ok(project)
    }

    async fn update_config(
        &self,
        project_id: &str,
        previous_version: Option<&str>,
        update: VersionedConfig,
    ) -> StoreResult<()> {
        let current = self
            .load_project(project_id, false)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;

        let mut renames = Vec::new();
        let domain_previous = current.hostname_from_domain().map(str::to_string);
        let domain_next = update
            .config
            .domain
            .clone()
            .filter(|domain| !domain.is_empty());
        if domain_next != domain_previous {
            if let Some(domain) = &domain_next {
                validate_domain(domain)?;
            }
            renames.push(SlugRename {
                from: domain_previous,
                to: domain_next,
            });
        }
        let subdomain_previous = current.config().slug.clone();
        let subdomain_next = update.config.slug.clone();
        if subdomain_next != subdomain_previous {
            validate_subdomain(&subdomain_next)?;
            renames.push(SlugRename {
                from: Some(subdomain_previous),
                to: Some(subdomain_next),
            });
        }

        // Step 1: claim every new slug. The owned-by-us disjunct lets a
        // caller change their mind and reclaim a slug mid-migration.
        let mut claimed: Vec<String> = Vec::new();
        for rename in &renames {
            let Some(to) = &rename.to else {
                continue;
            };
            tracing::info!(
                project_id,
                from = rename.from.as_deref().unwrap_or(""),
                to = to.as_str(),
                "changing project slug"
            );
            let claim = self
                .backend
                .put(
                    codec::SLUG_TABLE,
                    codec::encode_slug(&SlugRecord::primary(to.clone(), project_id)),
                    Precondition::AbsentOrAttrEquals {
                        attr: codec::ATTR_PROJECT_ID,
                        value: AttrValue::S(project_id.to_string()),
                    },
                )
                .await;
            match claim {
                Ok(()) => {
                    self.caches.invalidate_slug(to);
                    claimed.push(to.clone());
                }
                Err(BackendError::PreconditionFailed) => {
                    self.unwind_claims(project_id, &claimed).await;
                    return Err(StoreError::Conflict(
                        "slug is already taken, please choose another".into(),
                    ));
                }
                Err(err) => return Err(StoreError::backend(err)),
            }
        }

        // Step 2: the authoritative project write, gated on the optimistic
        // concurrency token when the caller supplied one.
        let actions = vec![
            UpdateAction::Set {
                attr: codec::ATTR_CONFIG_JSON,
                value: AttrValue::S(encode_config(&update)?),
            },
            UpdateAction::Set {
                attr: codec::ATTR_VERSION,
                value: AttrValue::S(update.version.clone()),
            },
            UpdateAction::Set {
                attr: codec::ATTR_SCHEMA_VERSION,
                value: AttrValue::N(update.config.schema_version),
            },
        ];
        let precondition = match previous_version {
            Some(version) => Precondition::AttrEquals {
                attr: codec::ATTR_VERSION,
                value: AttrValue::S(version.to_string()),
            },
            None => Precondition::None,
        };
        let write = self
            .backend
            .update(
                codec::PROJECT_TABLE,
                &ProjectRecord::key(project_id),
                actions,
                precondition,
            )
            .await;
        match write {
            Ok(()) => {}
            Err(BackendError::PreconditionFailed) => {
                self.unwind_claims(project_id, &claimed).await;
                return Err(StoreError::Conflict(
                    "project was modified by someone else while you were editing".into(),
                ));
            }
            Err(err) => return Err(StoreError::backend(err)),
        }

        // Step 3: release each old slug into its grace window so clients
        // that have not picked up the new name yet keep resolving.
        let expires_at = epoch_now() + self.config.slug_expire_after_migration.as_secs() as i64;
        for rename in &renames {
            let Some(from) = &rename.from else {
                continue;
            };
            let release = self
                .backend
                .put(
                    codec::SLUG_TABLE,
                    codec::encode_slug(&SlugRecord {
                        slug: from.clone(),
                        project_id: project_id.to_string(),
                        expires_at_epoch_sec: Some(expires_at),
                    }),
                    Precondition::AttrEquals {
                        attr: codec::ATTR_PROJECT_ID,
                        value: AttrValue::S(project_id.to_string()),
                    },
                )
                .await;
            match release {
                Ok(()) => self.caches.invalidate_slug(from),
                Err(BackendError::PreconditionFailed) => {
                    // Benign: someone already reclaimed or deleted it.
                    tracing::warn!(
                        project_id,
                        slug = from.as_str(),
                        "previous slug no longer owned by this project; skipping grace release"
                    );
                }
                Err(err) => return Err(StoreError::backend(err)),
            }
        }
        if !renames.is_empty() {
            metrics::counter!("echoboard_slug_migrations_total").increment(renames.len() as u64);
        }

        self.caches.invalidate_project(project_id);
        Ok(())
    }

    async fn add_webhook_listener(
        &self,
        project_id: &str,
        listener: &WebhookListener,
    ) -> StoreResult<()> {
        self.update_webhook_listener(project_id, listener, true)
            .await
    }

    async fn remove_webhook_listener(
        &self,
        project_id: &str,
        listener: &WebhookListener,
    ) -> StoreResult<()> {
        self.update_webhook_listener(project_id, listener, false)
            .await
    }

    async fn delete_project(&self, project_id: &str) -> StoreResult<()> {
        self.backend
            .delete(
                codec::PROJECT_TABLE,
                &ProjectRecord::key(project_id),
                Precondition::None,
            )
            .await
            .map_err(StoreError::backend)?;
        self.caches.invalidate_project(project_id);

        // Enumerate every slug owned by the project, primary and grace,
        // through the reverse index.
        let mut slugs: Vec<String> = Vec::new();
        let mut start_after = None;
        loop {
            let page = self
                .backend
                .query_index(
                    codec::SLUG_TABLE,
                    codec::SLUG_BY_PROJECT_INDEX,
                    &AttrValue::S(project_id.to_string()),
                    "",
                    start_after,
                    QUERY_PAGE_SIZE,
                )
                .await
                .map_err(StoreError::backend)?;
            for item in page.items {
                let record = codec::decode_slug(item)?;
                if record.project_id == project_id {
                    slugs.push(record.slug);
                }
            }
            match page.next {
                Some(next) => start_after = Some(next),
                None => break,
            }
        }

        for chunk in slugs.chunks(MAX_BATCH_WRITE) {
            for slug in chunk {
                self.caches.invalidate_slug(slug);
            }
            let mut deletes: Vec<WriteOp> = chunk
                .iter()
                .map(|slug| WriteOp::Delete(SlugRecord::key(slug)))
                .collect();
            while !deletes.is_empty() {
                deletes = self
                    .backend
                    .batch_write(codec::SLUG_TABLE, deletes)
                    .await
                    .map_err(StoreError::backend)?;
            }
        }
        metrics::counter!("echoboard_projects_deleted_total").increment(1);
        tracing::info!(project_id, slugs_deleted = slugs.len(), "deleted project");
        Ok(())
    }
}

fn encode_config(config: &VersionedConfig) -> StoreResult<String> {
    serde_json::to_string(&config.config)
        .map_err(|err| StoreError::Unexpected(anyhow::anyhow!("config does not serialize: {err}")))
}

static SUBDOMAIN_PATTERN: OnceLock<Regex> = OnceLock::new();
static DOMAIN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn validate_subdomain(slug: &str) -> StoreResult<()> {
    let pattern = SUBDOMAIN_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("subdomain pattern")
    });
    if pattern.is_match(slug) {
        Ok(())
    } else {
        Err(StoreError::ValidationFailed(format!(
            "invalid subdomain: {slug}"
        )))
    }
}

fn validate_domain(domain: &str) -> StoreResult<()> {
    let pattern = DOMAIN_PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$").expect("domain pattern")
    });
    if pattern.is_match(domain) {
        Ok(())
    } else {
        Err(StoreError::ValidationFailed(format!(
            "invalid domain: {domain}"
        )))
    }
}
