//! Project record and the derived, read-only project view.
//!
//! # Purpose
//! `ProjectRecord` is the stored shape; `Project` is the value handed to
//! callers: the decoded configuration plus lookup maps (category, status,
//! expression weight, webhook listeners) computed once at load time and
//! never mutated afterwards.
use crate::error::{StoreError, StoreResult};
use crate::model::config::{Category, IdeaStatus, ProjectConfig};
use echoboard_kv::Key;
use std::collections::{BTreeSet, HashMap};

/// Stored project row; `project_id` is caller-generated and immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub account_id: String,
    pub project_id: String,
    /// Opaque concurrency token, compared by equality only.
    pub version: String,
    pub schema_version: i64,
    /// Packed webhook-listener descriptors.
    pub webhook_listeners: BTreeSet<String>,
    pub config_json: String,
}

impl ProjectRecord {
    pub fn key(project_id: &str) -> Key {
        Key::hash(project_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteValue {
    Upvote,
    Downvote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    Post,
    Comment,
    User,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Post => "POST",
            ResourceType::Comment => "COMMENT",
            ResourceType::User => "USER",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "POST" => Some(ResourceType::Post),
            "COMMENT" => Some(ResourceType::Comment),
            "USER" => Some(ResourceType::User),
            _ => None,
        }
    }
}

// Packed listener fields are joined on a control character that cannot
// appear in an event name or URL.
const LISTENER_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WebhookListener {
    pub resource_type: ResourceType,
    pub event_type: String,
    pub url: String,
}

impl WebhookListener {
    pub fn pack(&self) -> String {
        let mut packed = String::new();
        packed.push_str(self.resource_type.as_str());
        packed.push(LISTENER_SEPARATOR);
        packed.push_str(&self.event_type);
        packed.push(LISTENER_SEPARATOR);
        packed.push_str(&self.url);
        packed
    }

    pub fn unpack(packed: &str) -> Option<Self> {
        let mut parts = packed.split(LISTENER_SEPARATOR);
        let resource_type = ResourceType::from_name(parts.next()?)?;
        let event_type = parts.next()?.to_string();
        let url = parts.next()?.to_string();
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            resource_type,
            event_type,
            url,
        })
    }
}

const EXPRESSION_WEIGHT_DEFAULT: f64 = 1.0;

/// Loaded project: stored record, decoded config, and derived lookup maps.
pub struct Project {
    record: ProjectRecord,
    config: ProjectConfig,
    categories: HashMap<String, Category>,
    statuses: HashMap<(String, String), IdeaStatus>,
    expression_weights: HashMap<String, HashMap<String, f64>>,
    listeners_by_event: HashMap<(ResourceType, String), BTreeSet<WebhookListener>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("account_id", &self.record.account_id)
            .field("project_id", &self.record.project_id)
            .field("version", &self.record.version)
            .finish()
    }
}

impl Project {
    /// Decodes the config blob and computes the lookup maps. A blob that
    /// does not decode is an integrity failure of the stored record.
    pub fn from_record(record: ProjectRecord) -> StoreResult<Self> {
        let config: ProjectConfig = serde_json::from_str(&record.config_json).map_err(|err| {
            StoreError::Integrity(format!(
                "project {} config does not decode: {err}",
                record.project_id
            ))
        })?;

        let mut categories = HashMap::new();
        let mut statuses = HashMap::new();
        let mut expression_weights = HashMap::new();
        for category in &config.categories {
            categories.insert(category.category_id.clone(), category.clone());
            for status in &category.workflow.statuses {
                statuses.insert(
                    (category.category_id.clone(), status.status_id.clone()),
                    status.clone(),
                );
            }
            if let Some(express) = &category.support.express
                && let Some(emoji_set) = &express.limit_emoji_set
            {
                expression_weights.insert(
                    category.category_id.clone(),
                    emoji_set
                        .iter()
                        .map(|expression| (expression.display.clone(), expression.weight))
                        .collect(),
                );
            }
        }

        let mut listeners_by_event: HashMap<(ResourceType, String), BTreeSet<WebhookListener>> =
            HashMap::new();
        for packed in &record.webhook_listeners {
            match WebhookListener::unpack(packed) {
                Some(listener) => {
                    listeners_by_event
                        .entry((listener.resource_type, listener.event_type.clone()))
                        .or_default()
                        .insert(listener);
                }
                None => {
                    tracing::warn!(
                        project_id = %record.project_id,
                        "dropping malformed webhook listener descriptor"
                    );
                }
            }
        }

        Ok(Self {
            record,
            config,
            categories,
            statuses,
            expression_weights,
            listeners_by_event,
        })
    }

    pub fn record(&self) -> &ProjectRecord {
        &self.record
    }

    pub fn project_id(&self) -> &str {
        &self.record.project_id
    }

    pub fn account_id(&self) -> &str {
        &self.record.account_id
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.get(category_id)
    }

    pub fn status(&self, category_id: &str, status_id: &str) -> Option<&IdeaStatus> {
        self.statuses
            .get(&(category_id.to_string(), status_id.to_string()))
    }

    /// Weight of an expression within a category; unknown expressions and
    /// categories without a whitelist weigh 1.
    pub fn expression_weight(&self, category_id: &str, display: &str) -> f64 {
        self.expression_weights
            .get(category_id)
            .and_then(|weights| weights.get(display))
            .copied()
            .unwrap_or(EXPRESSION_WEIGHT_DEFAULT)
    }

    pub fn voting_allowed(
        &self,
        vote: VoteValue,
        category_id: &str,
        status_id: Option<&str>,
    ) -> StoreResult<bool> {
        let category = self.require_category(category_id)?;
        let Some(voting) = &category.support.vote else {
            return Ok(false);
        };
        if vote == VoteValue::Downvote && !voting.enable_downvotes {
            return Ok(false);
        }
        if let Some(status_id) = status_id {
            let status = self.require_status(category_id, status_id)?;
            if status.disable_voting {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn expressing_allowed(
        &self,
        category_id: &str,
        status_id: Option<&str>,
    ) -> StoreResult<bool> {
        let category = self.require_category(category_id)?;
        if category.support.express.is_none() {
            return Ok(false);
        }
        if let Some(status_id) = status_id {
            let status = self.require_status(category_id, status_id)?;
            if status.disable_expressions {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn funding_allowed(&self, category_id: &str, status_id: Option<&str>) -> StoreResult<bool> {
        let category = self.require_category(category_id)?;
        if !category.support.fund {
            return Ok(false);
        }
        if let Some(status_id) = status_id {
            let status = self.require_status(category_id, status_id)?;
            if status.disable_funding {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Validates user-supplied tags against the category's tag groups.
    pub fn tags_allowed(&self, tag_ids: &[String], category_id: &str) -> StoreResult<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }
        let category = self.category(category_id).ok_or_else(|| {
            StoreError::ValidationFailed(format!("cannot find category {category_id}"))
        })?;
        for group in &category.tagging.tag_groups {
            let in_group = tag_ids
                .iter()
                .filter(|tag_id| group.tag_ids.contains(tag_id))
                .count();
            if in_group > 0 && !group.user_settable {
                return Err(StoreError::ValidationFailed(format!(
                    "tags for {} are not allowed",
                    group.name
                )));
            }
            if let Some(max) = group.max_required
                && in_group > max
            {
                return Err(StoreError::ValidationFailed(format!(
                    "maximum tags for {} is {max}",
                    group.name
                )));
            }
            if let Some(min) = group.min_required
                && in_group < min
            {
                return Err(StoreError::ValidationFailed(format!(
                    "minimum tags for {} is {min}",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Listeners registered for the (resource type, event) pair.
    pub fn webhook_listeners(
        &self,
        resource_type: ResourceType,
        event_type: &str,
    ) -> BTreeSet<WebhookListener> {
        self.listeners_by_event
            .get(&(resource_type, event_type.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn hostname_from_subdomain(&self, base_domain: &str) -> String {
        format!("{}.{base_domain}", self.config.slug)
    }

    pub fn hostname_from_domain(&self) -> Option<&str> {
        self.config.domain.as_deref().filter(|domain| !domain.is_empty())
    }

    /// Custom domain when set, subdomain under the base domain otherwise.
    pub fn hostname(&self, base_domain: &str) -> String {
        match self.hostname_from_domain() {
            Some(domain) => domain.to_string(),
            None => self.hostname_from_subdomain(base_domain),
        }
    }

    fn require_category(&self, category_id: &str) -> StoreResult<&Category> {
        self.category(category_id)
            .ok_or_else(|| StoreError::NotFound(format!("category {category_id}")))
    }

    fn require_status(&self, category_id: &str, status_id: &str) -> StoreResult<&IdeaStatus> {
        self.status(category_id, status_id)
            .ok_or_else(|| StoreError::NotFound(format!("status {category_id}:{status_id}")))
    }
}
