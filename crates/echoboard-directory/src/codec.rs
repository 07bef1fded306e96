//! Entity codec: project, slug, and token records to/from backend items.
//!
//! # Purpose
//! The only place that knows how directory entities are laid out as
//! key-value items. Encoding never fails; decoding fails only on malformed
//! stored data, which is a fatal [`StoreError::Integrity`] — not something a
//! caller can correct.
use crate::error::{StoreError, StoreResult};
use crate::model::{ProjectRecord, SlugRecord, Token};
use echoboard_kv::{AttrValue, IndexSchema, Item, TableSchema};

pub const PROJECT_TABLE: &str = "project";
pub const SLUG_TABLE: &str = "slug";
pub const TOKEN_TABLE: &str = "token";
/// Reverse index: every slug (primary and grace) owned by a project.
pub const SLUG_BY_PROJECT_INDEX: &str = "slugByProjectId";

pub const ATTR_PROJECT_ID: &str = "projectId";
pub const ATTR_ACCOUNT_ID: &str = "accountId";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_SCHEMA_VERSION: &str = "schemaVersion";
pub const ATTR_CONFIG_JSON: &str = "configJson";
pub const ATTR_WEBHOOK_LISTENERS: &str = "webhookListeners";
pub const ATTR_SLUG: &str = "slug";
pub const ATTR_EXPIRES_AT: &str = "expiresAtEpochSec";
pub const ATTR_TARGET_ID: &str = "targetId";
pub const ATTR_TOKEN: &str = "token";
pub const ATTR_TTL: &str = "ttlEpochSec";

/// Table layout the directory expects from its backend.
pub static TABLE_SCHEMAS: &[TableSchema] = &[
    TableSchema {
        name: PROJECT_TABLE,
        partition_attr: ATTR_PROJECT_ID,
        range_attr: None,
        indexes: &[],
    },
    TableSchema {
        name: SLUG_TABLE,
        partition_attr: ATTR_SLUG,
        range_attr: None,
        indexes: &[IndexSchema {
            name: SLUG_BY_PROJECT_INDEX,
            partition_attr: ATTR_PROJECT_ID,
        }],
    },
    TableSchema {
        name: TOKEN_TABLE,
        partition_attr: ATTR_TARGET_ID,
        range_attr: Some(ATTR_TOKEN),
        indexes: &[],
    },
];

pub fn encode_project(record: &ProjectRecord) -> Item {
    let mut item = Item::new();
    item.insert(
        ATTR_PROJECT_ID.to_string(),
        AttrValue::S(record.project_id.clone()),
    );
    item.insert(
        ATTR_ACCOUNT_ID.to_string(),
        AttrValue::S(record.account_id.clone()),
    );
    item.insert(
        ATTR_VERSION.to_string(),
        AttrValue::S(record.version.clone()),
    );
    item.insert(
        ATTR_SCHEMA_VERSION.to_string(),
        AttrValue::N(record.schema_version),
    );
    item.insert(
        ATTR_CONFIG_JSON.to_string(),
        AttrValue::S(record.config_json.clone()),
    );
    // A set attribute cannot be stored empty; absence decodes back to empty.
    if !record.webhook_listeners.is_empty() {
        item.insert(
            ATTR_WEBHOOK_LISTENERS.to_string(),
            AttrValue::Ss(record.webhook_listeners.clone()),
        );
    }
    item
}

pub fn decode_project(item: Item) -> StoreResult<ProjectRecord> {
    Ok(ProjectRecord {
        project_id: req_s(&item, ATTR_PROJECT_ID)?,
        account_id: req_s(&item, ATTR_ACCOUNT_ID)?,
        version: req_s(&item, ATTR_VERSION)?,
        schema_version: req_n(&item, ATTR_SCHEMA_VERSION)?,
        webhook_listeners: item
            .get(ATTR_WEBHOOK_LISTENERS)
            .and_then(AttrValue::as_ss)
            .cloned()
            .unwrap_or_default(),
        config_json: req_s(&item, ATTR_CONFIG_JSON)?,
    })
}

pub fn encode_slug(record: &SlugRecord) -> Item {
    let mut item = Item::new();
    item.insert(ATTR_SLUG.to_string(), AttrValue::S(record.slug.clone()));
    item.insert(
        ATTR_PROJECT_ID.to_string(),
        AttrValue::S(record.project_id.clone()),
    );
    if let Some(expires_at) = record.expires_at_epoch_sec {
        item.insert(ATTR_EXPIRES_AT.to_string(), AttrValue::N(expires_at));
    }
    item
}

pub fn decode_slug(item: Item) -> StoreResult<SlugRecord> {
    Ok(SlugRecord {
        slug: req_s(&item, ATTR_SLUG)?,
        project_id: req_s(&item, ATTR_PROJECT_ID)?,
        expires_at_epoch_sec: opt_n(&item, ATTR_EXPIRES_AT)?,
    })
}

pub fn encode_token(token: &Token) -> Item {
    let mut item = Item::new();
    item.insert(
        ATTR_TARGET_ID.to_string(),
        AttrValue::S(token.target_id.clone()),
    );
    item.insert(ATTR_TOKEN.to_string(), AttrValue::S(token.token.clone()));
    item.insert(ATTR_TTL.to_string(), AttrValue::N(token.ttl_epoch_sec));
    item
}

pub fn decode_token(item: Item) -> StoreResult<Token> {
    Ok(Token {
        target_id: req_s(&item, ATTR_TARGET_ID)?,
        token: req_s(&item, ATTR_TOKEN)?,
        ttl_epoch_sec: req_n(&item, ATTR_TTL)?,
    })
}

fn req_s(item: &Item, attr: &str) -> StoreResult<String> {
    item.get(attr)
        .and_then(AttrValue::as_s)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Integrity(format!("stored item missing string attribute {attr}")))
}

fn req_n(item: &Item, attr: &str) -> StoreResult<i64> {
    item.get(attr)
        .and_then(AttrValue::as_n)
        .ok_or_else(|| StoreError::Integrity(format!("stored item missing number attribute {attr}")))
}

fn opt_n(item: &Item, attr: &str) -> StoreResult<Option<i64>> {
    match item.get(attr) {
        None => Ok(None),
        Some(value) => value.as_n().map(Some).ok_or_else(|| {
            StoreError::Integrity(format!("stored attribute {attr} is not a number"))
        }),
    }
}
