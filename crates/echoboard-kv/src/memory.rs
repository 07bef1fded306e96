//! In-memory implementation of the key-value backend.
//!
//! # Purpose
//! Implements [`KeyValueBackend`] entirely in memory using `BTreeMap`s
//! guarded by a single `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - exercising the stores' retry and rollback paths deterministically
//!
//! # Consistency
//! All tables share one lock, so conditional writes and transactions are
//! trivially atomic within one process. The `consistent` read flag is
//! accepted and ignored; every read observes the latest committed state.
//!
//! # Partial batches
//! A configurable per-round-trip limit (`with_batch_limit`) makes batch
//! operations return an unprocessed subset, mirroring a real backend under
//! throttling. The default is no limit.
use crate::{
    AttrValue, BackendError, BatchGetResult, CancelReason, IndexSchema, Item, Key, KeyValueBackend,
    Precondition, QueryPage, Result, TableSchema, TransactOp, UpdateAction, WriteOp,
};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

pub struct MemoryKv {
    schemas: HashMap<&'static str, TableSchema>,
    tables: RwLock<HashMap<&'static str, BTreeMap<Key, Item>>>,
    // When set, batch calls service at most this many entries per round-trip.
    batch_limit: Option<usize>,
}

impl MemoryKv {
    pub fn new(schemas: &[TableSchema]) -> Self {
        Self {
            schemas: schemas
                .iter()
                .map(|schema| (schema.name, schema.clone()))
                .collect(),
            tables: RwLock::new(HashMap::new()),
            batch_limit: None,
        }
    }

    pub fn with_batch_limit(schemas: &[TableSchema], limit: usize) -> Self {
        Self {
            batch_limit: Some(limit),
            ..Self::new(schemas)
        }
    }

    fn schema(&self, table: &'static str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| BackendError::Unexpected(anyhow!("unknown table: {table}")))
    }

    fn index<'a>(&self, schema: &'a TableSchema, index: &'static str) -> Result<&'a IndexSchema> {
        schema
            .indexes
            .iter()
            .find(|candidate| candidate.name == index)
            .ok_or_else(|| {
                BackendError::Unexpected(anyhow!("unknown index {index} on {}", schema.name))
            })
    }

    fn key_of(schema: &TableSchema, item: &Item) -> Result<Key> {
        let partition = item
            .get(schema.partition_attr)
            .and_then(AttrValue::as_s)
            .ok_or_else(|| {
                BackendError::Unexpected(anyhow!(
                    "item missing partition attribute {} for table {}",
                    schema.partition_attr,
                    schema.name
                ))
            })?
            .to_string();
        let range = match schema.range_attr {
            None => None,
            Some(attr) => Some(
                item.get(attr)
                    .and_then(AttrValue::as_s)
                    .ok_or_else(|| {
                        BackendError::Unexpected(anyhow!(
                            "item missing range attribute {attr} for table {}",
                            schema.name
                        ))
                    })?
                    .to_string(),
            ),
        };
        Ok(Key { partition, range })
    }

    fn check(existing: Option<&Item>, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::None => true,
            Precondition::Absent => existing.is_none(),
            Precondition::Exists => existing.is_some(),
            Precondition::AttrEquals { attr, value } => {
                existing.is_some_and(|item| item.get(*attr) == Some(value))
            }
            Precondition::AbsentOrAttrEquals { attr, value } => match existing {
                None => true,
                Some(item) => item.get(*attr) == Some(value),
            },
        }
    }

    fn apply_actions(
        schema: &TableSchema,
        key: &Key,
        existing: Option<Item>,
        actions: Vec<UpdateAction>,
    ) -> Result<Item> {
        // An update on a missing item creates it, seeded with key attributes.
        let mut item = existing.unwrap_or_else(|| {
            let mut fresh = Item::new();
            fresh.insert(
                schema.partition_attr.to_string(),
                AttrValue::S(key.partition.clone()),
            );
            if let (Some(attr), Some(range)) = (schema.range_attr, &key.range) {
                fresh.insert(attr.to_string(), AttrValue::S(range.clone()));
            }
            fresh
        });
        for action in actions {
            match action {
                UpdateAction::Set { attr, value } => {
                    item.insert(attr.to_string(), value);
                }
                UpdateAction::AddToSet { attr, member } => match item.get_mut(attr) {
                    None => {
                        item.insert(attr.to_string(), AttrValue::Ss(BTreeSet::from([member])));
                    }
                    Some(AttrValue::Ss(members)) => {
                        members.insert(member);
                    }
                    Some(_) => {
                        return Err(BackendError::Unexpected(anyhow!(
                            "attribute {attr} is not a string set"
                        )));
                    }
                },
                UpdateAction::RemoveFromSet { attr, member } => {
                    if let Some(AttrValue::Ss(members)) = item.get_mut(attr) {
                        members.remove(&member);
                        // An emptied set attribute is removed, not kept empty.
                        if members.is_empty() {
                            item.remove(attr);
                        }
                    }
                }
            }
        }
        Ok(item)
    }
}

#[async_trait]
impl KeyValueBackend for MemoryKv {
    async fn get(
        &self,
        table: &'static str,
        key: &Key,
        _consistent: bool,
    ) -> Result<Option<Item>> {
        self.schema(table)?;
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|items| items.get(key)).cloned())
    }

    async fn put(&self, table: &'static str, item: Item, precondition: Precondition) -> Result<()> {
        let schema = self.schema(table)?;
        let key = Self::key_of(schema, &item)?;
        let mut tables = self.tables.write().await;
        let items = tables.entry(table).or_default();
        if !Self::check(items.get(&key), &precondition) {
            return Err(BackendError::PreconditionFailed);
        }
        items.insert(key, item);
        Ok(())
    }

    async fn update(
        &self,
        table: &'static str,
        key: &Key,
        actions: Vec<UpdateAction>,
        precondition: Precondition,
    ) -> Result<()> {
        let schema = self.schema(table)?.clone();
        let mut tables = self.tables.write().await;
        let items = tables.entry(table).or_default();
        let existing = items.get(key);
        if !Self::check(existing, &precondition) {
            return Err(BackendError::PreconditionFailed);
        }
        let updated = Self::apply_actions(&schema, key, existing.cloned(), actions)?;
        items.insert(key.clone(), updated);
        Ok(())
    }

    async fn delete(
        &self,
        table: &'static str,
        key: &Key,
        precondition: Precondition,
    ) -> Result<Option<Item>> {
        self.schema(table)?;
        let mut tables = self.tables.write().await;
        let items = tables.entry(table).or_default();
        if !Self::check(items.get(key), &precondition) {
            return Err(BackendError::PreconditionFailed);
        }
        Ok(items.remove(key))
    }

    async fn transact_write(&self, ops: Vec<TransactOp>) -> Result<()> {
        // One lock over all tables makes the transaction trivially atomic:
        // validate every member first, then apply.
        let mut tables = self.tables.write().await;
        let mut reasons = Vec::with_capacity(ops.len());
        let mut failed = false;
        for op in &ops {
            let (table, key, precondition) = match op {
                TransactOp::Put {
                    table,
                    item,
                    precondition,
                } => {
                    let schema = self.schema(table)?;
                    (*table, Self::key_of(schema, item)?, precondition)
                }
                TransactOp::Delete {
                    table,
                    key,
                    precondition,
                } => (*table, key.clone(), precondition),
            };
            let existing = tables.get(table).and_then(|items| items.get(&key));
            if Self::check(existing, precondition) {
                reasons.push(CancelReason::None);
            } else {
                reasons.push(CancelReason::PreconditionFailed);
                failed = true;
            }
        }
        if failed {
            return Err(BackendError::TransactionCanceled { reasons });
        }
        for op in ops {
            match op {
                TransactOp::Put { table, item, .. } => {
                    let schema = self.schema(table)?;
                    let key = Self::key_of(schema, &item)?;
                    tables.entry(table).or_default().insert(key, item);
                }
                TransactOp::Delete { table, key, .. } => {
                    tables.entry(table).or_default().remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn batch_get(
        &self,
        table: &'static str,
        keys: Vec<Key>,
        _consistent: bool,
    ) -> Result<BatchGetResult> {
        self.schema(table)?;
        let serviced = self.batch_limit.unwrap_or(keys.len()).min(keys.len());
        let tables = self.tables.read().await;
        let items_by_key = tables.get(table);
        let mut result = BatchGetResult::default();
        for (position, key) in keys.into_iter().enumerate() {
            if position >= serviced {
                result.unprocessed.push(key);
                continue;
            }
            // Missing keys are silently omitted, matching batch-get semantics.
            if let Some(item) = items_by_key.and_then(|items| items.get(&key)) {
                result.items.push(item.clone());
            }
        }
        Ok(result)
    }

    async fn batch_write(&self, table: &'static str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>> {
        let schema = self.schema(table)?.clone();
        let serviced = self.batch_limit.unwrap_or(ops.len()).min(ops.len());
        let mut tables = self.tables.write().await;
        let items = tables.entry(table).or_default();
        let mut unprocessed = Vec::new();
        for (position, op) in ops.into_iter().enumerate() {
            if position >= serviced {
                unprocessed.push(op);
                continue;
            }
            match op {
                WriteOp::Put(item) => {
                    let key = Self::key_of(&schema, &item)?;
                    items.insert(key, item);
                }
                WriteOp::Delete(key) => {
                    items.remove(&key);
                }
            }
        }
        Ok(unprocessed)
    }

    async fn query_index(
        &self,
        table: &'static str,
        index: &'static str,
        partition: &AttrValue,
        range_prefix: &str,
        start_after: Option<Key>,
        limit: usize,
    ) -> Result<QueryPage> {
        let schema = self.schema(table)?;
        let index = self.index(schema, index)?;
        let tables = self.tables.read().await;
        let Some(items) = tables.get(table) else {
            return Ok(QueryPage::default());
        };
        // Scan in primary-key order; acceptable for dev/test data volumes.
        let mut page = QueryPage::default();
        let mut remaining = false;
        for (key, item) in items {
            if let Some(start) = &start_after
                && key <= start
            {
                continue;
            }
            if item.get(index.partition_attr) != Some(partition) {
                continue;
            }
            if !key.partition.starts_with(range_prefix) {
                continue;
            }
            if page.items.len() == limit {
                remaining = true;
                break;
            }
            page.items.push(item.clone());
            page.next = Some(key.clone());
        }
        if !remaining {
            page.next = None;
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMAS: &[TableSchema] = &[
        TableSchema {
            name: "widget",
            partition_attr: "widgetId",
            range_attr: None,
            indexes: &[IndexSchema {
                name: "widgetByOwner",
                partition_attr: "ownerId",
            }],
        },
        TableSchema {
            name: "grant",
            partition_attr: "ownerId",
            range_attr: Some("grantId"),
            indexes: &[],
        },
    ];

    fn widget(id: &str, owner: &str) -> Item {
        Item::from([
            ("widgetId".to_string(), AttrValue::S(id.to_string())),
            ("ownerId".to_string(), AttrValue::S(owner.to_string())),
        ])
    }

    #[tokio::test]
    async fn conditional_put_enforces_absence() {
        let kv = MemoryKv::new(SCHEMAS);
        kv.put("widget", widget("w1", "a"), Precondition::Absent)
            .await
            .expect("first put");
        let err = kv
            .put("widget", widget("w1", "b"), Precondition::Absent)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, BackendError::PreconditionFailed));
        // The original item is untouched by the failed write.
        let stored = kv
            .get("widget", &Key::hash("w1"), true)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.get("ownerId"), Some(&AttrValue::S("a".into())));
    }

    #[tokio::test]
    async fn attr_equals_requires_existing_item() {
        let kv = MemoryKv::new(SCHEMAS);
        let pre = Precondition::AttrEquals {
            attr: "ownerId",
            value: AttrValue::S("a".into()),
        };
        let err = kv
            .put("widget", widget("w1", "a"), pre.clone())
            .await
            .expect_err("missing item");
        assert!(matches!(err, BackendError::PreconditionFailed));

        kv.put("widget", widget("w1", "a"), Precondition::None)
            .await
            .expect("seed");
        kv.put("widget", widget("w1", "a"), pre)
            .await
            .expect("matching owner");
    }

    #[tokio::test]
    async fn transaction_is_all_or_nothing() {
        let kv = MemoryKv::new(SCHEMAS);
        kv.put("widget", widget("taken", "other"), Precondition::None)
            .await
            .expect("seed");
        let err = kv
            .transact_write(vec![
                TransactOp::Put {
                    table: "widget",
                    item: widget("fresh", "a"),
                    precondition: Precondition::Absent,
                },
                TransactOp::Put {
                    table: "widget",
                    item: widget("taken", "a"),
                    precondition: Precondition::Absent,
                },
            ])
            .await
            .expect_err("second member conflicts");
        match err {
            BackendError::TransactionCanceled { reasons } => {
                assert_eq!(
                    reasons,
                    vec![CancelReason::None, CancelReason::PreconditionFailed]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The passing member must not have been applied.
        assert!(
            kv.get("widget", &Key::hash("fresh"), true)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn batch_limit_returns_unprocessed_subsets() {
        let kv = MemoryKv::with_batch_limit(SCHEMAS, 2);
        for id in ["w1", "w2", "w3", "w4", "w5"] {
            kv.put("widget", widget(id, "a"), Precondition::None)
                .await
                .expect("seed");
        }
        let keys: Vec<Key> = ["w1", "w2", "w3", "w4", "w5"]
            .into_iter()
            .map(Key::hash)
            .collect();
        let first = kv.batch_get("widget", keys, true).await.expect("batch");
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.unprocessed.len(), 3);
        let second = kv
            .batch_get("widget", first.unprocessed, true)
            .await
            .expect("retry");
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.unprocessed.len(), 1);
    }

    #[tokio::test]
    async fn index_query_pages_through_matches() {
        let kv = MemoryKv::new(SCHEMAS);
        for id in ["w1", "w2", "w3"] {
            kv.put("widget", widget(id, "owner-a"), Precondition::None)
                .await
                .expect("seed");
        }
        kv.put("widget", widget("w4", "owner-b"), Precondition::None)
            .await
            .expect("seed");

        let mut seen = Vec::new();
        let mut start_after = None;
        loop {
            let page = kv
                .query_index(
                    "widget",
                    "widgetByOwner",
                    &AttrValue::S("owner-a".into()),
                    "",
                    start_after,
                    2,
                )
                .await
                .expect("query");
            for item in &page.items {
                seen.push(item.get("widgetId").and_then(AttrValue::as_s).map(str::to_string));
            }
            match page.next {
                Some(next) => start_after = Some(next),
                None => break,
            }
        }
        let seen: Vec<String> = seen.into_iter().flatten().collect();
        assert_eq!(seen, vec!["w1", "w2", "w3"]);
    }

    #[tokio::test]
    async fn set_updates_add_and_remove_members() {
        let kv = MemoryKv::new(SCHEMAS);
        kv.put("widget", widget("w1", "a"), Precondition::None)
            .await
            .expect("seed");
        let key = Key::hash("w1");
        kv.update(
            "widget",
            &key,
            vec![UpdateAction::AddToSet {
                attr: "tags",
                member: "x".into(),
            }],
            Precondition::Exists,
        )
        .await
        .expect("add");
        kv.update(
            "widget",
            &key,
            vec![UpdateAction::RemoveFromSet {
                attr: "tags",
                member: "x".into(),
            }],
            Precondition::Exists,
        )
        .await
        .expect("remove");
        let stored = kv
            .get("widget", &key, true)
            .await
            .expect("get")
            .expect("present");
        // The emptied set attribute disappears entirely.
        assert!(stored.get("tags").is_none());
    }

    #[tokio::test]
    async fn delete_returns_previous_item() {
        let kv = MemoryKv::new(SCHEMAS);
        kv.put("widget", widget("w1", "a"), Precondition::None)
            .await
            .expect("seed");
        let old = kv
            .delete("widget", &Key::hash("w1"), Precondition::None)
            .await
            .expect("delete");
        assert!(old.is_some());
        let gone = kv
            .delete("widget", &Key::hash("w1"), Precondition::None)
            .await
            .expect("idempotent delete");
        assert!(gone.is_none());
    }
}
