//! Conditional-write key-value backend seam.
//!
//! # Purpose
//! Defines the item representation, preconditions, and operation surface the
//! echoboard stores are written against: conditional put/update/delete,
//! atomic multi-item transactions, batch get/write with unprocessed subsets,
//! and paged secondary-index queries. Production deployments bind this trait
//! to a hosted conditional-write store; `MemoryKv` serves local development
//! and tests.
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryKv;

pub type Result<T> = std::result::Result<T, BackendError>;

/// A stored item: attribute name to attribute value.
pub type Item = BTreeMap<String, AttrValue>;

/// Largest batch the backend accepts in one write round-trip.
pub const MAX_BATCH_WRITE: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    S(String),
    N(i64),
    Bool(bool),
    /// Set of strings; removed entirely when its last member is deleted.
    Ss(BTreeSet<String>),
}

impl AttrValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttrValue::N(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_ss(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttrValue::Ss(values) => Some(values),
            _ => None,
        }
    }
}

/// Primary key of an item: partition plus optional range component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub partition: String,
    pub range: Option<String>,
}

impl Key {
    pub fn hash(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            range: None,
        }
    }

    pub fn composite(partition: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            range: Some(range.into()),
        }
    }
}

/// Predicate a write must hold against current stored state to commit.
#[derive(Debug, Clone)]
pub enum Precondition {
    None,
    /// No item exists under the key.
    Absent,
    /// An item exists under the key.
    Exists,
    /// An item exists and its attribute equals the value.
    AttrEquals { attr: &'static str, value: AttrValue },
    /// No item exists, or one exists with the attribute equal to the value.
    AbsentOrAttrEquals { attr: &'static str, value: AttrValue },
}

/// Single attribute delta applied by a conditional update.
#[derive(Debug, Clone)]
pub enum UpdateAction {
    Set { attr: &'static str, value: AttrValue },
    AddToSet { attr: &'static str, member: String },
    RemoveFromSet { attr: &'static str, member: String },
}

/// Member of an atomic multi-item transaction.
#[derive(Debug, Clone)]
pub enum TransactOp {
    Put {
        table: &'static str,
        item: Item,
        precondition: Precondition,
    },
    Delete {
        table: &'static str,
        key: Key,
        precondition: Precondition,
    },
}

/// Unconditional write submitted through a batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Item),
    Delete(Key),
}

/// Outcome of a batch get; `unprocessed` keys must be retried by the caller.
#[derive(Debug, Default)]
pub struct BatchGetResult {
    pub items: Vec<Item>,
    pub unprocessed: Vec<Key>,
}

/// One page of a secondary-index query. `next` is the exclusive start key
/// for the following page; `None` means the iteration is exhausted.
#[derive(Debug, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub next: Option<Key>,
}

/// Why a transaction member was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    None,
    PreconditionFailed,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The stated precondition did not hold; nothing was written.
    #[error("precondition failed")]
    PreconditionFailed,
    /// The transaction was rejected; `reasons` aligns with the submitted ops.
    #[error("transaction canceled")]
    TransactionCanceled { reasons: Vec<CancelReason> },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl BackendError {
    /// True when the failure is a precondition race rather than an outage,
    /// including any member of a canceled transaction.
    pub fn is_precondition_failure(&self) -> bool {
        match self {
            BackendError::PreconditionFailed => true,
            BackendError::TransactionCanceled { reasons } => reasons
                .iter()
                .any(|reason| *reason == CancelReason::PreconditionFailed),
            BackendError::Unexpected(_) => false,
        }
    }
}

/// Declared shape of a table: where its key attributes live in the item.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub partition_attr: &'static str,
    pub range_attr: Option<&'static str>,
    pub indexes: &'static [IndexSchema],
}

/// Secondary index over a table, keyed by a single item attribute. Range
/// ordering follows the primary key of the base table.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub name: &'static str,
    pub partition_attr: &'static str,
}

/// Minimum primitives the stores require from a backing key-value store.
///
/// Every method that takes a `Precondition` fails with
/// [`BackendError::PreconditionFailed`], distinguishable from other errors,
/// when the predicate does not hold. Batch methods may complete only part of
/// the request in one round-trip; callers retry the unprocessed subset until
/// it is empty (backoff is the caller's concern).
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, table: &'static str, key: &Key, consistent: bool) -> Result<Option<Item>>;

    async fn put(&self, table: &'static str, item: Item, precondition: Precondition) -> Result<()>;

    async fn update(
        &self,
        table: &'static str,
        key: &Key,
        actions: Vec<UpdateAction>,
        precondition: Precondition,
    ) -> Result<()>;

    /// Deletes the item and returns its previous value, if any.
    async fn delete(
        &self,
        table: &'static str,
        key: &Key,
        precondition: Precondition,
    ) -> Result<Option<Item>>;

    /// Commits every op or none. Rejection reports per-member reasons.
    async fn transact_write(&self, ops: Vec<TransactOp>) -> Result<()>;

    async fn batch_get(
        &self,
        table: &'static str,
        keys: Vec<Key>,
        consistent: bool,
    ) -> Result<BatchGetResult>;

    /// Returns the unprocessed subset; empty means fully applied.
    async fn batch_write(&self, table: &'static str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>>;

    /// Pages through items whose indexed attribute equals `partition` and
    /// whose primary partition key starts with `range_prefix`.
    async fn query_index(
        &self,
        table: &'static str,
        index: &'static str,
        partition: &AttrValue,
        range_prefix: &str,
        start_after: Option<Key>,
        limit: usize,
    ) -> Result<QueryPage>;
}
