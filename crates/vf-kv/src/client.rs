//! KV Client trait (C1, §4.1): the abstraction every repository in
//! `vf-engine` is built on. A thin DynamoDB-style CRUD surface with
//! conditional writes, so correctness comes from conditional-put/update
//! rather than cross-key transactions (see spec §1 Non-goals).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::KvError;
use crate::value::{AttrValue, Item, Key};

/// Per-attribute precondition for `PutItem`/`UpdateItem`/`DeleteItem`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedCondition {
    Exists,
    NotExists,
    Value(AttrValue),
}

/// Per-attribute mutation for `UpdateItem`. `Add` is DynamoDB's atomic
/// counter increment, used for `asset_id_seq` bumps and accounting deltas.
#[derive(Debug, Clone)]
pub enum AttrUpdate {
    Put(AttrValue),
    Delete,
    Add(i64),
}

pub type Expected = BTreeMap<String, ExpectedCondition>;

/// A range-key condition for `Query` (§4.1: "optional range condition
/// EQ/LT/GT/BETWEEN/BEGINS_WITH").
#[derive(Debug, Clone)]
pub enum RangeCondition {
    Eq(String),
    Lt(String),
    Gt(String),
    Between(String, String),
    BeginsWith(String),
}

impl RangeCondition {
    pub fn matches(&self, range: &str) -> bool {
        match self {
            RangeCondition::Eq(v) => range == v,
            RangeCondition::Lt(v) => range < v.as_str(),
            RangeCondition::Gt(v) => range > v.as_str(),
            RangeCondition::Between(lo, hi) => range >= lo.as_str() && range <= hi.as_str(),
            RangeCondition::BeginsWith(prefix) => range.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub range_condition: Option<RangeCondition>,
    pub limit: Option<usize>,
    pub reverse: bool,
    pub start_after: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSpec {
    pub limit: Option<usize>,
    pub start_after: Option<Key>,
}

/// A thin abstraction over a DynamoDB-compatible store (§4.1). Implementors
/// MUST transparently retry `ProvisionedThroughputExceeded` internally with
/// backoff, and MUST surface `ConditionalCheckFailed` to the caller --
/// never swallow it, never retry it (it's a correctness signal consumed by
/// the CHECK/UPDATE/ACCOUNT/NOTIFY phases).
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, KvError>;

    async fn batch_get_item(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, KvError>;

    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        item: Item,
        expected: Option<Expected>,
    ) -> Result<(), KvError>;

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: BTreeMap<String, AttrUpdate>,
        expected: Option<Expected>,
    ) -> Result<Item, KvError>;

    async fn delete_item(&self, table: &str, key: &Key, expected: Option<Expected>) -> Result<(), KvError>;

    async fn query(&self, table: &str, hash: &str, spec: QuerySpec) -> Result<Vec<Item>, KvError>;

    async fn scan(&self, table: &str, spec: ScanSpec) -> Result<Vec<Item>, KvError>;
}

/// Lets callers compose wrappers (e.g. `CheckingKvClient`) around a shared
/// `Arc<C>` without re-threading ownership, the same way `Arc<dyn Trait>`
/// works for any other trait object.
#[async_trait]
impl<T: KvClient + ?Sized> KvClient for std::sync::Arc<T> {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, KvError> {
        (**self).get_item(table, key).await
    }

    async fn batch_get_item(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, KvError> {
        (**self).batch_get_item(table, keys).await
    }

    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        item: Item,
        expected: Option<Expected>,
    ) -> Result<(), KvError> {
        (**self).put_item(table, key, item, expected).await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: BTreeMap<String, AttrUpdate>,
        expected: Option<Expected>,
    ) -> Result<Item, KvError> {
        (**self).update_item(table, key, updates, expected).await
    }

    async fn delete_item(&self, table: &str, key: &Key, expected: Option<Expected>) -> Result<(), KvError> {
        (**self).delete_item(table, key, expected).await
    }

    async fn query(&self, table: &str, hash: &str, spec: QuerySpec) -> Result<Vec<Item>, KvError> {
        (**self).query(table, hash, spec).await
    }

    async fn scan(&self, table: &str, spec: ScanSpec) -> Result<Vec<Item>, KvError> {
        (**self).scan(table, spec).await
    }
}
