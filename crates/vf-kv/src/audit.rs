//! CHECK-phase mutation auditor (§4.1), grounded on
//! `backend/op/op_mgr_db_client.py::OpMgrDBClient`. Wraps a `KvClient` and
//! records whether any disallowed mutation was observed; the Four-Phase
//! Executor (`vf-engine`) uses one of these during CHECK and asserts
//! `check_not_modified()` before proceeding to UPDATE.
//!
//! Allowed during CHECK: lock writes (table `lock`), operation checkpoint
//! writes (table `operation`), id-allocator bumps (table `id_allocator`),
//! and a single-attribute `asset_id_seq` increment on `user`. Anything else
//! is a programming error.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{AttrUpdate, Expected, KvClient, QuerySpec, ScanSpec};
use crate::error::KvError;
use crate::value::{Item, Key};

pub const LOCK_TABLE: &str = "lock";
pub const OPERATION_TABLE: &str = "operation";
pub const ID_ALLOCATOR_TABLE: &str = "id_allocator";
pub const USER_TABLE: &str = "user";
pub const ASSET_ID_SEQ_ATTR: &str = "asset_id_seq";

pub struct CheckingKvClient<C: KvClient> {
    inner: C,
    modified: Mutex<Option<String>>,
}

impl<C: KvClient> CheckingKvClient<C> {
    pub fn new(inner: C) -> Self {
        CheckingKvClient { inner, modified: Mutex::new(None) }
    }

    pub fn has_been_modified(&self) -> bool {
        self.modified.lock().unwrap().is_some()
    }

    /// Returns an error describing the first disallowed mutation observed
    /// since the last `reset`, if any.
    pub fn check_not_modified(&self) -> Result<(), vf_core::errors::VfError> {
        if let Some(desc) = self.modified.lock().unwrap().clone() {
            return Err(vf_core::errors::VfError::Programming(format!(
                "db modified during CHECK before it should have been: {desc}"
            )));
        }
        Ok(())
    }

    pub fn reset(&self) {
        *self.modified.lock().unwrap() = None;
    }

    fn record(&self, table: &str, attrs: Option<&[String]>) {
        let mut modified = self.modified.lock().unwrap();
        if modified.is_some() {
            return;
        }
        if table == LOCK_TABLE || table == OPERATION_TABLE || table == ID_ALLOCATOR_TABLE {
            return;
        }
        if table == USER_TABLE {
            if let Some(attrs) = attrs {
                if attrs.len() == 1 && attrs[0] == ASSET_ID_SEQ_ATTR {
                    return;
                }
            }
        }
        *modified = Some(format!("table={table}"));
    }
}

#[async_trait]
impl<C: KvClient> KvClient for CheckingKvClient<C> {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, KvError> {
        self.inner.get_item(table, key).await
    }

    async fn batch_get_item(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, KvError> {
        self.inner.batch_get_item(table, keys).await
    }

    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        item: Item,
        expected: Option<Expected>,
    ) -> Result<(), KvError> {
        let attrs: Vec<String> = item.keys().cloned().collect();
        self.record(table, Some(&attrs));
        self.inner.put_item(table, key, item, expected).await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: BTreeMap<String, AttrUpdate>,
        expected: Option<Expected>,
    ) -> Result<Item, KvError> {
        let attrs: Vec<String> = updates.keys().cloned().collect();
        self.record(table, Some(&attrs));
        self.inner.update_item(table, key, updates, expected).await
    }

    async fn delete_item(&self, table: &str, key: &Key, expected: Option<Expected>) -> Result<(), KvError> {
        self.record(table, None);
        self.inner.delete_item(table, key, expected).await
    }

    async fn query(&self, table: &str, hash: &str, spec: QuerySpec) -> Result<Vec<Item>, KvError> {
        self.inner.query(table, hash, spec).await
    }

    async fn scan(&self, table: &str, spec: ScanSpec) -> Result<Vec<Item>, KvError> {
        self.inner.scan(table, spec).await
    }
}
