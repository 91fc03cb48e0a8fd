//! In-memory KV Client implementation. Doubles as a test fake (§10.5,
//! "dependency-injected services") and as the only backend this workspace
//! ships in place of a production DynamoDB driver (§10.6 Non-goal note).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::client::{AttrUpdate, Expected, ExpectedCondition, KvClient, QuerySpec, ScanSpec};
use crate::error::KvError;
use crate::value::{AttrValue, Item, Key};

type Table = RwLock<BTreeMap<Key, Item>>;

#[derive(Default)]
pub struct InMemoryKv {
    tables: DashMap<String, Arc<Table>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        InMemoryKv { tables: DashMap::new() }
    }

    fn table(&self, name: &str) -> Arc<Table> {
        self.tables.entry(name.to_string()).or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new()))).clone()
    }

    fn check_expected(existing: Option<&Item>, expected: &Expected) -> Result<(), KvError> {
        for (attr, condition) in expected {
            let actual = existing.and_then(|item| item.get(attr));
            let ok = match condition {
                ExpectedCondition::Exists => actual.is_some(),
                ExpectedCondition::NotExists => actual.is_none(),
                ExpectedCondition::Value(expected_value) => actual == Some(expected_value),
            };
            if !ok {
                return Err(KvError::ConditionalCheckFailed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, KvError> {
        let table = self.table(table);
        let guard = table.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn batch_get_item(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, KvError> {
        let table = self.table(table);
        let guard = table.read().await;
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }

    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        item: Item,
        expected: Option<Expected>,
    ) -> Result<(), KvError> {
        let table = self.table(table);
        let mut guard = table.write().await;
        if let Some(expected) = &expected {
            Self::check_expected(guard.get(key), expected)?;
        }
        guard.insert(key.clone(), item);
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: BTreeMap<String, AttrUpdate>,
        expected: Option<Expected>,
    ) -> Result<Item, KvError> {
        let table = self.table(table);
        let mut guard = table.write().await;
        if let Some(expected) = &expected {
            Self::check_expected(guard.get(key), expected)?;
        }
        let mut item = guard.get(key).cloned().unwrap_or_default();
        for (attr, update) in updates {
            match update {
                AttrUpdate::Put(value) => {
                    item.insert(attr, value);
                }
                AttrUpdate::Delete => {
                    item.remove(&attr);
                }
                AttrUpdate::Add(delta) => {
                    let current = item.get(&attr).and_then(AttrValue::as_i64).unwrap_or(0);
                    item.insert(attr, AttrValue::N(current + delta));
                }
            }
        }
        guard.insert(key.clone(), item.clone());
        Ok(item)
    }

    async fn delete_item(&self, table: &str, key: &Key, expected: Option<Expected>) -> Result<(), KvError> {
        let table = self.table(table);
        let mut guard = table.write().await;
        if let Some(expected) = &expected {
            Self::check_expected(guard.get(key), expected)?;
        }
        guard.remove(key);
        Ok(())
    }

    async fn query(&self, table: &str, hash: &str, spec: QuerySpec) -> Result<Vec<Item>, KvError> {
        let table = self.table(table);
        let guard = table.read().await;
        let mut rows: Vec<(&Key, &Item)> = guard
            .iter()
            .filter(|(k, _)| k.hash == hash)
            .filter(|(k, _)| match (&spec.range_condition, &k.range) {
                (Some(cond), Some(range)) => cond.matches(range),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        rows.sort_by(|a, b| a.0.range.cmp(&b.0.range));
        if spec.reverse {
            rows.reverse();
        }
        if let Some(cursor) = &spec.start_after {
            let pos = rows.iter().position(|(k, _)| k.range.as_deref() == Some(cursor.as_str()));
            if let Some(pos) = pos {
                rows = rows.split_off(pos + 1);
            }
        }
        if let Some(limit) = spec.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn scan(&self, table: &str, spec: ScanSpec) -> Result<Vec<Item>, KvError> {
        let table = self.table(table);
        let guard = table.read().await;
        let mut rows: Vec<(&Key, &Item)> = guard.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        if let Some(cursor) = &spec.start_after {
            let pos = rows.iter().position(|(k, _)| *k == cursor);
            if let Some(pos) = pos {
                rows = rows.split_off(pos + 1);
            }
        }
        if let Some(limit) = spec.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(|(_, v)| v.clone()).collect())
    }
}
