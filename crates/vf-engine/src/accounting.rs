//! Accounting Accumulator (C8, spec §4.8): the ACCOUNT phase's only write
//! surface. Deltas are batched against one or more `(hash_key, sort_key)`
//! scopes (§3's `ow:`/`sb:`/`vs:` prefixes, see `vf_core::types::accounting_scope`)
//! and applied idempotently keyed by the operation's id, so a retried
//! ACCOUNT phase after a crash never double-counts.
//!
//! No `accounting.py` survived in the retrieved source pack; this is built
//! directly from spec §4.8's description of scope keys and exactly-once
//! application, in the read-modify-conditional-write style the rest of
//! `vf-engine` uses against `vf_kv::KvClient`.

use std::sync::Arc;

use vf_core::errors::VfError;
use vf_core::types::{AccountingDelta, OperationId};
use vf_kv::KvClient;

use crate::store::Store;

/// One scoped delta queued for application by `AccountingAccumulator::apply`.
#[derive(Debug, Clone)]
pub struct ScopedDelta {
    pub hash_key: String,
    pub sort_key: String,
    pub delta: AccountingDelta,
}

/// Collects deltas during ACCOUNT-phase computation, then applies them all
/// in one batch. Splitting "compute" from "apply" lets operation code build
/// up the full set of scope deltas (often several viewpoints/users per
/// operation) before doing any writes, which keeps the write set easy to
/// reason about when replayed after a crash.
#[derive(Debug, Default)]
pub struct AccountingAccumulator {
    deltas: Vec<ScopedDelta>,
}

impl AccountingAccumulator {
    pub fn new() -> Self {
        AccountingAccumulator::default()
    }

    pub fn add(&mut self, hash_key: impl Into<String>, sort_key: impl Into<String>, delta: AccountingDelta) {
        self.deltas.push(ScopedDelta { hash_key: hash_key.into(), sort_key: sort_key.into(), delta });
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Applies every queued delta under `op_id`. Each scope's counters are
    /// read, `apply_delta`'d (a no-op if `op_id` already contributed to that
    /// scope), and written back -- so a crash between scopes is safe to
    /// replay: scopes already updated for this `op_id` are skipped the
    /// second time through.
    pub async fn apply<C: KvClient>(&self, store: &Store<C>, op_id: &OperationId) -> Result<(), VfError> {
        for scoped in &self.deltas {
            let mut counters = store.get_accounting(&scoped.hash_key, &scoped.sort_key).await?;
            if counters.apply_delta(op_id, scoped.delta) {
                store.put_accounting(&scoped.hash_key, &scoped.sort_key, &counters).await?;
            }
        }
        Ok(())
    }
}

/// Convenience wrapper binding an accumulator to a specific store + op id,
/// so operation code can call `acc.share(photo_count, bytes)` without
/// re-threading `store`/`op_id` through every call site.
pub struct Accounting<C: KvClient> {
    store: Arc<Store<C>>,
    op_id: OperationId,
    inner: AccountingAccumulator,
}

impl<C: KvClient> Accounting<C> {
    pub fn new(store: Arc<Store<C>>, op_id: OperationId) -> Self {
        Accounting { store, op_id, inner: AccountingAccumulator::new() }
    }

    pub fn add(&mut self, hash_key: impl Into<String>, sort_key: impl Into<String>, delta: AccountingDelta) {
        self.inner.add(hash_key, sort_key, delta);
    }

    pub async fn commit(&self) -> Result<(), VfError> {
        self.inner.apply(&self.store, &self.op_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::types::accounting_scope;
    use vf_kv::InMemoryKv;

    fn store() -> Store<InMemoryKv> {
        Store::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn applying_the_same_op_id_twice_does_not_double_count() {
        let store = store();
        let mut acc = AccountingAccumulator::new();
        acc.add(accounting_scope::owned_by(&"u1".to_string()), "totals", AccountingDelta { size_bytes: 100, num_photos: 1, num_conversations: 0 });
        acc.apply(&store, &"op1".to_string()).await.unwrap();
        acc.apply(&store, &"op1".to_string()).await.unwrap();
        let counters = store.get_accounting(&accounting_scope::owned_by(&"u1".to_string()), "totals").await.unwrap();
        assert_eq!(counters.num_photos, 1);
        assert_eq!(counters.size_bytes, 100);
    }

    #[tokio::test]
    async fn distinct_op_ids_each_contribute() {
        let store = store();
        let scope = accounting_scope::visible_in(&"vp1".to_string());
        let mut acc1 = AccountingAccumulator::new();
        acc1.add(scope.clone(), "totals", AccountingDelta { size_bytes: 10, num_photos: 1, num_conversations: 0 });
        acc1.apply(&store, &"op1".to_string()).await.unwrap();
        let mut acc2 = AccountingAccumulator::new();
        acc2.add(scope.clone(), "totals", AccountingDelta { size_bytes: 10, num_photos: 1, num_conversations: 0 });
        acc2.apply(&store, &"op2".to_string()).await.unwrap();
        let counters = store.get_accounting(&scope, "totals").await.unwrap();
        assert_eq!(counters.num_photos, 2);
    }

    #[tokio::test]
    async fn accounting_wrapper_commits_multiple_scopes() {
        let store = Arc::new(store());
        let mut acc = Accounting::new(store.clone(), "op1".to_string());
        acc.add(accounting_scope::owned_by(&"u1".to_string()), "totals", AccountingDelta { size_bytes: 5, num_photos: 1, num_conversations: 0 });
        acc.add(accounting_scope::shared_by(&"u1".to_string(), &"vp1".to_string()), "totals", AccountingDelta { size_bytes: 5, num_photos: 1, num_conversations: 0 });
        acc.commit().await.unwrap();
        let owned = store.get_accounting(&accounting_scope::owned_by(&"u1".to_string()), "totals").await.unwrap();
        let shared = store.get_accounting(&accounting_scope::shared_by(&"u1".to_string(), &"vp1".to_string()), "totals").await.unwrap();
        assert_eq!(owned.num_photos, 1);
        assert_eq!(shared.num_photos, 1);
    }
}
