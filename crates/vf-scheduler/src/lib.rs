//! Operation Manager / Scheduler (C4, spec §4.4): owns per-user execution
//! queues, acquires the `op:<user_id>` lock, drains operations in id
//! order, and is the only caller that invokes `vf_engine::dispatch` and
//! acquires viewpoint locks around it.
//!
//! Fairness (§4.4 "user drain tasks are scheduled round-robin from a work
//! channel") is a bounded `flume` channel of user ids fed by
//! `CreateAndExecute` and by a startup orphan scan; a fixed pool of worker
//! tasks pulls from it. `active_users` (a `DashMap` used as a per-user
//! mutex) ensures at most one worker drains a given user at a time within
//! this process -- the `op:<user_id>` lock is what prevents two different
//! *processes* from doing so.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};
use tracing::{info, instrument, warn};

use vf_core::asset_id::{construct_device_local_asset_id, IdPrefix};
use vf_core::clock::SharedClock;
use vf_core::config::SchedulerConfig;
use vf_core::errors::VfError;
use vf_core::types::{DeviceId, LockResourceType, Operation as OpRow, OperationId, UserId};
use vf_engine::dispatch::{dispatch, KNOWN_METHODS};
use vf_engine::executor::{ExecutionOutcome, FourPhaseExecutor, NestedOperationRequest};
use vf_engine::store::Store;
use vf_kv::KvClient;
use vf_lock::{new_owner_id, LockHandle, LockManager};

mod backoff;
pub use backoff::compute_backoff;

/// One user's place in the fairness queue; also the unit a waiter's
/// completion future resolves against (§4.3 "synchronous=true" requests).
type CompletionKey = (UserId, OperationId);

pub struct Scheduler<C: KvClient> {
    store: Arc<Store<C>>,
    lock_manager: Arc<LockManager<C>>,
    executor: Arc<FourPhaseExecutor<C>>,
    clock: SharedClock,
    config: SchedulerConfig,
    owner_id: String,
    active_users: Arc<DashMap<UserId, Arc<Notify>>>,
    waiters: Arc<DashMap<CompletionKey, Vec<oneshot::Sender<Result<(), VfError>>>>>,
    work_tx: flume::Sender<UserId>,
    work_rx: flume::Receiver<UserId>,
}

impl<C: KvClient + 'static> Scheduler<C> {
    pub fn new(
        store: Arc<Store<C>>,
        lock_manager: Arc<LockManager<C>>,
        executor: Arc<FourPhaseExecutor<C>>,
        clock: SharedClock,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = flume::bounded(config.fairness_channel_depth);
        Arc::new(Scheduler {
            store,
            lock_manager,
            executor,
            clock,
            config,
            owner_id: new_owner_id(),
            active_users: Arc::new(DashMap::new()),
            waiters: Arc::new(DashMap::new()),
            work_tx,
            work_rx,
        })
    }

    /// `CreateAndExecute` (§4.3): allocates an operation id from the
    /// user's own `asset_id_seq` (device/local asset-id family, §4.8),
    /// writes the durable `Operation` row, and wakes a drain worker for
    /// this user. When `synchronous` is true, the caller blocks on an
    /// in-process future completed when the operation (and any nested
    /// chain it triggers) finishes.
    #[instrument(skip(self, args), fields(user_id = %user_id, method = %method))]
    pub async fn create_and_execute(
        self: &Arc<Self>,
        user_id: UserId,
        device_id: DeviceId,
        method: impl Into<String>,
        args: serde_json::Value,
        synchronous: bool,
    ) -> Result<OperationId, VfError> {
        let method = method.into();
        if !KNOWN_METHODS.contains(&method.as_str()) {
            return Err(VfError::invalid_request("UNKNOWN_OPERATION_METHOD", format!("{method:?} is not a registered operation")));
        }
        let local_id = self.store.bump_asset_id_seq(&user_id, 1).await?;
        let operation_id = construct_device_local_asset_id(IdPrefix::Operation, device_id, local_id);
        let op_row = OpRow::new(user_id.clone(), operation_id.clone(), device_id, method, args, self.clock.now());
        self.store.put_operation(&op_row).await?;

        let rx = if synchronous {
            let (tx, rx) = oneshot::channel();
            self.waiters.entry((user_id.clone(), operation_id.clone())).or_default().push(tx);
            Some(rx)
        } else {
            None
        };

        self.enqueue(user_id);

        if let Some(rx) = rx {
            rx.await.map_err(|_| VfError::ServiceUnavailable("scheduler dropped before completion".into()))??;
        }
        Ok(operation_id)
    }

    /// Pushes `user_id` onto the fairness channel. Safe to call repeatedly
    /// for the same user -- at most one drain task runs per user at a
    /// time (`active_users`), and a running drain task re-scans until its
    /// queue is empty before releasing its slot, so a redundant wakeup
    /// just no-ops when it's finally handled.
    pub fn enqueue(&self, user_id: UserId) {
        if self.work_tx.try_send(user_id.clone()).is_err() {
            warn!(user_id = %user_id, "fairness channel full, dropping duplicate wakeup");
        }
    }

    /// Spawns `worker_count` tasks pulling from the fairness channel. Each
    /// worker drains whichever user it dequeues to completion (or
    /// backoff) before returning for more work, so one worker can serve
    /// many different users serially -- only one worker touches any given
    /// user at a time, enforced by `active_users`.
    pub fn spawn_workers(self: &Arc<Self>, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..worker_count)
            .map(|i| {
                let this = self.clone();
                tokio::spawn(async move {
                    info!(worker = i, "scheduler worker started");
                    while let Ok(user_id) = this.work_rx.recv_async().await {
                        this.drain_user(user_id).await;
                    }
                })
            })
            .collect()
    }

    /// Broad startup scan (§4.4 "Scheduler MAY scan the Operation table
    /// broadly to discover orphaned work"): finds every user with at
    /// least one pending row and enqueues them, so work left behind by a
    /// crashed host gets picked up without waiting for a fresh
    /// `CreateAndExecute`.
    pub async fn scan_for_orphans(self: &Arc<Self>) -> Result<usize, VfError> {
        let user_ids = self.store.scan_users_with_pending_ops().await?;
        let count = user_ids.len();
        for user_id in user_ids {
            self.enqueue(user_id);
        }
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn drain_user(self: &Arc<Self>, user_id: UserId) {
        // Only one drain task per user within this process; a second
        // wakeup for a user already being drained is redundant because
        // the active loop re-scans until empty.
        let guard = match self.active_users.entry(user_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let notify = Arc::new(Notify::new());
                v.insert(notify.clone());
                notify
            }
        };

        let lock_handle = match self.lock_manager.acquire(LockResourceType::Operation, &user_id, &self.owner_id, None).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "op lock held elsewhere, yielding");
                self.active_users.remove(&user_id);
                guard.notify_waiters();
                return;
            }
        };

        let renewer = self.spawn_renewer(lock_handle.clone());
        self.drain_loop(&user_id).await;
        renewer.abort();
        self.lock_manager.release(&lock_handle).await;
        self.active_users.remove(&user_id);
        guard.notify_waiters();
    }

    fn spawn_renewer(self: &Arc<Self>, mut handle: LockHandle) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let interval = this
            .lock_manager
            .renewal_interval()
            .to_std()
            .unwrap_or(StdDuration::from_secs(20));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match this.lock_manager.renew(&handle).await {
                    Ok(renewed) => handle = renewed,
                    Err(e) => {
                        warn!(resource = %handle.resource_key(), error = %e, "lock renewal failed, abandoning");
                        return;
                    }
                }
            }
        })
    }

    /// Steps 3-7 of §4.4's per-user drain loop: scans ready ops in id
    /// order and runs each to completion, backoff, or quarantine. Does
    /// *not* release the `op:<user>` lock between operations -- that's
    /// the caller's (`drain_user`'s) job once this returns.
    async fn drain_loop(self: &Arc<Self>, user_id: &UserId) {
        let mut cursor: Option<OperationId> = None;
        loop {
            let batch = match self.store.scan_pending_ops(user_id, cursor.clone(), 16).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "scan_pending_ops failed");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            let now = self.clock.now();
            let ready = batch.iter().find(|op| !op.quarantined && op.backoff_until.map(|t| now >= t).unwrap_or(true));
            let Some(op_row) = ready else {
                // Nothing in this batch is ready yet; everything pending
                // is backing off or quarantined, so this user's queue is
                // effectively empty for now.
                return;
            };
            cursor = Some(op_row.operation_id.clone());
            let mut op_row = op_row.clone();

            self.run_one(&mut op_row).await;
        }
    }

    /// Runs a single operation to completion, handling the nested-op
    /// control flow (§4.4) and the retry/quarantine policy (§4.4 steps
    /// 6-7, §7). Thin wrapper over `drive_operation` for call sites (the
    /// drain loop) that don't need the terminal `Result` -- completion or
    /// quarantine has already been reported to any waiter by the time
    /// this returns.
    #[instrument(skip(self, op_row), fields(user_id = %op_row.user_id, op_id = %op_row.operation_id, method = %op_row.method))]
    async fn run_one(self: &Arc<Self>, op_row: &mut OpRow) {
        let _ = self.drive_operation(op_row).await;
    }

    /// The actual CHECK/UPDATE/ACCOUNT/NOTIFY + nested-chain + retry loop,
    /// factored out of `run_one` so `run_nested_inline` can drive a nested
    /// operation to resolution and observe whether it succeeded.
    async fn drive_operation(self: &Arc<Self>, op_row: &mut OpRow) -> Result<(), VfError> {
        loop {
            let locks = self.lock_for_method(op_row).await;
            let locks = match locks {
                Ok(locks) => locks,
                Err(e) => {
                    self.handle_failure(op_row, e.clone()).await;
                    return Err(e);
                }
            };

            let result = dispatch(&self.executor, self.clock.clone(), op_row).await;
            for handle in &locks {
                self.lock_manager.release(handle).await;
            }

            match result {
                Ok(ExecutionOutcome::Completed) => {
                    info!("operation completed");
                    self.complete(&op_row.user_id, &op_row.operation_id, Ok(()));
                    return Ok(());
                }
                Ok(ExecutionOutcome::NeedsNested(nested)) => {
                    if let Err(e) = self.run_nested_chain(op_row, nested).await {
                        self.handle_failure(op_row, e.clone()).await;
                        return Err(e);
                    }
                    // Re-enter the outer operation from its (still-unwritten)
                    // checkpoint now that the nested chain is done (§4.4).
                    continue;
                }
                Err(e) => {
                    self.handle_failure(op_row, e.clone()).await;
                    return Err(e);
                }
            }
        }
    }

    async fn lock_for_method(&self, op_row: &OpRow) -> Result<Vec<LockHandle>, VfError> {
        let user = self.store.require_user(&op_row.user_id).await?;
        let viewpoint_ids = vf_engine::ops::locks::viewpoint_locks_for(&op_row.method, &op_row.args, &user.private_vp_id);
        if viewpoint_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.lock_manager.acquire_sorted_viewpoint_locks(&viewpoint_ids, &self.owner_id).await
    }

    /// Runs every nested request (§4.4, §8 S6) to completion before
    /// letting the caller re-enter the outer operation.
    ///
    /// A request for the *same* user as `outer` (e.g. `share_new`'s
    /// nested `register_prospective_user`, which targets the inviting
    /// user -- see `share_new.rs`) must run inline: `outer` is being
    /// drained by this worker, which holds that user's slot in
    /// `active_users` for the whole outer drain. Routing it back through
    /// `create_and_execute`'s fairness channel would enqueue the same
    /// user id this worker already owns; whichever worker dequeues it
    /// finds `active_users` occupied and returns immediately without
    /// running anything, while this worker blocks forever on the
    /// completion oneshot -- a deadlock. Running it inline instead reuses
    /// the `op:<user>` lock this worker already holds, matching §4.4's
    /// "runs the nested op to completion, then re-enters the outer op".
    ///
    /// A request for a *different* user has no such conflict -- that
    /// user's slot is free, so another worker can drain it -- and goes
    /// through the normal synchronous `create_and_execute` path.
    async fn run_nested_chain(self: &Arc<Self>, outer: &OpRow, nested: Vec<NestedOperationRequest>) -> Result<(), VfError> {
        for req in nested {
            if req.user_id == outer.user_id {
                self.run_nested_inline(req).await?;
            } else {
                self.create_and_execute(req.user_id, req.device_id, req.method, req.args, true).await?;
            }
        }
        Ok(())
    }

    /// Allocates an operation id and persists the `Operation` row for a
    /// nested request exactly as `create_and_execute` would, but drives it
    /// to resolution directly via `drive_operation` instead of enqueuing
    /// it -- see `run_nested_chain` for why same-user nested ops can't go
    /// through the fairness channel.
    async fn run_nested_inline(self: &Arc<Self>, req: NestedOperationRequest) -> Result<(), VfError> {
        if !KNOWN_METHODS.contains(&req.method.as_str()) {
            return Err(VfError::invalid_request(
                "UNKNOWN_OPERATION_METHOD",
                format!("{:?} is not a registered operation", req.method),
            ));
        }
        let local_id = self.store.bump_asset_id_seq(&req.user_id, 1).await?;
        let operation_id = construct_device_local_asset_id(IdPrefix::Operation, req.device_id, local_id);
        let mut op_row = OpRow::new(req.user_id, operation_id, req.device_id, req.method, req.args, self.clock.now());
        self.store.put_operation(&op_row).await?;
        self.drive_operation(&mut op_row).await
    }

    async fn handle_failure(self: &Arc<Self>, op_row: &mut OpRow, err: VfError) {
        if err.is_client_error() {
            warn!(error = %err, "operation failed with a client error after persistence, quarantining");
            op_row.quarantined = true;
            let _ = self.store.put_operation(op_row).await;
            self.complete(&op_row.user_id, &op_row.operation_id, Err(err));
            return;
        }

        op_row.attempts += 1;
        if op_row.attempts > self.config.quarantine_threshold {
            warn!(attempts = op_row.attempts, "operation exceeded retry budget, quarantining");
            op_row.quarantined = true;
            let _ = self.store.put_operation(op_row).await;
            self.complete(&op_row.user_id, &op_row.operation_id, Err(err));
            return;
        }

        let backoff = compute_backoff(op_row.attempts, self.config.max_backoff_secs);
        op_row.backoff_until = Some(self.clock.now() + backoff);
        if let Err(persist_err) = self.store.put_operation(op_row).await {
            warn!(error = %persist_err, "failed to persist backoff, operation will be retried immediately on next scan");
        }
        // Leave the synchronous waiter (if any) registered -- it resolves
        // only when the op finally completes or is quarantined, not on
        // every transient retry.
    }

    fn complete(&self, user_id: &UserId, op_id: &OperationId, result: Result<(), VfError>) {
        if let Some((_, senders)) = self.waiters.remove(&(user_id.clone(), op_id.clone())) {
            for tx in senders {
                let _ = tx.send(result.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_core::types::User;
    use vf_engine::failpoint::FailpointRegistry;
    use vf_kv::InMemoryKv;

    fn new_scheduler() -> Arc<Scheduler<InMemoryKv>> {
        let kv = Arc::new(InMemoryKv::new());
        let clock: SharedClock = Arc::new(TestClock::at_micros(0));
        let store = Arc::new(Store::new(kv.clone()));
        let lock_manager = Arc::new(LockManager::new(kv, clock.clone(), 60, 20));
        let executor = Arc::new(FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new())));
        Scheduler::new(store, lock_manager, executor, clock, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn rejects_unknown_methods_before_persisting_a_row() {
        let scheduler = new_scheduler();
        let err = scheduler
            .create_and_execute("u1".into(), 1, "not_a_real_method", serde_json::json!({}), false)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn synchronous_create_and_execute_drains_the_op_and_resolves() {
        let scheduler = new_scheduler();
        scheduler.store.put_user(&User::new("u1".into(), "v-priv".into(), 1)).await.unwrap();
        scheduler.spawn_workers(2);

        let args = serde_json::json!({ "device_id": 2, "push_token": "apns-prod:ab", "platform": "ios", "version": "1.0" });
        scheduler.create_and_execute("u1".into(), 1, "update_device", args, true).await.unwrap();

        let device = scheduler.store.get_device(&"u1".to_string(), 2).await.unwrap();
        assert!(device.is_some());
    }

    #[tokio::test]
    async fn two_ops_for_the_same_user_apply_in_submission_order() {
        let scheduler = new_scheduler();
        scheduler.store.put_user(&User::new("u1".into(), "v-priv".into(), 1)).await.unwrap();
        scheduler.spawn_workers(4);

        for version in ["v1", "v2", "v3"] {
            let args = serde_json::json!({ "device_id": 9, "version": version });
            scheduler.create_and_execute("u1".into(), 1, "update_device", args, true).await.unwrap();
        }
        let device = scheduler.store.get_device(&"u1".to_string(), 9).await.unwrap().unwrap();
        assert_eq!(device.version.as_deref(), Some("v3"));
    }

    /// §8 S6: `share_new`'s CHECK phase stops for a nested
    /// `register_prospective_user` targeting the *inviting* user itself
    /// (see `share_new.rs`), not the prospective contact. This reproduces
    /// the exact shape of that same-user nested chain -- `active_users`
    /// occupied for "u1" and the `op:u1` lock held, as `drain_user` would
    /// have it mid-drain -- and drives it through `run_nested_chain`
    /// (using `update_device` as a stand-in nested method, since any
    /// known method exercises the same inline-vs-enqueue control flow).
    /// Before the fix this deadlocked: the nested request re-entered the
    /// fairness channel, found `active_users` occupied, and returned
    /// without running, leaving the outer call blocked on its oneshot
    /// forever.
    #[tokio::test]
    async fn same_user_nested_request_runs_inline_instead_of_deadlocking() {
        let scheduler = new_scheduler();
        scheduler.store.put_user(&User::new("u1".into(), "v-priv".into(), 1)).await.unwrap();
        scheduler.spawn_workers(2);

        let notify = Arc::new(Notify::new());
        scheduler.active_users.insert("u1".into(), notify.clone());
        let lock_handle = scheduler
            .lock_manager
            .acquire(LockResourceType::Operation, "u1", &scheduler.owner_id, None)
            .await
            .unwrap();

        let outer = OpRow::new("u1".into(), "o:1:1".into(), 1, "share_new", serde_json::json!({}), scheduler.clock.now());
        let nested = vec![NestedOperationRequest {
            user_id: "u1".into(),
            device_id: 1,
            method: "update_device".to_string(),
            args: serde_json::json!({ "device_id": 7, "push_token": "apns-prod:ab", "platform": "ios", "version": "1.0" }),
        }];

        tokio::time::timeout(StdDuration::from_secs(5), scheduler.run_nested_chain(&outer, nested))
            .await
            .expect("same-user nested op must run inline rather than deadlock on the fairness channel")
            .unwrap();

        scheduler.lock_manager.release(&lock_handle).await;
        scheduler.active_users.remove(&"u1".to_string());
        notify.notify_waiters();

        let device = scheduler.store.get_device(&"u1".to_string(), 7).await.unwrap();
        assert!(device.is_some(), "nested op should have actually executed and persisted its effect");
    }
}
