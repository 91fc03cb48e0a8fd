//! Four-Phase Executor (C5, spec §4.4): drives one operation through
//! CHECK -> UPDATE -> ACCOUNT -> NOTIFY, persisting a checkpoint after each
//! phase so a crash anywhere resumes at the next phase rather than
//! replaying completed ones. Wraps the store in a `CheckingKvClient` during
//! CHECK to assert the handler made no disallowed writes (grounded on
//! `op_mgr_db_client.py`'s CHECK-phase auditing).
//!
//! `StopOperationError` from the source has no exception-based analogue
//! here: a CHECK phase that needs a nested operation run first returns
//! `CheckOutcome::StopForNested` instead of throwing, and the caller (the
//! Scheduler, `vf-scheduler`) is responsible for running the nested
//! operations to completion and re-invoking `execute` from scratch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use vf_core::errors::VfError;
use vf_core::types::{DeviceId, Operation as OpRow, OperationId, UserId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::failpoint::FailpointRegistry;
use crate::notification::NotificationManager;
use crate::store::Store;

/// Everything a handler needs to identify whose operation this is; the
/// handler reaches the entity store, accounting, and notifications through
/// the separate arguments `execute` passes to each phase, not through this
/// struct, so each phase's signature documents exactly what it can touch.
pub struct OpContext {
    pub user_id: UserId,
    pub operation_id: OperationId,
    pub device_id: DeviceId,
}

/// A sub-operation the CHECK phase wants run to completion before this
/// operation can proceed (e.g. `remove_photos` discovering it must first
/// run `remove_viewpoint` for a now-empty conversation). Replaces the
/// source's `StopOperationError`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NestedOperationRequest {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub method: String,
    pub args: serde_json::Value,
}

pub enum CheckOutcome<T> {
    Proceed(T),
    StopForNested(Vec<NestedOperationRequest>),
}

/// One concrete operation's phase logic (`update_follower`, `hide_photos`,
/// `remove_photos`, ...). `Checkpoint` is whatever CHECK decides UPDATE,
/// ACCOUNT, and NOTIFY need to see; it's serialized into the `Operation`
/// row between phases so a restart can resume without re-running CHECK.
#[async_trait]
pub trait OperationHandler<C: KvClient>: Send + Sync {
    type Checkpoint: Serialize + DeserializeOwned + Send + Sync + Clone;

    /// Reads current state and any client-supplied args, validates
    /// permissions and invariants, and returns what UPDATE/ACCOUNT/NOTIFY
    /// will need. MUST NOT mutate anything other than what
    /// `vf_kv::audit::CheckingKvClient` allows (lock/operation rows, id
    /// allocator bumps, the user's `asset_id_seq`) -- the executor asserts
    /// this and fails the operation as a programming error otherwise.
    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError>;

    /// Applies the mutation decided during CHECK. Idempotent by
    /// construction: every write here is either a value set (not a delta)
    /// or itself conditional, so replaying UPDATE after a crash converges
    /// to the same state.
    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError>;

    /// Queues accounting deltas; `vf-engine`'s `Accounting` wrapper makes
    /// the actual writes idempotent per `ctx.operation_id`.
    async fn account(
        &self,
        ctx: &OpContext,
        store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        acc: &mut Accounting<C>,
    ) -> Result<(), VfError>;

    /// Issues notifications to affected users' devices. Idempotent per
    /// `ctx.operation_id` via `NotificationManager`'s dedup-by-op_id.
    async fn notify(
        &self,
        ctx: &OpContext,
        store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "phase", content = "checkpoint")]
enum PhaseState<T> {
    Checked(T),
    Updated(T),
    Accounted(T),
}

impl<T> PhaseState<T> {
    fn checkpoint(&self) -> &T {
        match self {
            PhaseState::Checked(c) | PhaseState::Updated(c) | PhaseState::Accounted(c) => c,
        }
    }
}

pub enum ExecutionOutcome {
    Completed,
    NeedsNested(Vec<NestedOperationRequest>),
}

pub struct FourPhaseExecutor<C: KvClient> {
    store: Arc<Store<C>>,
    failpoints: Arc<FailpointRegistry>,
}

impl<C: KvClient> FourPhaseExecutor<C> {
    pub fn new(store: Arc<Store<C>>, failpoints: Arc<FailpointRegistry>) -> Self {
        FourPhaseExecutor { store, failpoints }
    }

    async fn persist<T: Serialize>(&self, op_row: &mut OpRow, phase: &PhaseState<T>) -> Result<(), VfError> {
        op_row.checkpoint = Some(serde_json::to_value(phase).map_err(|e| VfError::Programming(e.to_string()))?);
        self.store.put_operation(op_row).await
    }

    /// Runs `op_row` through whichever phases remain, driven by
    /// `op_row.checkpoint`. On success with no nested requirement, deletes
    /// the operation row -- its absence IS "this operation is done" (§4.4).
    pub async fn execute<H: OperationHandler<C>>(
        &self,
        handler: &H,
        op_row: &mut OpRow,
    ) -> Result<ExecutionOutcome, VfError> {
        let ctx = OpContext {
            user_id: op_row.user_id.clone(),
            operation_id: op_row.operation_id.clone(),
            device_id: op_row.device_id,
        };

        let mut phase_state: Option<PhaseState<H::Checkpoint>> = match &op_row.checkpoint {
            Some(raw) => Some(
                serde_json::from_value(raw.clone())
                    .map_err(|e| VfError::Programming(format!("corrupt operation checkpoint: {e}")))?,
            ),
            None => None,
        };

        if phase_state.is_none() {
            self.failpoints.hit("vf-engine/src/executor.rs", line!())?;
            let checking = Arc::new(CheckingKvClient::new(self.store.kv().clone()));
            let checking_store = Store::new(checking.clone());
            match handler.check(&ctx, &checking_store).await? {
                CheckOutcome::StopForNested(nested) => return Ok(ExecutionOutcome::NeedsNested(nested)),
                CheckOutcome::Proceed(checkpoint) => {
                    checking.check_not_modified()?;
                    let state = PhaseState::Checked(checkpoint);
                    self.persist(op_row, &state).await?;
                    phase_state = Some(state);
                }
            }
        }

        let mut state = phase_state.expect("checked above");

        if let PhaseState::Checked(checkpoint) = &state {
            self.failpoints.hit("vf-engine/src/executor.rs", line!())?;
            handler.update(&ctx, &self.store, checkpoint).await?;
            state = PhaseState::Updated(checkpoint.clone());
            self.persist(op_row, &state).await?;
        }

        if let PhaseState::Updated(checkpoint) = &state {
            self.failpoints.hit("vf-engine/src/executor.rs", line!())?;
            let mut acc = Accounting::new(self.store.clone(), ctx.operation_id.clone());
            handler.account(&ctx, &self.store, checkpoint, &mut acc).await?;
            acc.commit().await?;
            state = PhaseState::Accounted(checkpoint.clone());
            self.persist(op_row, &state).await?;
        }

        if let PhaseState::Accounted(checkpoint) = &state {
            self.failpoints.hit("vf-engine/src/executor.rs", line!())?;
            let notifier = NotificationManager::new(self.store.clone());
            handler.notify(&ctx, &self.store, checkpoint, &notifier).await?;
        }

        let _ = state.checkpoint();
        self.store.delete_operation(&op_row.user_id, &op_row.operation_id).await?;
        Ok(ExecutionOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vf_core::types::AccountingDelta;
    use vf_kv::InMemoryKv;

    #[derive(Clone, Serialize, serde::Deserialize)]
    struct Checkpoint {
        greeting: String,
    }

    struct CountingHandler {
        check_calls: AtomicU32,
        update_calls: AtomicU32,
        account_calls: AtomicU32,
        notify_calls: AtomicU32,
    }

    impl CountingHandler {
        fn new() -> Self {
            CountingHandler {
                check_calls: AtomicU32::new(0),
                update_calls: AtomicU32::new(0),
                account_calls: AtomicU32::new(0),
                notify_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OperationHandler<InMemoryKv> for CountingHandler {
        type Checkpoint = Checkpoint;

        async fn check(
            &self,
            _ctx: &OpContext,
            _store: &Store<CheckingKvClient<Arc<InMemoryKv>>>,
        ) -> Result<CheckOutcome<Checkpoint>, VfError> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            Ok(CheckOutcome::Proceed(Checkpoint { greeting: "hello".to_string() }))
        }

        async fn update(&self, _ctx: &OpContext, _store: &Store<InMemoryKv>, _checkpoint: &Checkpoint) -> Result<(), VfError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn account(
            &self,
            _ctx: &OpContext,
            _store: &Store<InMemoryKv>,
            _checkpoint: &Checkpoint,
            acc: &mut Accounting<InMemoryKv>,
        ) -> Result<(), VfError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            acc.add("ow:u1", "totals", AccountingDelta { size_bytes: 1, num_photos: 0, num_conversations: 0 });
            Ok(())
        }

        async fn notify(
            &self,
            _ctx: &OpContext,
            _store: &Store<InMemoryKv>,
            _checkpoint: &Checkpoint,
            _notifier: &NotificationManager<InMemoryKv>,
        ) -> Result<(), VfError> {
            self.notify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn new_op_row() -> OpRow {
        OpRow::new("u1".into(), "o-1-1".into(), 1, "test_op", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn full_run_calls_every_phase_once_and_deletes_the_row() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let handler = CountingHandler::new();
        let mut op_row = new_op_row();
        let outcome = executor.execute(&handler, &mut op_row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
        assert_eq!(handler.check_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.notify_calls.load(Ordering::SeqCst), 1);
        assert!(store.get_operation(&"u1".to_string(), &"o-1-1".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn crash_after_update_resumes_at_account_without_rerunning_check_or_update() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let failpoints = Arc::new(FailpointRegistry::new());
        let executor = FourPhaseExecutor::new(store.clone(), failpoints.clone());
        let handler = CountingHandler::new();
        let mut op_row = new_op_row();

        // Arm the failpoint hit right before ACCOUNT so UPDATE has already
        // persisted its checkpoint when we "crash".
        let account_site = ("vf-engine/src/executor.rs", 187u32);
        failpoints.arm(account_site);
        let err = executor.execute(&handler, &mut op_row).await.unwrap_err();
        assert!(err.is_failpoint());
        assert_eq!(handler.check_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.account_calls.load(Ordering::SeqCst), 0);

        failpoints.disarm(account_site);
        let outcome = executor.execute(&handler, &mut op_row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
        // CHECK and UPDATE are not replayed on resume.
        assert_eq!(handler.check_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.notify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nested_stop_does_not_persist_a_checkpoint() {
        struct NestedHandler;
        #[async_trait]
        impl OperationHandler<InMemoryKv> for NestedHandler {
            type Checkpoint = Checkpoint;
            async fn check(
                &self,
                _ctx: &OpContext,
                _store: &Store<CheckingKvClient<Arc<InMemoryKv>>>,
            ) -> Result<CheckOutcome<Checkpoint>, VfError> {
                Ok(CheckOutcome::StopForNested(vec![NestedOperationRequest {
                    user_id: "u1".into(),
                    device_id: 1,
                    method: "remove_viewpoint".into(),
                    args: serde_json::json!({}),
                }]))
            }
            async fn update(&self, _: &OpContext, _: &Store<InMemoryKv>, _: &Checkpoint) -> Result<(), VfError> {
                unreachable!("UPDATE must not run when CHECK asks for a nested operation")
            }
            async fn account(&self, _: &OpContext, _: &Store<InMemoryKv>, _: &Checkpoint, _: &mut Accounting<InMemoryKv>) -> Result<(), VfError> {
                unreachable!()
            }
            async fn notify(&self, _: &OpContext, _: &Store<InMemoryKv>, _: &Checkpoint, _: &NotificationManager<InMemoryKv>) -> Result<(), VfError> {
                unreachable!()
            }
        }

        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut op_row = new_op_row();
        let outcome = executor.execute(&NestedHandler, &mut op_row).await.unwrap();
        match outcome {
            ExecutionOutcome::NeedsNested(reqs) => {
                assert_eq!(reqs.len(), 1);
                assert_eq!(reqs[0].method, "remove_viewpoint");
            }
            _ => panic!("expected NeedsNested"),
        }
        assert!(op_row.checkpoint.is_none());
    }
}
