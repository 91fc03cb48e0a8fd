//! `remove_viewpoint` (§6, grounded on `backend/op/remove_viewpoint_op.py`).
//! Marks the caller's own follower row removed; the viewpoint and its
//! content are untouched for everyone else. The source's CHECK phase
//! short-circuits the whole operation (`raise gen.Return(False)`) when the
//! follower is already removed -- our `CheckOutcome` has no early-stop
//! variant for "nothing to do", so CHECK instead checkpoints `skip: true`
//! and every later phase becomes a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{accounting_scope, AccountingDelta, FollowerLabel, InvalidateSpec, InvalidateViewpoint, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveViewpointArgs {
    pub viewpoint_id: ViewpointId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveViewpointCheckpoint {
    skip: bool,
}

pub struct RemoveViewpointHandler {
    args: RemoveViewpointArgs,
    clock: SharedClock,
}

impl RemoveViewpointHandler {
    pub fn new(args: RemoveViewpointArgs, clock: SharedClock) -> Self {
        RemoveViewpointHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for RemoveViewpointHandler {
    type Checkpoint = RemoveViewpointCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        Ok(CheckOutcome::Proceed(RemoveViewpointCheckpoint { skip: follower.is_removed() }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        if checkpoint.skip {
            return Ok(());
        }
        let mut follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        let mut labels = follower.labels.clone();
        labels.insert(FollowerLabel::Removed);
        follower.labels = labels;
        store.put_follower(&follower).await?;
        Ok(())
    }

    async fn account(&self, ctx: &OpContext, _store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        if checkpoint.skip {
            return Ok(());
        }
        acc.add(
            accounting_scope::owned_by(&ctx.user_id),
            "totals",
            AccountingDelta { size_bytes: 0, num_photos: 0, num_conversations: -1 },
        );
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        _store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        if checkpoint.skip {
            return Ok(());
        }
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_followers: true, ..Default::default() }],
            ..Default::default()
        };
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "remove_viewpoint".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: self.clock.now(),
                invalidate,
                viewpoint_id: Some(self.args.viewpoint_id.clone()),
                activity_id: None,
                update_seq: None,
                viewed_seq: None,
                clear_badge: false,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use vf_core::clock::TestClock;
    use vf_core::types::Follower;
    use vf_kv::InMemoryKv;

    use crate::executor::FourPhaseExecutor;
    use crate::failpoint::FailpointRegistry;

    fn follower(removed: bool) -> Follower {
        let mut labels = BTreeSet::new();
        labels.insert(if removed { FollowerLabel::Removed } else { FollowerLabel::Contribute });
        Follower { user_id: "u1".into(), viewpoint_id: "v1".into(), labels, viewed_seq: 0, adding_user_id: None, timestamp: chrono::Utc::now() }
    }

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("u1".into(), "o-1-1".into(), 1, "remove_viewpoint", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn removing_an_active_follower_sets_removed_and_decrements_conversations() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_follower(&follower(false)).await.unwrap();
        let args = RemoveViewpointArgs { viewpoint_id: "v1".into() };
        let handler = RemoveViewpointHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        executor.execute(&handler, &mut row).await.unwrap();

        let f = store.require_follower(&"u1".to_string(), &"v1".to_string()).await.unwrap();
        assert!(f.is_removed());
        let counters = store.get_accounting(&accounting_scope::owned_by(&"u1".to_string()), "totals").await.unwrap();
        assert_eq!(counters.num_conversations, -1);
    }

    #[tokio::test]
    async fn removing_an_already_removed_follower_is_a_pure_no_op() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_follower(&follower(true)).await.unwrap();
        let args = RemoveViewpointArgs { viewpoint_id: "v1".into() };
        let handler = RemoveViewpointHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        executor.execute(&handler, &mut row).await.unwrap();

        let counters = store.get_accounting(&accounting_scope::owned_by(&"u1".to_string()), "totals").await.unwrap();
        assert_eq!(counters.num_conversations, 0);
        assert!(store.get_notification(&"u1".to_string(), 1).await.unwrap().is_none());
    }
}
