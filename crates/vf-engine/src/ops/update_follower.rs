//! `update_follower` (§6, grounded on `backend/op/update_follower_op.py`).
//! Lets a follower adjust their own labels and/or viewed_seq; no ACCOUNT
//! phase, per the source's explicit comment. The viewed_seq ratchet is
//! load-bearing: a client retrying with a stale `viewed_seq` must never
//! regress what a later, already-applied call advanced it to.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{FollowerLabel, InvalidateSpec, InvalidateViewpoint, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFollowerArgs {
    pub viewpoint_id: ViewpointId,
    #[serde(default)]
    pub labels: Option<BTreeSet<FollowerLabel>>,
    #[serde(default)]
    pub viewed_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFollowerCheckpoint {
    labels: Option<BTreeSet<FollowerLabel>>,
    final_viewed_seq: Option<u64>,
}

pub struct UpdateFollowerHandler {
    args: UpdateFollowerArgs,
    clock: SharedClock,
}

impl UpdateFollowerHandler {
    pub fn new(args: UpdateFollowerArgs, clock: SharedClock) -> Self {
        UpdateFollowerHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UpdateFollowerHandler {
    type Checkpoint = UpdateFollowerCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;

        if let Some(labels) = &self.args.labels {
            // Validate against a throwaway clone -- CHECK must not persist.
            let mut probe = follower.clone();
            probe.set_labels(labels.clone())?;
        }

        let final_viewed_seq = self.args.viewed_seq.map(|requested| {
            let clamped = requested.min(viewpoint.update_seq);
            clamped.max(follower.viewed_seq)
        });

        Ok(CheckOutcome::Proceed(UpdateFollowerCheckpoint { labels: self.args.labels.clone(), final_viewed_seq }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        if let Some(labels) = &checkpoint.labels {
            follower.set_labels(labels.clone())?;
        }
        if let Some(viewed_seq) = checkpoint.final_viewed_seq {
            follower.advance_viewed_seq(viewed_seq, viewpoint.update_seq)?;
        }
        store.put_follower(&follower).await?;
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, _checkpoint: &Self::Checkpoint, _acc: &mut Accounting<C>) -> Result<(), VfError> {
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        let follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_followers: true, ..Default::default() }],
            ..Default::default()
        };
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "update_follower".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: self.clock.now(),
                invalidate,
                viewpoint_id: Some(self.args.viewpoint_id.clone()),
                activity_id: None,
                update_seq: None,
                viewed_seq: Some(checkpoint.final_viewed_seq.unwrap_or(follower.viewed_seq)),
                clear_badge: false,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_core::types::{Follower, Viewpoint, ViewpointType};
    use vf_kv::InMemoryKv;

    use crate::executor::FourPhaseExecutor;
    use crate::failpoint::FailpointRegistry;

    async fn seeded(update_seq: u64, viewed_seq: u64) -> Arc<Store<InMemoryKv>> {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store
            .put_viewpoint(&Viewpoint { viewpoint_id: "v1".into(), viewpoint_type: ViewpointType::Default, owner_id: "owner".into(), update_seq, title: None, cover_photo: None })
            .await
            .unwrap();
        store
            .put_follower(&Follower {
                user_id: "u1".into(),
                viewpoint_id: "v1".into(),
                labels: BTreeSet::from([FollowerLabel::Contribute]),
                viewed_seq,
                adding_user_id: None,
                timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("u1".into(), "o-1-1".into(), 1, "update_follower", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn viewed_seq_is_clamped_to_update_seq() {
        let store = seeded(5, 0).await;
        let args = UpdateFollowerArgs { viewpoint_id: "v1".into(), labels: None, viewed_seq: Some(9001) };
        let handler = UpdateFollowerHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        executor.execute(&handler, &mut row).await.unwrap();

        let f = store.require_follower(&"u1".to_string(), &"v1".to_string()).await.unwrap();
        assert_eq!(f.viewed_seq, 5);
    }

    #[tokio::test]
    async fn viewed_seq_never_regresses() {
        let store = seeded(10, 7).await;
        let args = UpdateFollowerArgs { viewpoint_id: "v1".into(), labels: None, viewed_seq: Some(2) };
        let handler = UpdateFollowerHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        executor.execute(&handler, &mut row).await.unwrap();

        let f = store.require_follower(&"u1".to_string(), &"v1".to_string()).await.unwrap();
        assert_eq!(f.viewed_seq, 7);
    }
}
