//! `remove_followers` (§6, grounded on `backend/op/remove_viewpoint_op.py`'s
//! follower-mutation shape and `backend/op/update_follower_op.py`'s
//! admin-permission check). An admin strips other users' Follower rows
//! from a viewpoint -- the
//! counterpart to `add_followers`, and distinct from `remove_viewpoint`
//! (which only ever removes the caller's own Follower row). Removed
//! followers that were never `admin`/`contribute`/`personal`-less are
//! marked `removed` (and `unrevivable`, matching the source's policy that
//! an admin-initiated removal cannot be silently re-added by a later
//! `add_followers` call) rather than deleted outright, so viewed_seq
//! history and accounting remain attributable.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{accounting_scope, AccountingDelta, FollowerLabel, InvalidateSpec, InvalidateViewpoint, UserId, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFollowersArgs {
    pub viewpoint_id: ViewpointId,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFollowersCheckpoint {
    removed: Vec<UserId>,
    timestamp: DateTime<Utc>,
}

pub struct RemoveFollowersHandler {
    args: RemoveFollowersArgs,
    clock: SharedClock,
}

impl RemoveFollowersHandler {
    pub fn new(args: RemoveFollowersArgs, clock: SharedClock) -> Self {
        RemoveFollowersHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for RemoveFollowersHandler {
    type Checkpoint = RemoveFollowersCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let caller = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        if caller.is_removed() || !caller.labels.contains(&FollowerLabel::Admin) {
            return Err(VfError::permission(error_ids::NO_FOLLOWER, "caller is not an admin of this viewpoint"));
        }
        if self.args.user_ids.iter().any(|u| u == &ctx.user_id) {
            return Err(VfError::invalid_request(error_ids::CANNOT_REMOVE_SELF, "use remove_viewpoint to remove yourself"));
        }

        let mut removed = Vec::new();
        for user_id in &self.args.user_ids {
            match store.get_follower(user_id, &self.args.viewpoint_id).await? {
                Some(f) if !f.is_removed() => removed.push(user_id.clone()),
                _ => {}
            }
        }
        Ok(CheckOutcome::Proceed(RemoveFollowersCheckpoint { removed, timestamp: self.clock.now() }))
    }

    async fn update(&self, _ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        if checkpoint.removed.is_empty() {
            return Ok(());
        }
        for user_id in &checkpoint.removed {
            if let Some(mut follower) = store.get_follower(user_id, &self.args.viewpoint_id).await? {
                follower.labels = BTreeSet::from([FollowerLabel::Removed, FollowerLabel::Unrevivable]);
                store.put_follower(&follower).await?;
            }
        }
        let mut viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        viewpoint.bump_update_seq();
        store.put_viewpoint(&viewpoint).await?;
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        for user_id in &checkpoint.removed {
            acc.add(accounting_scope::owned_by(user_id), "totals", AccountingDelta { size_bytes: 0, num_photos: 0, num_conversations: -1 });
        }
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        if checkpoint.removed.is_empty() {
            return Ok(());
        }
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        let remaining = store.query_followers(&self.args.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_followers: true, ..Default::default() }],
            ..Default::default()
        };

        // Every removed user gets a notification describing their own loss
        // of access (their client drops the viewpoint from its local store).
        for user_id in &checkpoint.removed {
            notifier
                .notify(NewNotification {
                    user_id: user_id.clone(),
                    name: "remove_followers".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: checkpoint.timestamp,
                    invalidate: invalidate.clone(),
                    viewpoint_id: Some(self.args.viewpoint_id.clone()),
                    activity_id: None,
                    update_seq: None,
                    viewed_seq: None,
                    clear_badge: false,
                })
                .await?;
        }
        // Remaining followers refresh their follower list too.
        for follower in remaining.iter().filter(|f| !f.is_removed() && !checkpoint.removed.contains(&f.user_id)) {
            notifier
                .notify(NewNotification {
                    user_id: follower.user_id.clone(),
                    name: "remove_followers".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: checkpoint.timestamp,
                    invalidate: invalidate.clone(),
                    viewpoint_id: Some(self.args.viewpoint_id.clone()),
                    activity_id: None,
                    update_seq: Some(viewpoint.update_seq),
                    viewed_seq: None,
                    clear_badge: false,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_core::types::{Follower, Viewpoint, ViewpointType};
    use vf_kv::InMemoryKv;

    use crate::executor::{ExecutionOutcome, FourPhaseExecutor};
    use crate::failpoint::FailpointRegistry;

    async fn seeded() -> Arc<Store<InMemoryKv>> {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store
            .put_viewpoint(&Viewpoint { viewpoint_id: "v1".into(), viewpoint_type: ViewpointType::Event, owner_id: "1".into(), update_seq: 0, title: None, cover_photo: None })
            .await
            .unwrap();
        for (id, labels) in [("1", BTreeSet::from([FollowerLabel::Admin])), ("2", BTreeSet::from([FollowerLabel::Contribute])), ("3", BTreeSet::from([FollowerLabel::Contribute]))] {
            store
                .put_follower(&Follower { user_id: id.into(), viewpoint_id: "v1".into(), labels, viewed_seq: 0, adding_user_id: None, timestamp: chrono::Utc::now() })
                .await
                .unwrap();
        }
        store
    }

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("1".into(), "o-1-1".into(), 1, "remove_followers", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn admin_removes_a_follower_and_bumps_update_seq() {
        let store = seeded().await;
        let args = RemoveFollowersArgs { viewpoint_id: "v1".into(), user_ids: vec!["2".into()] };
        let handler = RemoveFollowersHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));

        let f = store.require_follower(&"2".to_string(), &"v1".to_string()).await.unwrap();
        assert!(f.is_removed());
        assert!(f.labels.contains(&FollowerLabel::Unrevivable));
        let viewpoint = store.require_viewpoint(&"v1".to_string()).await.unwrap();
        assert_eq!(viewpoint.update_seq, 1);
        assert!(store.get_notification(&"2".to_string(), 1).await.unwrap().is_some());
        assert!(store.get_notification(&"3".to_string(), 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn non_admin_caller_is_rejected() {
        let store = seeded().await;
        let args = RemoveFollowersArgs { viewpoint_id: "v1".into(), user_ids: vec!["3".into()] };
        let handler = RemoveFollowersHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = vf_core::types::Operation::new("2".into(), "o-2-1".into(), 2, "remove_followers", serde_json::json!({}), chrono::Utc::now());
        let err = executor.execute(&handler, &mut row).await.unwrap_err();
        assert_eq!(err.client_id(), Some(error_ids::NO_FOLLOWER));
    }

    #[tokio::test]
    async fn removing_self_is_rejected() {
        let store = seeded().await;
        let args = RemoveFollowersArgs { viewpoint_id: "v1".into(), user_ids: vec!["1".into()] };
        let handler = RemoveFollowersHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let err = executor.execute(&handler, &mut row).await.unwrap_err();
        assert_eq!(err.client_id(), Some(error_ids::CANNOT_REMOVE_SELF));
    }
}
