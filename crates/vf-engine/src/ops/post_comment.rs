//! `post_comment` (§6). No surviving `post_comment_op.py` in the retrieved
//! source pack; built directly from §6/§8's description of the comment
//! surface, in the same CHECK-reserves-ids / UPDATE-writes-then-bumps-seq
//! shape `upload_episode` and `share_new` use.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use vf_core::asset_id::{construct_timestamp_asset_id, IdPrefix, LocalId};
use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{Activity, Comment, InvalidateSpec, InvalidateViewpoint, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentArgs {
    pub viewpoint_id: ViewpointId,
    pub message: String,
    #[serde(default)]
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentCheckpoint {
    comment_id: String,
    activity_id: String,
    timestamp: DateTime<Utc>,
}

pub struct PostCommentHandler {
    args: PostCommentArgs,
    clock: SharedClock,
}

impl PostCommentHandler {
    pub fn new(args: PostCommentArgs, clock: SharedClock) -> Self {
        PostCommentHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for PostCommentHandler {
    type Checkpoint = PostCommentCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let follower = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        if follower.is_removed() {
            return Err(VfError::permission(
                vf_core::errors::error_ids::NO_FOLLOWER,
                "removed followers cannot comment",
            ));
        }
        let first = store.bump_asset_id_seq(&ctx.user_id, 2).await?;
        let timestamp = self.clock.now();
        let timestamp_seconds = timestamp.timestamp().max(0) as u64;
        let comment_id = construct_timestamp_asset_id(IdPrefix::Comment, timestamp_seconds, ctx.device_id, &LocalId::Int(first), false);
        let activity_id = construct_timestamp_asset_id(IdPrefix::Activity, timestamp_seconds, ctx.device_id, &LocalId::Int(first + 1), false);
        Ok(CheckOutcome::Proceed(PostCommentCheckpoint { comment_id, activity_id, timestamp }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        store
            .put_comment(&Comment {
                viewpoint_id: self.args.viewpoint_id.clone(),
                comment_id: checkpoint.comment_id.clone(),
                user_id: ctx.user_id.clone(),
                timestamp: checkpoint.timestamp,
                message: self.args.message.clone(),
                asset_id: self.args.asset_id.clone(),
            })
            .await?;
        store
            .put_activity(&Activity {
                viewpoint_id: self.args.viewpoint_id.clone(),
                activity_id: checkpoint.activity_id.clone(),
                user_id: ctx.user_id.clone(),
                timestamp: checkpoint.timestamp,
                name: "post_comment".to_string(),
                json: serde_json::json!({ "comment_id": checkpoint.comment_id }),
            })
            .await?;
        let mut viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        viewpoint.bump_update_seq();
        store.put_viewpoint(&viewpoint).await?;
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
        let followers = store.query_followers(&self.args.viewpoint_id).await?;
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        for follower in followers.iter().filter(|f| !f.is_removed()) {
            let invalidate = InvalidateSpec {
                viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_comments: true, get_activities: true, ..Default::default() }],
                ..Default::default()
            };
            notifier
                .notify(NewNotification {
                    user_id: follower.user_id.clone(),
                    name: "post_comment".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: checkpoint.timestamp,
                    invalidate,
                    viewpoint_id: Some(self.args.viewpoint_id.clone()),
                    activity_id: Some(checkpoint.activity_id.clone()),
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
    use std::collections::BTreeSet;
    use vf_core::clock::TestClock;
    use vf_core::types::{Follower, FollowerLabel, Viewpoint, ViewpointType};
    use vf_kv::InMemoryKv;

    use crate::executor::FourPhaseExecutor;
    use crate::failpoint::FailpointRegistry;

    async fn seeded() -> Arc<Store<InMemoryKv>> {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store
            .put_viewpoint(&Viewpoint { viewpoint_id: "v1".into(), viewpoint_type: ViewpointType::Default, owner_id: "u1".into(), update_seq: 0, title: None, cover_photo: None })
            .await
            .unwrap();
        for (user, labels) in [("u1", BTreeSet::from([FollowerLabel::Admin])), ("u2", BTreeSet::from([FollowerLabel::Contribute]))] {
            store
                .put_follower(&Follower { user_id: user.into(), viewpoint_id: "v1".into(), labels, viewed_seq: 0, adding_user_id: None, timestamp: chrono::Utc::now() })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn posting_a_comment_notifies_every_follower_and_bumps_update_seq() {
        let store = seeded().await;
        let args = PostCommentArgs { viewpoint_id: "v1".into(), message: "hi".into(), asset_id: None };
        let handler = PostCommentHandler::new(args, Arc::new(TestClock::at_micros(1_700_000_000_000_000)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = vf_core::types::Operation::new("u1".into(), "o-1-1".into(), 1, "post_comment", serde_json::json!({}), chrono::Utc::now());
        executor.execute(&handler, &mut row).await.unwrap();

        let viewpoint = store.require_viewpoint(&"v1".to_string()).await.unwrap();
        assert_eq!(viewpoint.update_seq, 1);
        assert!(store.get_notification(&"u1".to_string(), 1).await.unwrap().is_some());
        assert!(store.get_notification(&"u2".to_string(), 1).await.unwrap().is_some());
    }
}
