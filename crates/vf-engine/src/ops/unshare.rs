//! `unshare` (§6, §8 S3, grounded on `backend/op/unshare_op.py`). Revokes
//! previously-shared photos from a conversation the caller contributed to:
//! unlike `hide_photos` (personal-only) this flips the shared `Post` row, so
//! every follower loses the photo and the sharer's `sb:<user>:<vp>`
//! accounting shrinks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{accounting_scope, AccountingDelta, InvalidateSpec, InvalidateViewpoint, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::ops::common::{EpisodePhotoIds, PostKey};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnshareArgs {
    pub viewpoint_id: ViewpointId,
    pub episodes: Vec<EpisodePhotoIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnshareCheckpoint {
    unshare_keys: Vec<PostKey>,
}

pub struct UnshareHandler {
    args: UnshareArgs,
    clock: SharedClock,
}

impl UnshareHandler {
    pub fn new(args: UnshareArgs, clock: SharedClock) -> Self {
        UnshareHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UnshareHandler {
    type Checkpoint = UnshareCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        let mut unshare_keys = Vec::new();
        for ep in &self.args.episodes {
            let episode = store.require_episode(&ep.episode_id).await?;
            if episode.viewpoint_id != self.args.viewpoint_id {
                return Err(VfError::invalid_request("NO_EPISODE", format!("episode {} is not part of viewpoint {}", ep.episode_id, self.args.viewpoint_id)));
            }
            for photo_id in &ep.photo_ids {
                let post = store.require_post(&ep.episode_id, photo_id).await?;
                if !post.unshared {
                    unshare_keys.push(PostKey { episode_id: ep.episode_id.clone(), photo_id: photo_id.clone() });
                }
            }
        }
        Ok(CheckOutcome::Proceed(UnshareCheckpoint { unshare_keys }))
    }

    async fn update(&self, _ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        for key in &checkpoint.unshare_keys {
            let mut post = store.require_post(&key.episode_id, &key.photo_id).await?;
            post.unshared = true;
            post.removed = true;
            store.put_post(&post).await?;
        }
        Ok(())
    }

    async fn account(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        if checkpoint.unshare_keys.is_empty() {
            return Ok(());
        }
        let mut num_photos = 0i64;
        let mut size_bytes = 0i64;
        for key in &checkpoint.unshare_keys {
            if let Some(photo) = store.get_photo(&key.photo_id).await? {
                num_photos += 1;
                size_bytes += photo.size_bytes.unwrap_or(0);
            }
        }
        let delta = AccountingDelta { size_bytes: -size_bytes, num_photos: -num_photos, num_conversations: 0 };
        acc.add(accounting_scope::shared_by(&ctx.user_id, &self.args.viewpoint_id), "totals", delta);
        acc.add(accounting_scope::visible_in(&self.args.viewpoint_id), "totals", delta);
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        if checkpoint.unshare_keys.is_empty() {
            return Ok(());
        }
        let followers = store.query_followers(&self.args.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_activities: true, get_episodes: true, ..Default::default() }],
            ..Default::default()
        };
        for follower in followers.iter().filter(|f| !f.is_removed()) {
            notifier
                .notify(NewNotification {
                    user_id: follower.user_id.clone(),
                    name: "unshare".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: self.clock.now(),
                    invalidate: invalidate.clone(),
                    viewpoint_id: Some(self.args.viewpoint_id.clone()),
                    activity_id: None,
                    update_seq: None,
                    viewed_seq: None,
                    clear_badge: false,
                })
                .await?;
        }
        Ok(())
    }
}
