//! `remove_photos` (§6, §8 S4, grounded on `backend/op/remove_photos_op.py`).
//! Removes photos from the caller's own private library. Unlike
//! `hide_photos`, this mutates the shared `Post` row (the photo disappears
//! for everyone who can see that post) and carries an ACCOUNT phase, so
//! it's only allowed against episodes in the caller's own private
//! viewpoint (S4) -- removing from a shared conversation is `unshare`'s job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{AccountingDelta, InvalidateEpisode, InvalidateSpec, accounting_scope};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::ops::common::{EpisodePhotoIds, PostKey};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePhotosArgs {
    pub episodes: Vec<EpisodePhotoIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePhotosCheckpoint {
    remove_keys: Vec<PostKey>,
}

pub struct RemovePhotosHandler {
    args: RemovePhotosArgs,
    clock: SharedClock,
}

impl RemovePhotosHandler {
    pub fn new(args: RemovePhotosArgs, clock: SharedClock) -> Self {
        RemovePhotosHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for RemovePhotosHandler {
    type Checkpoint = RemovePhotosCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let user = store.require_user(&ctx.user_id).await?;
        let mut remove_keys = Vec::new();
        for ep in &self.args.episodes {
            let episode = store.require_episode(&ep.episode_id).await?;
            if episode.viewpoint_id != user.private_vp_id {
                return Err(VfError::permission(
                    error_ids::INVALID_REMOVE_PHOTOS_VIEWPOINT,
                    format!("photos can only be removed from the caller's private viewpoint, not {}", episode.viewpoint_id),
                ));
            }
            for photo_id in &ep.photo_ids {
                let post = store.require_post(&ep.episode_id, photo_id).await?;
                if !post.removed {
                    remove_keys.push(PostKey { episode_id: ep.episode_id.clone(), photo_id: photo_id.clone() });
                }
            }
        }
        Ok(CheckOutcome::Proceed(RemovePhotosCheckpoint { remove_keys }))
    }

    async fn update(&self, _ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        for key in &checkpoint.remove_keys {
            let mut post = store.require_post(&key.episode_id, &key.photo_id).await?;
            post.removed = true;
            store.put_post(&post).await?;
        }
        Ok(())
    }

    async fn account(&self, ctx: &OpContext, _store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        if checkpoint.remove_keys.is_empty() {
            return Ok(());
        }
        let delta = AccountingDelta { size_bytes: 0, num_photos: -(checkpoint.remove_keys.len() as i64), num_conversations: 0 };
        acc.add(accounting_scope::owned_by(&ctx.user_id), "totals", delta);
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        _store: &Store<C>,
        checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        if checkpoint.remove_keys.is_empty() {
            return Ok(());
        }
        let invalidate = InvalidateSpec {
            episodes: self.args.episodes.iter().map(|ep| InvalidateEpisode { episode_id: ep.episode_id.clone() }).collect(),
            ..Default::default()
        };
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "remove_photos".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: self.clock.now(),
                invalidate,
                viewpoint_id: None,
                activity_id: None,
                update_seq: None,
                viewed_seq: None,
                clear_badge: false,
            })
            .await?;
        Ok(())
    }
}
