//! `hide_photos` (§6, grounded on `backend/op/hide_photos_op.py`). Flips a
//! purely personal label: no ACCOUNT phase, because hiding a photo from
//! one user's own library changes nothing anyone else can see or that
//! counts against anyone's storage.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::asset_id::construct_post_id;
use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{InvalidateEpisode, InvalidateSpec, UserPost};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::ops::common::EpisodePhotoIds;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidePhotosArgs {
    pub episodes: Vec<EpisodePhotoIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidePhotosCheckpoint {
    post_ids: Vec<String>,
}

pub struct HidePhotosHandler {
    args: HidePhotosArgs,
    clock: SharedClock,
}

impl HidePhotosHandler {
    pub fn new(args: HidePhotosArgs, clock: SharedClock) -> Self {
        HidePhotosHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for HidePhotosHandler {
    type Checkpoint = HidePhotosCheckpoint;

    async fn check(
        &self,
        _ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let mut post_ids = Vec::new();
        for ep in &self.args.episodes {
            store.require_episode(&ep.episode_id).await?;
            for photo_id in &ep.photo_ids {
                post_ids.push(construct_post_id(&ep.episode_id, photo_id)?);
            }
        }
        Ok(CheckOutcome::Proceed(HidePhotosCheckpoint { post_ids }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        for post_id in &checkpoint.post_ids {
            let mut user_post = store
                .get_user_post(&ctx.user_id, post_id)
                .await?
                .unwrap_or_else(|| UserPost { user_id: ctx.user_id.clone(), post_id: post_id.clone(), hidden: false });
            user_post.hidden = true;
            store.put_user_post(&user_post).await?;
        }
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, _checkpoint: &Self::Checkpoint, _acc: &mut Accounting<C>) -> Result<(), VfError> {
        Ok(())
    }

    async fn notify(
        &self,
        ctx: &OpContext,
        _store: &Store<C>,
        _checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        let invalidate = InvalidateSpec {
            episodes: self.args.episodes.iter().map(|ep| InvalidateEpisode { episode_id: ep.episode_id.clone() }).collect(),
            ..Default::default()
        };
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "hide_photos".to_string(),
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
