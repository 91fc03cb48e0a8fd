//! `upload_episode` (§6, grounded on `backend/op/upload_episode_op.py`).
//! Creates an Episode and its Posts/Photos in the caller's own private
//! viewpoint. The client has already minted `episode_id`/`photo_id`s via
//! `allocate_ids` (C8's direct, non-operation fast path) before submitting
//! this op, so CHECK only needs to validate ownership and idempotently skip
//! photos it has already written on an earlier, crashed attempt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{accounting_scope, AccountingDelta, Episode, EpisodeId, InvalidateEpisode, InvalidateSpec, Photo, PhotoId, Post};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoUpload {
    pub photo_id: PhotoId,
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadEpisodeArgs {
    pub episode_id: EpisodeId,
    #[serde(default)]
    pub title: Option<String>,
    pub photos: Vec<PhotoUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadEpisodeCheckpoint {
    episode_is_new: bool,
    new_photos: Vec<PhotoUpload>,
}

pub struct UploadEpisodeHandler {
    args: UploadEpisodeArgs,
    clock: SharedClock,
}

impl UploadEpisodeHandler {
    pub fn new(args: UploadEpisodeArgs, clock: SharedClock) -> Self {
        UploadEpisodeHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UploadEpisodeHandler {
    type Checkpoint = UploadEpisodeCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let user = store.require_user(&ctx.user_id).await?;
        let episode_is_new = store.get_episode(&self.args.episode_id).await?.is_none();

        let mut new_photos = Vec::new();
        for photo in &self.args.photos {
            if store.get_photo(&photo.photo_id).await?.is_none() {
                new_photos.push(photo.clone());
            }
        }
        // Unused in CHECK beyond validation -- UPDATE re-derives the private
        // viewpoint id from the user row rather than trusting a checkpoint
        // copy of it, since the user row cannot change between phases.
        let _ = &user.private_vp_id;

        Ok(CheckOutcome::Proceed(UploadEpisodeCheckpoint { episode_is_new, new_photos }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let user = store.require_user(&ctx.user_id).await?;
        if checkpoint.episode_is_new {
            store
                .put_episode(&Episode {
                    episode_id: self.args.episode_id.clone(),
                    user_id: ctx.user_id.clone(),
                    viewpoint_id: user.private_vp_id.clone(),
                    timestamp: self.clock.now(),
                    title: self.args.title.clone(),
                })
                .await?;
        }
        for photo in &checkpoint.new_photos {
            store
                .put_photo(&Photo {
                    photo_id: photo.photo_id.clone(),
                    user_id: ctx.user_id.clone(),
                    aspect_ratio: photo.aspect_ratio,
                    content_type: photo.content_type.clone(),
                    size_bytes: photo.size_bytes,
                })
                .await?;
            store
                .put_post(&Post {
                    episode_id: self.args.episode_id.clone(),
                    photo_id: photo.photo_id.clone(),
                    unshared: false,
                    removed: false,
                })
                .await?;
        }
        Ok(())
    }

    async fn account(&self, ctx: &OpContext, _store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        if checkpoint.new_photos.is_empty() {
            return Ok(());
        }
        let size_bytes: i64 = checkpoint.new_photos.iter().filter_map(|p| p.size_bytes).sum();
        acc.add(
            accounting_scope::owned_by(&ctx.user_id),
            "totals",
            AccountingDelta { size_bytes, num_photos: checkpoint.new_photos.len() as i64, num_conversations: 0 },
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
        if !checkpoint.episode_is_new && checkpoint.new_photos.is_empty() {
            return Ok(());
        }
        let invalidate = InvalidateSpec {
            episodes: vec![InvalidateEpisode { episode_id: self.args.episode_id.clone() }],
            ..Default::default()
        };
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "upload_episode".to_string(),
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
