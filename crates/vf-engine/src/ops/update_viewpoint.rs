//! `update_viewpoint` (§6, grounded on `backend/op/update_follower_op.py`'s
//! single-row-attribute-update shape). Changes a viewpoint's
//! `title`/`cover_photo`; an admin- or contribute-labeled follower may
//! call it, mirroring `post_comment`'s permission check rather than
//! `remove_followers`'s admin-only one.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{FollowerLabel, InvalidateSpec, InvalidateViewpoint, PhotoId, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateViewpointArgs {
    pub viewpoint_id: ViewpointId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cover_photo: Option<PhotoId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateViewpointCheckpoint {
    title: Option<String>,
    cover_photo: Option<PhotoId>,
}

pub struct UpdateViewpointHandler {
    args: UpdateViewpointArgs,
    clock: SharedClock,
}

impl UpdateViewpointHandler {
    pub fn new(args: UpdateViewpointArgs, clock: SharedClock) -> Self {
        UpdateViewpointHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UpdateViewpointHandler {
    type Checkpoint = UpdateViewpointCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let caller = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        if caller.is_removed() || !caller.labels.iter().any(|l| matches!(l, FollowerLabel::Admin | FollowerLabel::Contribute)) {
            return Err(VfError::permission(error_ids::VIEWPOINT_NOT_EDITABLE, "caller cannot edit this viewpoint"));
        }
        // A system viewpoint (e.g. a per-user default) carries no shared
        // title/cover metadata worth editing.
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        if matches!(viewpoint.viewpoint_type, vf_core::types::ViewpointType::System) {
            return Err(VfError::permission(error_ids::VIEWPOINT_NOT_EDITABLE, "system viewpoints are not editable"));
        }
        Ok(CheckOutcome::Proceed(UpdateViewpointCheckpoint { title: self.args.title.clone(), cover_photo: self.args.cover_photo.clone() }))
    }

    async fn update(&self, _ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        if let Some(title) = &checkpoint.title {
            viewpoint.title = Some(title.clone());
        }
        if let Some(cover_photo) = &checkpoint.cover_photo {
            viewpoint.cover_photo = Some(cover_photo.clone());
        }
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
        _checkpoint: &Self::Checkpoint,
        notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        let followers = store.query_followers(&self.args.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_attributes: true, ..Default::default() }],
            ..Default::default()
        };
        for follower in followers.iter().filter(|f| !f.is_removed()) {
            notifier
                .notify(NewNotification {
                    user_id: follower.user_id.clone(),
                    name: "update_viewpoint".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: self.clock.now(),
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
