//! `add_followers` (§6, §8 S5, grounded on `backend/op/add_followers_op.py`).
//! Invites additional contacts onto an existing viewpoint. Shares
//! `share_new`'s contact-resolution shape (nested `register_prospective_user`
//! for unlinked identities) but never mints a viewpoint of its own.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{accounting_scope, AccountingDelta, Follower, FollowerLabel, InvalidateSpec, InvalidateViewpoint, UserId, ViewpointId};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, NestedOperationRequest, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::ops::common::ContactIdentifier;
use crate::ops::register_prospective_user::RegisterProspectiveUserHandler;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFollowersArgs {
    pub viewpoint_id: ViewpointId,
    pub contacts: Vec<ContactIdentifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFollowersCheckpoint {
    new_follower_ids: Vec<UserId>,
    timestamp: DateTime<Utc>,
}

pub struct AddFollowersHandler {
    args: AddFollowersArgs,
    clock: SharedClock,
}

impl AddFollowersHandler {
    pub fn new(args: AddFollowersArgs, clock: SharedClock) -> Self {
        AddFollowersHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for AddFollowersHandler {
    type Checkpoint = AddFollowersCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let caller = store.require_follower(&ctx.user_id, &self.args.viewpoint_id).await?;
        if caller.is_removed() || !caller.labels.iter().any(|l| matches!(l, FollowerLabel::Admin | FollowerLabel::Contribute)) {
            return Err(VfError::permission(error_ids::NO_FOLLOWER, "caller cannot add followers to this viewpoint"));
        }

        let mut nested = Vec::new();
        let mut resolved = Vec::new();
        for contact in &self.args.contacts {
            match contact {
                ContactIdentifier::UserId(user_id) => resolved.push(user_id.clone()),
                ContactIdentifier::IdentityKey(key) => match RegisterProspectiveUserHandler::resolve(store, key).await? {
                    Some(user_id) => resolved.push(user_id),
                    None => nested.push(NestedOperationRequest {
                        user_id: ctx.user_id.clone(),
                        device_id: ctx.device_id,
                        method: "register_prospective_user".to_string(),
                        args: serde_json::json!({ "identity_key": key, "inviting_user_id": ctx.user_id }),
                    }),
                },
            }
        }
        if !nested.is_empty() {
            return Ok(CheckOutcome::StopForNested(nested));
        }

        let mut new_follower_ids = Vec::new();
        for user_id in resolved {
            match store.get_follower(&user_id, &self.args.viewpoint_id).await? {
                None => new_follower_ids.push(user_id),
                Some(existing) if existing.labels.contains(&FollowerLabel::Unrevivable) => {
                    return Err(VfError::permission(
                        error_ids::FOLLOWER_UNREVIVABLE,
                        format!("{user_id} was permanently removed from {}", self.args.viewpoint_id),
                    ));
                }
                Some(existing) if existing.is_removed() => new_follower_ids.push(existing.user_id),
                Some(_already_active) => {}
            }
        }

        Ok(CheckOutcome::Proceed(AddFollowersCheckpoint { new_follower_ids, timestamp: self.clock.now() }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        if checkpoint.new_follower_ids.is_empty() {
            return Ok(());
        }
        for user_id in &checkpoint.new_follower_ids {
            store
                .put_follower(&Follower {
                    user_id: user_id.clone(),
                    viewpoint_id: self.args.viewpoint_id.clone(),
                    labels: BTreeSet::from([FollowerLabel::Contribute, FollowerLabel::Personal]),
                    viewed_seq: 0,
                    adding_user_id: Some(ctx.user_id.clone()),
                    timestamp: checkpoint.timestamp,
                })
                .await?;
            store.update_followed(user_id, &self.args.viewpoint_id, None, checkpoint.timestamp).await?;
        }
        let mut viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        viewpoint.bump_update_seq();
        store.put_viewpoint(&viewpoint).await?;
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        for user_id in &checkpoint.new_follower_ids {
            acc.add(accounting_scope::owned_by(user_id), "totals", AccountingDelta { size_bytes: 0, num_photos: 0, num_conversations: 1 });
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
        if checkpoint.new_follower_ids.is_empty() {
            return Ok(());
        }
        let viewpoint = store.require_viewpoint(&self.args.viewpoint_id).await?;
        let followers = store.query_followers(&self.args.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint { viewpoint_id: self.args.viewpoint_id.clone(), get_followers: true, ..Default::default() }],
            ..Default::default()
        };
        for follower in followers.iter().filter(|f| !f.is_removed()) {
            notifier
                .notify(NewNotification {
                    user_id: follower.user_id.clone(),
                    name: "add_followers".to_string(),
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
