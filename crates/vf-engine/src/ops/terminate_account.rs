//! `terminate_account` (§6, §3 "terminated sets a tombstone that prevents
//! future login but preserves referential integrity"). No cross-user
//! cleanup: a terminated user's Follower/Photo/Activity rows are left in
//! place so other users' viewpoints still resolve references to them; only
//! the login-eligibility flag flips. Reuses `update_device`'s handler
//! shape (CHECK loads the user, UPDATE writes it back, no accounting, a
//! single self-notification).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::errors::VfError;
use vf_core::clock::SharedClock;
use vf_core::types::InvalidateSpec;
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateAccountArgs {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateAccountCheckpoint {}

pub struct TerminateAccountHandler {
    #[allow(dead_code)]
    args: TerminateAccountArgs,
    clock: SharedClock,
}

impl TerminateAccountHandler {
    pub fn new(args: TerminateAccountArgs, clock: SharedClock) -> Self {
        TerminateAccountHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for TerminateAccountHandler {
    type Checkpoint = TerminateAccountCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let user = store.require_user(&ctx.user_id).await?;
        if user.terminated {
            return Err(VfError::invalid_request("ALREADY_TERMINATED", format!("{} is already terminated", ctx.user_id)));
        }
        Ok(CheckOutcome::Proceed(TerminateAccountCheckpoint {}))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, _checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut user = store.require_user(&ctx.user_id).await?;
        user.terminated = true;
        store.put_user(&user).await?;
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
        notifier
            .notify(NewNotification {
                user_id: ctx.user_id.clone(),
                name: "account_terminated".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: self.clock.now(),
                invalidate: InvalidateSpec { users: vec![ctx.user_id.clone()], ..Default::default() },
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
