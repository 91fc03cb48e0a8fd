//! `link_identity` (§6, grounded on `backend/op/link_identity_op.py`).
//! Attaches an identity (email/phone) to the caller's account. No
//! accounting phase, per the source.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{Identity, InvalidateSpec};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkIdentityArgs {
    pub identity_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkIdentityCheckpoint {}

pub struct LinkIdentityHandler {
    args: LinkIdentityArgs,
    clock: SharedClock,
}

impl LinkIdentityHandler {
    pub fn new(args: LinkIdentityArgs, clock: SharedClock) -> Self {
        LinkIdentityHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for LinkIdentityHandler {
    type Checkpoint = LinkIdentityCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        if let Some(identity) = store.get_identity(&self.args.identity_key).await? {
            if let Some(existing_user) = &identity.user_id {
                if existing_user != &ctx.user_id {
                    return Err(VfError::AlreadyLinked {
                        message: format!("identity {} is already linked to a different account", self.args.identity_key),
                    });
                }
            }
        }
        Ok(CheckOutcome::Proceed(LinkIdentityCheckpoint {}))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, _checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut identity = store.get_identity(&self.args.identity_key).await?.unwrap_or_else(|| Identity {
            key: self.args.identity_key.clone(),
            authority: None,
            access_token: None,
            refresh_token: None,
            expires: None,
            user_id: None,
        });
        identity.expires = None;
        identity.user_id = Some(ctx.user_id.clone());
        store.put_identity(&identity).await?;
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
                name: "link_identity".to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_kv::InMemoryKv;

    use crate::executor::FourPhaseExecutor;
    use crate::failpoint::FailpointRegistry;

    fn op_row(user: &str) -> vf_core::types::Operation {
        vf_core::types::Operation::new(user.into(), "o-1-1".into(), 1, "link_identity", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn linking_an_unclaimed_identity_succeeds() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let args = LinkIdentityArgs { identity_key: "Email:a@example.com".into() };
        let handler = LinkIdentityHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row("u1");
        executor.execute(&handler, &mut row).await.unwrap();

        let identity = store.get_identity("Email:a@example.com").await.unwrap().unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn linking_an_identity_claimed_by_another_user_is_rejected() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store
            .put_identity(&Identity { key: "Email:a@example.com".into(), authority: None, access_token: None, refresh_token: None, expires: None, user_id: Some("u2".into()) })
            .await
            .unwrap();
        let args = LinkIdentityArgs { identity_key: "Email:a@example.com".into() };
        let handler = LinkIdentityHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row("u1");
        let err = executor.execute(&handler, &mut row).await.unwrap_err();
        assert!(matches!(err, VfError::AlreadyLinked { .. }));
    }
}
