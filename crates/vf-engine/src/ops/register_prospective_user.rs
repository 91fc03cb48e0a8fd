//! `register_prospective_user` (§4.4, §8 S6, grounded on
//! `backend/op/register_user_op.py`). Never called directly by a client: a
//! sharing operation's CHECK phase raises `CheckOutcome::StopForNested` with
//! one of these per unresolved contact, the Scheduler runs it to completion,
//! then re-enters the original operation from checkpoint. Mints a new user
//! id from the global allocator (this user has no `asset_id_seq` of its own
//! yet to borrow from), a default private Viewpoint, and links the inviting
//! identity.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::asset_id::{construct_device_local_asset_id, IdPrefix};
use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{Follower, FollowerLabel, Identity, InvalidateSpec, RegistrationState, User, Viewpoint, ViewpointType};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::NotificationManager;
use crate::store::Store;

/// The reserved device id the source uses to mean "allocated server-side",
/// also used as the prospective user's placeholder webapp device (§4.8).
const SERVER_DEVICE_ID: u64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProspectiveUserArgs {
    pub identity_key: String,
    pub inviting_user_id: vf_core::types::UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProspectiveUserCheckpoint {
    /// `None` when CHECK found the identity already resolved (a replay
    /// racing a concurrent invite that got there first); UPDATE then has
    /// nothing to create.
    new_user: Option<NewUserPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NewUserPlan {
    user_id: vf_core::types::UserId,
    private_vp_id: vf_core::types::ViewpointId,
}

pub struct RegisterProspectiveUserHandler {
    args: RegisterProspectiveUserArgs,
    clock: SharedClock,
}

impl RegisterProspectiveUserHandler {
    pub fn new(args: RegisterProspectiveUserArgs, clock: SharedClock) -> Self {
        RegisterProspectiveUserHandler { args, clock }
    }

    /// The user id this request will resolve to, whether or not it ends up
    /// minting a fresh one -- callers (e.g. `share_new`'s re-entry) need
    /// this to build their own follower list without re-reading the
    /// identity row.
    pub async fn resolve<C: KvClient>(store: &Store<C>, identity_key: &str) -> Result<Option<vf_core::types::UserId>, VfError> {
        Ok(store.get_identity(identity_key).await?.and_then(|i| i.user_id))
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for RegisterProspectiveUserHandler {
    type Checkpoint = RegisterProspectiveUserCheckpoint;

    async fn check(
        &self,
        _ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        if store.get_identity(&self.args.identity_key).await?.and_then(|i| i.user_id).is_some() {
            return Ok(CheckOutcome::Proceed(RegisterProspectiveUserCheckpoint { new_user: None }));
        }
        let user_seq = store.allocate_global_id("user", 1).await?;
        let vp_seq = store.allocate_global_id("viewpoint", 1).await?;
        let user_id = format!("u{user_seq}");
        let private_vp_id = construct_device_local_asset_id(IdPrefix::Viewpoint, SERVER_DEVICE_ID, vp_seq);
        Ok(CheckOutcome::Proceed(RegisterProspectiveUserCheckpoint {
            new_user: Some(NewUserPlan { user_id, private_vp_id }),
        }))
    }

    async fn update(&self, _ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let Some(plan) = &checkpoint.new_user else { return Ok(()) };

        let mut user = User::new(plan.user_id.clone(), plan.private_vp_id.clone(), SERVER_DEVICE_ID);
        user.registration_state = RegistrationState::Prospective;
        store.put_user(&user).await?;

        store
            .put_viewpoint(&Viewpoint {
                viewpoint_id: plan.private_vp_id.clone(),
                viewpoint_type: ViewpointType::Default,
                owner_id: plan.user_id.clone(),
                update_seq: 0,
                title: None,
                cover_photo: None,
            })
            .await?;

        store
            .put_follower(&Follower {
                user_id: plan.user_id.clone(),
                viewpoint_id: plan.private_vp_id.clone(),
                labels: std::collections::BTreeSet::from([FollowerLabel::Admin, FollowerLabel::Personal]),
                viewed_seq: 0,
                adding_user_id: None,
                timestamp: self.clock.now(),
            })
            .await?;

        let mut identity = store.get_identity(&self.args.identity_key).await?.unwrap_or_else(|| Identity {
            key: self.args.identity_key.clone(),
            authority: None,
            access_token: None,
            refresh_token: None,
            expires: None,
            user_id: None,
        });
        // Idempotent: a concurrent registration may have already claimed
        // this identity for a different minted user id. We never overwrite
        // an existing link -- first writer wins, and a retry of this op
        // converges to whatever is already there.
        if identity.user_id.is_none() {
            identity.user_id = Some(plan.user_id.clone());
            store.put_identity(&identity).await?;
        }
        Ok(())
    }

    async fn account(&self, _ctx: &OpContext, _store: &Store<C>, _checkpoint: &Self::Checkpoint, _acc: &mut Accounting<C>) -> Result<(), VfError> {
        Ok(())
    }

    async fn notify(
        &self,
        _ctx: &OpContext,
        _store: &Store<C>,
        _checkpoint: &Self::Checkpoint,
        _notifier: &NotificationManager<C>,
    ) -> Result<(), VfError> {
        // A prospective user has no device yet; nothing to notify until
        // they register themselves. The invalidate payload they'll care
        // about (the new viewpoint) goes out with the inviting operation's
        // own NOTIFY phase once it re-enters.
        let _ = InvalidateSpec::default();
        Ok(())
    }
}
