//! `share_new` (§6, §8 S1/S6, grounded on `backend/op/share_new_op.py`).
//! Creates a fresh Event viewpoint from one or more of the caller's private
//! episodes and invites a set of contacts onto it. Any contact named by an
//! identity with no linked user yet (S6) makes CHECK stop for a nested
//! `register_prospective_user`; the Scheduler runs that to completion and
//! re-enters this operation, which then finds the identity resolved and
//! proceeds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use vf_core::asset_id::{construct_device_local_asset_id, construct_timestamp_asset_id, IdPrefix, LocalId};
use vf_core::clock::SharedClock;
use vf_core::errors::{error_ids, VfError};
use vf_core::types::{
    accounting_scope, AccountingDelta, Activity, Episode, EpisodeId, Follower, FollowerLabel, InvalidateSpec,
    InvalidateViewpoint, PhotoId, Post, UserId, Viewpoint, ViewpointId, ViewpointType,
};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, NestedOperationRequest, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::ops::common::ContactIdentifier;
use crate::ops::register_prospective_user::RegisterProspectiveUserHandler;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEpisode {
    pub existing_episode_id: EpisodeId,
    pub photo_ids: Vec<PhotoId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareNewArgs {
    pub episodes: Vec<ShareEpisode>,
    pub contacts: Vec<ContactIdentifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NewEpisode {
    source_episode_id: EpisodeId,
    new_episode_id: EpisodeId,
    title: Option<String>,
    photo_ids: Vec<PhotoId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareNewCheckpoint {
    viewpoint_id: ViewpointId,
    contact_user_ids: Vec<UserId>,
    new_episodes: Vec<NewEpisode>,
    activity_id: String,
    timestamp: DateTime<Utc>,
}

pub struct ShareNewHandler {
    args: ShareNewArgs,
    clock: SharedClock,
}

impl ShareNewHandler {
    pub fn new(args: ShareNewArgs, clock: SharedClock) -> Self {
        ShareNewHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for ShareNewHandler {
    type Checkpoint = ShareNewCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        let user = store.require_user(&ctx.user_id).await?;

        let mut source_episodes = Vec::with_capacity(self.args.episodes.len());
        for ep in &self.args.episodes {
            let episode = store.require_episode(&ep.existing_episode_id).await?;
            if episode.viewpoint_id != user.private_vp_id {
                return Err(VfError::permission(
                    error_ids::INVALID_SHARE_EPISODE_OWNER,
                    format!("episode {} is not in the caller's private viewpoint", ep.existing_episode_id),
                ));
            }
            source_episodes.push(episode);
        }

        let mut nested = Vec::new();
        let mut contact_user_ids = Vec::new();
        for contact in &self.args.contacts {
            match contact {
                ContactIdentifier::UserId(user_id) => contact_user_ids.push(user_id.clone()),
                ContactIdentifier::IdentityKey(key) => match RegisterProspectiveUserHandler::resolve(store, key).await? {
                    Some(user_id) => contact_user_ids.push(user_id),
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

        let count = 1 + self.args.episodes.len() as u64 + 1;
        let first = store.bump_asset_id_seq(&ctx.user_id, count).await?;
        let timestamp = self.clock.now();
        let timestamp_seconds = timestamp.timestamp().max(0) as u64;

        let viewpoint_id = construct_device_local_asset_id(IdPrefix::Viewpoint, ctx.device_id, first);
        let new_episodes = self
            .args
            .episodes
            .iter()
            .zip(source_episodes.iter())
            .enumerate()
            .map(|(i, (ep, source))| NewEpisode {
                source_episode_id: ep.existing_episode_id.clone(),
                new_episode_id: construct_timestamp_asset_id(IdPrefix::Episode, timestamp_seconds, ctx.device_id, &LocalId::Int(first + 1 + i as u64), false),
                title: source.title.clone(),
                photo_ids: ep.photo_ids.clone(),
            })
            .collect();
        let activity_id = construct_timestamp_asset_id(
            IdPrefix::Activity,
            timestamp_seconds,
            ctx.device_id,
            &LocalId::Int(first + 1 + self.args.episodes.len() as u64),
            false,
        );

        Ok(CheckOutcome::Proceed(ShareNewCheckpoint { viewpoint_id, contact_user_ids, new_episodes, activity_id, timestamp }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut viewpoint = Viewpoint {
            viewpoint_id: checkpoint.viewpoint_id.clone(),
            viewpoint_type: ViewpointType::Event,
            owner_id: ctx.user_id.clone(),
            update_seq: 0,
            title: None,
            cover_photo: None,
        };
        store.put_viewpoint(&viewpoint).await?;

        store
            .put_follower(&Follower {
                user_id: ctx.user_id.clone(),
                viewpoint_id: checkpoint.viewpoint_id.clone(),
                labels: std::collections::BTreeSet::from([FollowerLabel::Admin, FollowerLabel::Contribute, FollowerLabel::Personal]),
                viewed_seq: 0,
                adding_user_id: None,
                timestamp: checkpoint.timestamp,
            })
            .await?;
        for contact in &checkpoint.contact_user_ids {
            store
                .put_follower(&Follower {
                    user_id: contact.clone(),
                    viewpoint_id: checkpoint.viewpoint_id.clone(),
                    labels: std::collections::BTreeSet::from([FollowerLabel::Contribute, FollowerLabel::Personal]),
                    viewed_seq: 0,
                    adding_user_id: Some(ctx.user_id.clone()),
                    timestamp: checkpoint.timestamp,
                })
                .await?;
            store.update_followed(contact, &checkpoint.viewpoint_id, None, checkpoint.timestamp).await?;
        }
        store.update_followed(&ctx.user_id, &checkpoint.viewpoint_id, None, checkpoint.timestamp).await?;

        viewpoint.bump_update_seq();
        store.put_viewpoint(&viewpoint).await?;

        for new_ep in &checkpoint.new_episodes {
            store
                .put_episode(&Episode {
                    episode_id: new_ep.new_episode_id.clone(),
                    user_id: ctx.user_id.clone(),
                    viewpoint_id: checkpoint.viewpoint_id.clone(),
                    timestamp: checkpoint.timestamp,
                    title: new_ep.title.clone(),
                })
                .await?;
            for photo_id in &new_ep.photo_ids {
                store
                    .put_post(&Post { episode_id: new_ep.new_episode_id.clone(), photo_id: photo_id.clone(), unshared: false, removed: false })
                    .await?;
            }
        }

        store
            .put_activity(&Activity {
                viewpoint_id: checkpoint.viewpoint_id.clone(),
                activity_id: checkpoint.activity_id.clone(),
                user_id: ctx.user_id.clone(),
                timestamp: checkpoint.timestamp,
                name: "share_new".to_string(),
                json: serde_json::json!({ "contacts": checkpoint.contact_user_ids }),
            })
            .await?;

        viewpoint.bump_update_seq();
        store.put_viewpoint(&viewpoint).await?;
        Ok(())
    }

    async fn account(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint, acc: &mut Accounting<C>) -> Result<(), VfError> {
        let mut num_photos = 0i64;
        let mut size_bytes = 0i64;
        for new_ep in &checkpoint.new_episodes {
            for photo_id in &new_ep.photo_ids {
                if let Some(photo) = store.get_photo(photo_id).await? {
                    num_photos += 1;
                    size_bytes += photo.size_bytes.unwrap_or(0);
                }
            }
        }
        let content_delta = AccountingDelta { size_bytes, num_photos, num_conversations: 0 };
        acc.add(accounting_scope::shared_by(&ctx.user_id, &checkpoint.viewpoint_id), "totals", content_delta);
        acc.add(accounting_scope::visible_in(&checkpoint.viewpoint_id), "totals", content_delta);

        let conversation_delta = AccountingDelta { size_bytes: 0, num_photos: 0, num_conversations: 1 };
        acc.add(accounting_scope::owned_by(&ctx.user_id), "totals", conversation_delta);
        for contact in &checkpoint.contact_user_ids {
            acc.add(accounting_scope::owned_by(contact), "totals", conversation_delta);
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
        let viewpoint = store.require_viewpoint(&checkpoint.viewpoint_id).await?;
        let invalidate = InvalidateSpec {
            viewpoints: vec![InvalidateViewpoint {
                viewpoint_id: checkpoint.viewpoint_id.clone(),
                get_attributes: true,
                get_followers: true,
                get_activities: true,
                get_episodes: true,
                ..Default::default()
            }],
            users: vec![ctx.user_id.clone()],
            ..Default::default()
        };

        let mut recipients = checkpoint.contact_user_ids.clone();
        recipients.push(ctx.user_id.clone());
        for recipient in recipients {
            notifier
                .notify(NewNotification {
                    user_id: recipient,
                    name: "share_new".to_string(),
                    op_id: Some(ctx.operation_id.clone()),
                    sender_id: Some(ctx.user_id.clone()),
                    sender_device_id: Some(ctx.device_id),
                    timestamp: checkpoint.timestamp,
                    invalidate: invalidate.clone(),
                    viewpoint_id: Some(checkpoint.viewpoint_id.clone()),
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
    use vf_core::clock::TestClock;
    use vf_core::types::{Episode, Identity, Photo, User};
    use vf_kv::InMemoryKv;

    use crate::executor::{ExecutionOutcome, FourPhaseExecutor};
    use crate::failpoint::FailpointRegistry;

    async fn seeded() -> Arc<Store<InMemoryKv>> {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_user(&User::new("1".into(), "v-priv-1".into(), 1)).await.unwrap();
        store.put_user(&User::new("2".into(), "v-priv-2".into(), 1)).await.unwrap();
        store
            .put_episode(&Episode { episode_id: "e-AA-AA".into(), user_id: "1".into(), viewpoint_id: "v-priv-1".into(), timestamp: chrono::Utc::now(), title: None })
            .await
            .unwrap();
        store.put_photo(&Photo { photo_id: "p-BB-BB".into(), user_id: "1".into(), aspect_ratio: None, content_type: None, size_bytes: Some(2000) }).await.unwrap();
        store.put_post(&Post { episode_id: "e-AA-AA".into(), photo_id: "p-BB-BB".into(), unshared: false, removed: false }).await.unwrap();
        store
    }

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("1".into(), "o-1-1".into(), 1, "share_new", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn sharing_with_a_registered_contact_double_bumps_update_seq_and_badges_the_recipient() {
        let store = seeded().await;
        let args = ShareNewArgs {
            episodes: vec![ShareEpisode { existing_episode_id: "e-AA-AA".into(), photo_ids: vec!["p-BB-BB".into()] }],
            contacts: vec![ContactIdentifier::UserId("2".into())],
        };
        let handler = ShareNewHandler::new(args, Arc::new(TestClock::at_micros(1_700_000_000_000_000)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));

        let follower_2 = store.query_followers(&followers_vp(&store).await).await.unwrap();
        assert_eq!(follower_2.len(), 2);

        let vp_id = followers_vp(&store).await;
        let viewpoint = store.require_viewpoint(&vp_id).await.unwrap();
        assert_eq!(viewpoint.update_seq, 2);

        let notif = store.get_notification(&"2".to_string(), 1).await.unwrap().unwrap();
        assert_eq!(notif.badge, 1);
        assert_eq!(notif.name, "share_new");
        let notif_sender = store.get_notification(&"1".to_string(), 1).await.unwrap().unwrap();
        assert_eq!(notif_sender.badge, 0);
    }

    #[tokio::test]
    async fn sharing_with_an_unknown_identity_stops_for_a_nested_registration() {
        let store = seeded().await;
        let args = ShareNewArgs {
            episodes: vec![ShareEpisode { existing_episode_id: "e-AA-AA".into(), photo_ids: vec!["p-BB-BB".into()] }],
            contacts: vec![ContactIdentifier::IdentityKey("Email:new@example.com".into())],
        };
        let handler = ShareNewHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        match outcome {
            ExecutionOutcome::NeedsNested(reqs) => {
                assert_eq!(reqs.len(), 1);
                assert_eq!(reqs[0].method, "register_prospective_user");
            }
            _ => panic!("expected NeedsNested"),
        }

        // Run the nested op, then re-enter: it now resolves.
        let nested_handler = RegisterProspectiveUserHandler::new(
            crate::ops::register_prospective_user::RegisterProspectiveUserArgs { identity_key: "Email:new@example.com".into(), inviting_user_id: "1".into() },
            Arc::new(TestClock::at_micros(0)),
        );
        let mut nested_row = vf_core::types::Operation::new("1".into(), "o-1-2".into(), 1, "register_prospective_user", serde_json::json!({}), chrono::Utc::now());
        executor.execute(&nested_handler, &mut nested_row).await.unwrap();

        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
        let identity = store.get_identity("Email:new@example.com").await.unwrap().unwrap();
        let new_user_id = identity.user_id.unwrap();
        let vp_id = followers_vp(&store).await;
        assert!(store.get_follower(&new_user_id, &vp_id).await.unwrap().is_some());
    }

    async fn followers_vp(store: &Arc<Store<InMemoryKv>>) -> String {
        let all = store.kv().scan("follower", vf_kv::ScanSpec::default()).await.unwrap();
        for item in all {
            let f: Follower = serde_json::from_str(item.get("doc").and_then(vf_kv::AttrValue::as_str).unwrap()).unwrap();
            if f.user_id == "1" {
                return f.viewpoint_id;
            }
        }
        unreachable!("owner follower row must exist")
    }
}
