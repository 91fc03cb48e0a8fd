//! `update_user_photo` (§6, §10.6, grounded on `UserPhoto` asset-key
//! fingerprinting, `backend/db/user_photo.py`). Merges client-supplied
//! asset keys (e.g. an Apple Photos local identifier) into a per-user,
//! per-photo fingerprint set so the same device-local photo uploaded
//! twice dedups without the server storing every raw key. Purely personal
//! bookkeeping: no ACCOUNT phase, same as `hide_photos`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{InvalidateSpec, PhotoId, UserPhoto};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::{NewNotification, NotificationManager};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserPhotoArgs {
    pub photo_id: PhotoId,
    pub asset_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserPhotoCheckpoint {
    asset_keys: Vec<String>,
}

pub struct UpdateUserPhotoHandler {
    args: UpdateUserPhotoArgs,
    clock: SharedClock,
}

impl UpdateUserPhotoHandler {
    pub fn new(args: UpdateUserPhotoArgs, clock: SharedClock) -> Self {
        UpdateUserPhotoHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UpdateUserPhotoHandler {
    type Checkpoint = UpdateUserPhotoCheckpoint;

    async fn check(
        &self,
        _ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        store.get_photo(&self.args.photo_id).await?.ok_or_else(|| {
            VfError::not_found(vf_core::errors::error_ids::NO_POST, format!("no such photo {}", self.args.photo_id))
        })?;
        Ok(CheckOutcome::Proceed(UpdateUserPhotoCheckpoint { asset_keys: self.args.asset_keys.clone() }))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut user_photo = store
            .get_user_photo(&ctx.user_id, &self.args.photo_id)
            .await?
            .unwrap_or_else(|| UserPhoto { user_id: ctx.user_id.clone(), photo_id: self.args.photo_id.clone(), asset_fingerprints: Default::default() });
        user_photo.merge_asset_keys(checkpoint.asset_keys.iter().cloned());
        store.put_user_photo(&user_photo).await?;
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
                name: "update_user_photo".to_string(),
                op_id: Some(ctx.operation_id.clone()),
                sender_id: Some(ctx.user_id.clone()),
                sender_device_id: Some(ctx.device_id),
                timestamp: self.clock.now(),
                invalidate: InvalidateSpec::default(),
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
    use vf_core::types::Photo;
    use vf_kv::InMemoryKv;

    use crate::executor::{ExecutionOutcome, FourPhaseExecutor};
    use crate::failpoint::FailpointRegistry;

    async fn seeded() -> Arc<Store<InMemoryKv>> {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_photo(&Photo { photo_id: "p1".into(), user_id: "1".into(), aspect_ratio: None, content_type: None, size_bytes: Some(100) }).await.unwrap();
        store
    }

    fn op_row() -> vf_core::types::Operation {
        vf_core::types::Operation::new("1".into(), "o-1-1".into(), 1, "update_user_photo", serde_json::json!({}), chrono::Utc::now())
    }

    #[tokio::test]
    async fn merging_asset_keys_is_additive_and_deduplicated() {
        let store = seeded().await;
        let handler = UpdateUserPhotoHandler::new(
            UpdateUserPhotoArgs { photo_id: "p1".into(), asset_keys: vec!["local-1".into()] },
            Arc::new(TestClock::at_micros(0)),
        );
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let outcome = executor.execute(&handler, &mut row).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));

        let handler2 = UpdateUserPhotoHandler::new(
            UpdateUserPhotoArgs { photo_id: "p1".into(), asset_keys: vec!["local-1".into(), "local-2".into()] },
            Arc::new(TestClock::at_micros(0)),
        );
        let mut row2 = vf_core::types::Operation::new("1".into(), "o-1-2".into(), 1, "update_user_photo", serde_json::json!({}), chrono::Utc::now());
        executor.execute(&handler2, &mut row2).await.unwrap();

        let user_photo = store.get_user_photo(&"1".to_string(), &"p1".to_string()).await.unwrap().unwrap();
        assert_eq!(user_photo.asset_fingerprints.len(), 2);
    }

    #[tokio::test]
    async fn updating_an_unknown_photo_is_rejected() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        let handler = UpdateUserPhotoHandler::new(
            UpdateUserPhotoArgs { photo_id: "missing".into(), asset_keys: vec!["local-1".into()] },
            Arc::new(TestClock::at_micros(0)),
        );
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = op_row();
        let err = executor.execute(&handler, &mut row).await.unwrap_err();
        assert!(err.is_client_error());
    }
}
