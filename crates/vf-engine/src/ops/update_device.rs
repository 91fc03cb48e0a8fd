//! `update_device` (§6). Registers or updates a device's push token and
//! platform metadata. No accounting; NOTIFY is a pure no-op since a device
//! update has nothing for any client to invalidate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::{Device, DeviceId, PushToken};
use vf_kv::{CheckingKvClient, KvClient};

use crate::accounting::Accounting;
use crate::executor::{CheckOutcome, OpContext, OperationHandler};
use crate::notification::NotificationManager;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeviceArgs {
    pub device_id: DeviceId,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeviceCheckpoint {}

pub struct UpdateDeviceHandler {
    args: UpdateDeviceArgs,
    #[allow(dead_code)]
    clock: SharedClock,
}

impl UpdateDeviceHandler {
    pub fn new(args: UpdateDeviceArgs, clock: SharedClock) -> Self {
        UpdateDeviceHandler { args, clock }
    }
}

#[async_trait]
impl<C: KvClient> OperationHandler<C> for UpdateDeviceHandler {
    type Checkpoint = UpdateDeviceCheckpoint;

    async fn check(
        &self,
        ctx: &OpContext,
        store: &Store<CheckingKvClient<Arc<C>>>,
    ) -> Result<CheckOutcome<Self::Checkpoint>, VfError> {
        store.require_user(&ctx.user_id).await?;
        if let Some(token) = &self.args.push_token {
            PushToken::parse(token)?;
        }
        Ok(CheckOutcome::Proceed(UpdateDeviceCheckpoint {}))
    }

    async fn update(&self, ctx: &OpContext, store: &Store<C>, _checkpoint: &Self::Checkpoint) -> Result<(), VfError> {
        let mut device = store.get_device(&ctx.user_id, self.args.device_id).await?.unwrap_or_else(|| Device {
            user_id: ctx.user_id.clone(),
            device_id: self.args.device_id,
            push_token: None,
            platform: None,
            version: None,
            last_access: None,
            alert_user_id: None,
        });
        if let Some(token) = &self.args.push_token {
            device.push_token = Some(PushToken::parse(token)?);
            device.alert_user_id = Some(ctx.user_id.clone());
        }
        if let Some(platform) = &self.args.platform {
            device.platform = Some(platform.clone());
        }
        if let Some(version) = &self.args.version {
            device.version = Some(version.clone());
        }
        store.put_device(&device).await?;
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::clock::TestClock;
    use vf_core::types::User;
    use vf_kv::InMemoryKv;

    use crate::executor::FourPhaseExecutor;
    use crate::failpoint::FailpointRegistry;

    #[tokio::test]
    async fn registering_a_push_token_claims_the_device_as_the_alert_target() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_user(&User::new("u1".into(), "v-priv".into(), 1)).await.unwrap();
        let args = UpdateDeviceArgs { device_id: 1, push_token: Some("apns-prod:deadbeef".into()), platform: Some("ios".into()), version: Some("2.0".into()) };
        let handler = UpdateDeviceHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = vf_core::types::Operation::new("u1".into(), "o-1-1".into(), 1, "update_device", serde_json::json!({}), chrono::Utc::now());
        executor.execute(&handler, &mut row).await.unwrap();

        let device = store.get_device(&"u1".to_string(), 1).await.unwrap().unwrap();
        assert_eq!(device.alert_user_id.as_deref(), Some("u1"));
        assert_eq!(device.platform.as_deref(), Some("ios"));
    }

    #[tokio::test]
    async fn a_malformed_push_token_is_rejected_during_check() {
        let store = Arc::new(Store::new(Arc::new(InMemoryKv::new())));
        store.put_user(&User::new("u1".into(), "v-priv".into(), 1)).await.unwrap();
        let args = UpdateDeviceArgs { device_id: 1, push_token: Some("not-a-token".into()), platform: None, version: None };
        let handler = UpdateDeviceHandler::new(args, Arc::new(TestClock::at_micros(0)));
        let executor = FourPhaseExecutor::new(store.clone(), Arc::new(FailpointRegistry::new()));
        let mut row = vf_core::types::Operation::new("u1".into(), "o-1-1".into(), 1, "update_device", serde_json::json!({}), chrono::Utc::now());
        assert!(executor.execute(&handler, &mut row).await.is_err());
    }
}
