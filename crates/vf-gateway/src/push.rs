//! Push dispatch (spec §4.9). The gateway itself never speaks APNS/GCM wire
//! protocol -- that client lives outside this repository's scope (spec §1)
//! -- so `PushSender` is the trait boundary a production binary would
//! implement against a real persistent-TLS APNS/GCM client, and this crate
//! ships only the fakes the Executor's own test suite and `vf-server`'s
//! dev-mode logging backend need.

use std::sync::Mutex;

use async_trait::async_trait;
use vf_core::errors::VfError;
use vf_core::types::{DeviceId, PushToken, UserId};

/// A single push alert addressed to one device.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub token: PushToken,
    /// Opaque payload; production APNS/GCM encode this as the alert body
    /// plus a badge count and invalidate payload. Kept as a string here
    /// since the wire encoding is outside this crate's scope.
    pub alert: String,
    pub badge: i64,
}

/// A push token the provider's feedback channel reported as dead. The
/// caller (NOTIFY phase, or a periodic feedback-poll task in `vf-server`)
/// is responsible for clearing `Device.push_token`/`alert_user_id` on the
/// affected row (spec §4.9).
#[derive(Debug, Clone)]
pub struct DeadToken {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

#[async_trait]
pub trait PushSender: Send + Sync {
    /// Send one push message. Best-effort -- callers must not treat a
    /// failure as grounds to roll back the operation that triggered it
    /// (spec §4.9, §4.6).
    async fn send(&self, message: PushMessage) -> Result<(), VfError>;

    /// Drain and return any dead-token reports accumulated since the last
    /// call. Production APNS exposes this as a separate feedback-channel
    /// connection; fakes here just return what was queued by `send`.
    async fn drain_feedback(&self) -> Vec<DeadToken>;
}

/// Buffers every sent message and lets tests simulate feedback-channel
/// dead-token reports by queuing them directly.
#[derive(Default)]
pub struct TestPushSender {
    sent: Mutex<Vec<PushMessage>>,
    feedback: Mutex<Vec<DeadToken>>,
}

impl TestPushSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Simulates the provider's feedback channel reporting `device_id` as
    /// dead on its next poll.
    pub fn queue_dead_token(&self, user_id: UserId, device_id: DeviceId) {
        self.feedback.lock().unwrap().push(DeadToken { user_id, device_id });
    }
}

#[async_trait]
impl PushSender for TestPushSender {
    async fn send(&self, message: PushMessage) -> Result<(), VfError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn drain_feedback(&self) -> Vec<DeadToken> {
        std::mem::take(&mut *self.feedback.lock().unwrap())
    }
}

/// Logs every push at info level instead of delivering it; used by
/// `vf-server` when no production transport is configured (spec §10.7:
/// never ship a production APNS/SES/Twilio client in this repository).
#[derive(Default)]
pub struct LoggingPushSender;

impl LoggingPushSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushSender for LoggingPushSender {
    async fn send(&self, message: PushMessage) -> Result<(), VfError> {
        tracing::info!(
            user_id = %message.user_id,
            device_id = message.device_id,
            token = %message.token,
            badge = message.badge,
            "push alert (logging backend, no transport configured)"
        );
        Ok(())
    }

    async fn drain_feedback(&self) -> Vec<DeadToken> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::types::{PushEnvironment, PushScheme};

    fn token() -> PushToken {
        PushToken { scheme: PushScheme::Apns, env: PushEnvironment::Prod, opaque: "abc".into() }
    }

    #[tokio::test]
    async fn test_sender_buffers_sent_messages() {
        let sender = TestPushSender::new();
        sender
            .send(PushMessage { user_id: "u1".into(), device_id: 1, token: token(), alert: "hi".into(), badge: 3 })
            .await
            .unwrap();
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(sender.sent()[0].badge, 3);
    }

    #[tokio::test]
    async fn feedback_drains_once() {
        let sender = TestPushSender::new();
        sender.queue_dead_token("u1".into(), 1);
        let fb = sender.drain_feedback().await;
        assert_eq!(fb.len(), 1);
        assert!(sender.drain_feedback().await.is_empty());
    }

    #[tokio::test]
    async fn logging_sender_never_fails() {
        let sender = LoggingPushSender::new();
        sender
            .send(PushMessage { user_id: "u1".into(), device_id: 1, token: token(), alert: "hi".into(), badge: 0 })
            .await
            .unwrap();
        assert!(sender.drain_feedback().await.is_empty());
    }
}
