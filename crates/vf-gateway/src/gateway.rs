//! Wraps a push/email/SMS sender trio behind one `CircuitBreaker` each
//! (spec §10.6/§4.9: "best-effort; their failures MUST NOT roll back the
//! operation"). A provider tripping its breaker degrades that channel to
//! a silent no-op rather than stalling or failing the NOTIFY phase that
//! called it.

use std::sync::Arc;

use vf_core::types::{DeviceId, PushToken, UserId};
use vf_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

use crate::email::{EmailMessage, EmailSender};
use crate::push::{DeadToken, PushMessage, PushSender};
use crate::sms::{SmsMessage, SmsSender};

pub struct Gateway {
    push: Arc<dyn PushSender>,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    push_breaker: CircuitBreaker,
    email_breaker: CircuitBreaker,
    sms_breaker: CircuitBreaker,
}

impl Gateway {
    pub fn new(push: Arc<dyn PushSender>, email: Arc<dyn EmailSender>, sms: Arc<dyn SmsSender>) -> Self {
        Self::with_config(push, email, sms, CircuitBreakerConfig::default())
    }

    pub fn with_config(
        push: Arc<dyn PushSender>,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            push,
            email,
            sms,
            push_breaker: CircuitBreaker::new(config.clone()),
            email_breaker: CircuitBreaker::new(config.clone()),
            sms_breaker: CircuitBreaker::new(config),
        }
    }

    /// Dispatches a push alert. Any failure -- including the breaker
    /// tripping open -- is logged and swallowed; NOTIFY must not fail an
    /// otherwise-complete operation over a flaky push provider.
    pub async fn send_push(&self, message: PushMessage) {
        let user_id = message.user_id.clone();
        let device_id = message.device_id;
        let push = self.push.clone();
        let outcome = self.push_breaker.call(|| async move { push.send(message).await }).await;
        if let Err(e) = outcome {
            tracing::warn!(%user_id, device_id, error = %e, "push dispatch failed, dropping");
        }
    }

    pub async fn send_email(&self, message: EmailMessage) {
        let user_id = message.user_id.clone();
        let to = message.to.clone();
        let email = self.email.clone();
        let outcome = self.email_breaker.call(|| async move { email.send(message).await }).await;
        if let Err(e) = outcome {
            tracing::warn!(%user_id, %to, error = %e, "email dispatch failed, dropping");
        }
    }

    pub async fn send_sms(&self, message: SmsMessage) {
        let user_id = message.user_id.clone();
        let to = message.to.clone();
        let sms = self.sms.clone();
        let outcome = self.sms_breaker.call(|| async move { sms.send(message).await }).await;
        if let Err(e) = outcome {
            tracing::warn!(%user_id, %to, error = %e, "sms dispatch failed, dropping");
        }
    }

    /// Polls the push provider's feedback channel for dead tokens. Callers
    /// (a periodic task in `vf-server`) are responsible for clearing the
    /// corresponding `Device.push_token`/`alert_user_id` (spec §4.9).
    pub async fn drain_dead_tokens(&self) -> Vec<DeadToken> {
        self.push.drain_feedback().await
    }
}

/// Convenience for building a `PushMessage` from a `Device`'s token without
/// pulling the full entity type into this crate's public surface.
pub fn push_message(user_id: UserId, device_id: DeviceId, token: PushToken, alert: String, badge: i64) -> PushMessage {
    PushMessage { user_id, device_id, token, alert, badge }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::TestEmailSender;
    use crate::push::TestPushSender;
    use crate::sms::TestSmsSender;
    use vf_core::types::{PushEnvironment, PushScheme};

    fn token() -> PushToken {
        PushToken { scheme: PushScheme::Apns, env: PushEnvironment::Prod, opaque: "abc".into() }
    }

    #[tokio::test]
    async fn dispatch_reaches_all_three_backends() {
        let push = Arc::new(TestPushSender::new());
        let email = Arc::new(TestEmailSender::new());
        let sms = Arc::new(TestSmsSender::new());
        let gateway = Gateway::new(push.clone(), email.clone(), sms.clone());

        gateway.send_push(push_message("u1".into(), 1, token(), "hi".into(), 1)).await;
        gateway.send_email(EmailMessage { user_id: "u1".into(), to: "a@example.com".into(), subject: "s".into(), body: "b".into() }).await;
        gateway.send_sms(SmsMessage { user_id: "u1".into(), to: "+15551234567".into(), body: "hi".into() }).await;

        assert_eq!(push.sent().len(), 1);
        assert_eq!(email.sent().len(), 1);
        assert_eq!(sms.sent().len(), 1);
    }

    #[tokio::test]
    async fn dead_tokens_flow_through_drain() {
        let push = Arc::new(TestPushSender::new());
        push.queue_dead_token("u1".into(), 7);
        let gateway = Gateway::new(push, Arc::new(TestEmailSender::new()), Arc::new(TestSmsSender::new()));
        let dead = gateway.drain_dead_tokens().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].device_id, 7);
    }
}
