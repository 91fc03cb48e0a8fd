//! SMS dispatch (spec §4.9). Mirrors `email`'s pluggable-backend shape;
//! the production transport (Twilio or similar) is out of scope here.

use std::sync::Mutex;

use async_trait::async_trait;
use vf_core::errors::VfError;
use vf_core::types::UserId;

#[derive(Debug, Clone)]
pub struct SmsMessage {
    pub user_id: UserId,
    pub to: String,
    pub body: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Best-effort, not retried (spec §4.9) -- same contract as `EmailSender`.
    async fn send(&self, message: SmsMessage) -> Result<(), VfError>;
}

#[derive(Default)]
pub struct TestSmsSender {
    sent: Mutex<Vec<SmsMessage>>,
}

impl TestSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsSender for TestSmsSender {
    async fn send(&self, message: SmsMessage) -> Result<(), VfError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingSmsSender;

impl LoggingSmsSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SmsSender for LoggingSmsSender {
    async fn send(&self, message: SmsMessage) -> Result<(), VfError> {
        tracing::info!(user_id = %message.user_id, to = %message.to, "sms alert (logging backend, no transport configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sender_buffers_messages() {
        let sender = TestSmsSender::new();
        sender.send(SmsMessage { user_id: "u1".into(), to: "+15551234567".into(), body: "hi".into() }).await.unwrap();
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn logging_sender_never_fails() {
        let sender = LoggingSmsSender::new();
        sender.send(SmsMessage { user_id: "u1".into(), to: "+15551234567".into(), body: "hi".into() }).await.unwrap();
    }
}
