//! Email dispatch (spec §4.9). Same pluggable-backend shape as `push`: a
//! production HTTP API client is out of scope for this repository, so only
//! the test and logging backends live here.

use std::sync::Mutex;

use async_trait::async_trait;
use vf_core::errors::VfError;
use vf_core::types::UserId;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub user_id: UserId,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Best-effort -- the gateway does not retry email (spec §4.9): a
    /// failure here only means the caller's NOTIFY phase recorded that an
    /// alert was intended, not that it must eventually succeed.
    async fn send(&self, message: EmailMessage) -> Result<(), VfError>;
}

/// Buffers every message sent, keyed by recipient, for test assertions.
#[derive(Default)]
pub struct TestEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl TestEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().iter().filter(|m| m.to == to).cloned().collect()
    }
}

#[async_trait]
impl EmailSender for TestEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), VfError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingEmailSender;

impl LoggingEmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), VfError> {
        tracing::info!(user_id = %message.user_id, to = %message.to, subject = %message.subject, "email alert (logging backend, no transport configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(to: &str) -> EmailMessage {
        EmailMessage { user_id: "u1".into(), to: to.into(), subject: "subj".into(), body: "body".into() }
    }

    #[tokio::test]
    async fn test_sender_buffers_by_recipient() {
        let sender = TestEmailSender::new();
        sender.send(msg("a@example.com")).await.unwrap();
        sender.send(msg("b@example.com")).await.unwrap();
        assert_eq!(sender.sent().len(), 2);
        assert_eq!(sender.sent_to("a@example.com").len(), 1);
    }

    #[tokio::test]
    async fn logging_sender_never_fails() {
        let sender = LoggingEmailSender::new();
        sender.send(msg("a@example.com")).await.unwrap();
    }
}
