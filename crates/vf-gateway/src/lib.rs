//! Side-Effect Gateway (C9, spec §4.9). Best-effort dispatch of push, email,
//! and SMS alerts on behalf of the NOTIFY phase. Every transport is a trait
//! boundary only -- the HTTP front door's actual APNS/SES/Twilio client is
//! explicitly out of scope (spec §1, "email/SMS/APNS transport drivers") --
//! so this crate ships a buffering test backend and a logging backend, the
//! same two-tier fake-vs-log split the teacher's runtime uses for its own
//! external collaborators (injected services swapped for fakes under test).
//!
//! Push and email/SMS dispatch are wrapped in a `vf_harness::CircuitBreaker`
//! per provider: a failing provider degrades to a no-op rather than stalling
//! NOTIFY, matching spec §4.9 ("these are best-effort; their failures MUST
//! NOT roll back the operation") and §4.6's suspension-point note that
//! push/email/SMS calls are potential suspension points, not required ones.

pub mod email;
pub mod gateway;
pub mod push;
pub mod sms;

pub use email::{EmailMessage, EmailSender, LoggingEmailSender, TestEmailSender};
pub use gateway::{push_message, Gateway};
pub use push::{DeadToken, PushMessage, PushSender, LoggingPushSender, TestPushSender};
pub use sms::{LoggingSmsSender, SmsMessage, SmsSender, TestSmsSender};
