//! Cross-cutting resiliency primitives (§10.1) shared by the Scheduler and
//! the Side-Effect Gateway: a token-bucket rate limiter (used to throttle
//! the Scheduler's startup orphan scan, §4.4, and KV scan/query fan-out
//! generally, mirroring `backend/base/rate_limiter.py`), a circuit breaker
//! (wraps APNS/email/SMS dispatch in `vf-gateway` so a failing provider
//! degrades to no-ops rather than stalling NOTIFY, §10.6), and cooperative
//! shutdown coordination (`vf-server`'s drain-then-exit, §5 "Scheduler
//! shutdown drains current operations, releases locks, and exits").
//!
//! None of this is specific to the operation engine's entity model -- it's
//! the same reliability-pattern layer the teacher's runtime carries,
//! generalized to whatever caller needs it here.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod shutdown;
