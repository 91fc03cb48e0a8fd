//! Retry backoff (§4.4 step 6: `min(60s, 2^attempts * 1s) + jitter`).

use chrono::Duration;
use rand::Rng;

/// `backoff_until = now + min(ceiling, 2^attempts * 1s) + jitter`, jitter
/// uniform in `[0, 1s)` so a burst of same-user retries doesn't all wake
/// up in lockstep.
pub fn compute_backoff(attempts: u32, ceiling_secs: u64) -> Duration {
    let exp = 2u64.saturating_pow(attempts.min(32));
    let base_secs = exp.min(ceiling_secs);
    let jitter_millis = rand::thread_rng().gen_range(0..1000);
    Duration::seconds(base_secs as i64) + Duration::milliseconds(jitter_millis)
}
