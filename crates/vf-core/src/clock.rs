//! Injectable clock (§9 design note: "Monkey-patched test time → injectable
//! clock"). The source patches `time.time()` globally in tests; we thread a
//! `Clock` trait through every component that needs `now()` instead, so
//! executor and scheduler tests can advance time deterministically without
//! global mutable state.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Microsecond unix timestamp, the unit asset ids and op ids are built
    /// from (matches the source's `time.time()` truncated to micros).
    fn now_micros(&self) -> i64 {
        self.now().timestamp_micros()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with an atomically-advanceable instant. Cheap to clone and
/// share across threads via `Arc`.
#[derive(Debug, Clone)]
pub struct TestClock {
    micros: Arc<AtomicI64>,
}

impl TestClock {
    pub fn at_micros(start: i64) -> Self {
        TestClock { micros: Arc::new(AtomicI64::new(start)) }
    }

    pub fn at(start: DateTime<Utc>) -> Self {
        Self::at_micros(start.timestamp_micros())
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.micros.fetch_add(delta.num_microseconds().unwrap_or(0), Ordering::SeqCst);
    }

    pub fn set_micros(&self, micros: i64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
    }

    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}

/// Shared handle stored in component state, so `Arc<dyn Clock>` doesn't need
/// repeating at every call site.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
