//! Failpoint registry (§10.5): test-only synthetic abort points keyed by
//! `(file, line)` so integration tests can crash the executor between any
//! two phases and assert the retry/replay is idempotent. Grounded on the
//! source's failpoint-based crash-testing protocol described in spec §8's
//! Testable Properties (idempotence across phase-boundary crashes).

use std::collections::HashSet;
use std::sync::Mutex;

use vf_core::errors::VfError;

pub type FailpointId = (&'static str, u32);

#[derive(Default)]
pub struct FailpointRegistry {
    armed: Mutex<HashSet<FailpointId>>,
}

impl FailpointRegistry {
    pub fn new() -> Self {
        FailpointRegistry::default()
    }

    /// Arms a failpoint so the next `hit` call at that site returns an
    /// error instead of proceeding. Stays armed until `disarm` or `clear`
    /// (the executor calls `hit` at most once per phase transition, so
    /// "arm and crash the first time through" is the common pattern).
    pub fn arm(&self, id: FailpointId) {
        self.armed.lock().unwrap().insert(id);
    }

    pub fn disarm(&self, id: FailpointId) {
        self.armed.lock().unwrap().remove(&id);
    }

    pub fn clear(&self) {
        self.armed.lock().unwrap().clear();
    }

    /// Called at a named crash point. Production code always calls this;
    /// it's a no-op unless a test has armed that exact site.
    pub fn hit(&self, file: &'static str, line: u32) -> Result<(), VfError> {
        if self.armed.lock().unwrap().contains(&(file, line)) {
            return Err(VfError::Failpoint { file, line });
        }
        Ok(())
    }
}

/// Calls `$registry.hit(file!(), line!())?` at the call site, so the
/// recorded location is the macro invocation, not a helper function.
#[macro_export]
macro_rules! failpoint {
    ($registry:expr) => {
        $registry.hit(file!(), line!())?
    };
}
