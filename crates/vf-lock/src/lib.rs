//! Lock Manager (C2, spec §4.2): named advisory locks over the KV store's
//! `lock` table, with abandonment timeout and owner-conditional renewal
//! and release.

pub mod manager;

pub use manager::{new_owner_id, LockHandle, LockManager, LOCK_TABLE};
