//! Lock Manager (C2, spec §4.2). Named advisory locks implemented as a
//! conditional put on `Lock(resource=<type>:<id>)`, expecting the row
//! absent, owned by the caller, or expired.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::LockResourceType;
use vf_kv::{AttrValue, Expected, ExpectedCondition, Item, Key, KvClient, KvError};

pub const LOCK_TABLE: &str = vf_kv::audit::LOCK_TABLE;

const ATTR_OWNER: &str = "owner_id";
const ATTR_EXPIRATION: &str = "expiration";
const ATTR_RENEWED_AT: &str = "renewed_at";
const ATTR_DATA: &str = "data";

#[derive(Debug, Clone)]
pub struct LockHandle {
    pub resource_type: LockResourceType,
    pub resource_id: String,
    pub owner_id: String,
    pub expiration: DateTime<Utc>,
}

impl LockHandle {
    pub fn resource_key(&self) -> String {
        self.resource_type.resource_key(&self.resource_id)
    }
}

/// Generates a random per-process owner id, the way the source identifies
/// a lock holder (a host/process, not a user).
pub fn new_owner_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct LockManager<C: KvClient> {
    kv: Arc<C>,
    clock: SharedClock,
    abandonment: ChronoDuration,
    renewal: ChronoDuration,
}

impl<C: KvClient> LockManager<C> {
    pub fn new(kv: Arc<C>, clock: SharedClock, abandonment_secs: u64, renewal_secs: u64) -> Self {
        LockManager {
            kv,
            clock,
            abandonment: ChronoDuration::seconds(abandonment_secs as i64),
            renewal: ChronoDuration::seconds(renewal_secs as i64),
        }
    }

    pub fn renewal_interval(&self) -> ChronoDuration {
        self.renewal
    }

    fn key_for(resource_type: LockResourceType, resource_id: &str) -> Key {
        Key::hash_only(resource_type.resource_key(resource_id))
    }

    fn build_item(owner_id: &str, expiration: DateTime<Utc>, renewed_at: DateTime<Utc>, data: Option<serde_json::Value>) -> Item {
        let mut item = Item::new();
        item.insert(ATTR_OWNER.to_string(), AttrValue::S(owner_id.to_string()));
        item.insert(ATTR_EXPIRATION.to_string(), AttrValue::N(expiration.timestamp()));
        item.insert(ATTR_RENEWED_AT.to_string(), AttrValue::N(renewed_at.timestamp()));
        if let Some(data) = data {
            item.insert(ATTR_DATA.to_string(), AttrValue::S(data.to_string()));
        }
        item
    }

    /// `AcquireLock` (§4.2). Locks never block: this either returns a
    /// handle or `VfError::LockFailed` immediately.
    pub async fn acquire(
        &self,
        resource_type: LockResourceType,
        resource_id: &str,
        owner_id: &str,
        data: Option<serde_json::Value>,
    ) -> Result<LockHandle, VfError> {
        let key = Self::key_for(resource_type, resource_id);
        let existing = self.kv.get_item(LOCK_TABLE, &key).await.map_err(VfError::from)?;
        let now = self.clock.now();

        let current_owner = existing.as_ref().and_then(|item| item.get(ATTR_OWNER)).and_then(AttrValue::as_str).map(str::to_string);
        let current_expiration = existing
            .as_ref()
            .and_then(|item| item.get(ATTR_EXPIRATION))
            .and_then(AttrValue::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let available = match (&current_owner, current_expiration) {
            (None, _) => true,
            (Some(owner), _) if owner == owner_id => true,
            (Some(_), Some(expiration)) => now >= expiration,
            (Some(_), None) => false,
        };
        if !available {
            return Err(VfError::lock_failed(resource_type.resource_key(resource_id)));
        }

        let mut expected = Expected::new();
        match &current_owner {
            Some(owner) => {
                expected.insert(ATTR_OWNER.to_string(), ExpectedCondition::Value(AttrValue::S(owner.clone())));
            }
            None => {
                expected.insert(ATTR_OWNER.to_string(), ExpectedCondition::NotExists);
            }
        }

        let expiration = now + self.abandonment;
        let item = Self::build_item(owner_id, expiration, now, data);
        match self.kv.put_item(LOCK_TABLE, &key, item, Some(expected)).await {
            Ok(()) => Ok(LockHandle {
                resource_type,
                resource_id: resource_id.to_string(),
                owner_id: owner_id.to_string(),
                expiration,
            }),
            Err(KvError::ConditionalCheckFailed) => Err(VfError::lock_failed(resource_type.resource_key(resource_id))),
            Err(e) => Err(e.into()),
        }
    }

    /// Renews a held lock, pushing `expiration` forward by `abandonment`.
    /// MUST be called at least every `renewal` while long work is in
    /// progress (§4.2).
    pub async fn renew(&self, handle: &LockHandle) -> Result<LockHandle, VfError> {
        let key = Self::key_for(handle.resource_type, &handle.resource_id);
        let now = self.clock.now();
        let mut expected = Expected::new();
        expected.insert(ATTR_OWNER.to_string(), ExpectedCondition::Value(AttrValue::S(handle.owner_id.clone())));
        let expiration = now + self.abandonment;
        let item = Self::build_item(&handle.owner_id, expiration, now, None);
        self.kv.put_item(LOCK_TABLE, &key, item, Some(expected)).await.map_err(|e| match e {
            KvError::ConditionalCheckFailed => VfError::lock_failed(handle.resource_key()),
            other => other.into(),
        })?;
        Ok(LockHandle { expiration, ..handle.clone() })
    }

    /// `ReleaseLock` (§4.2): a failed release (e.g. lost ownership already)
    /// is not fatal -- callers log and move on, the lock reclaims itself on
    /// timeout regardless.
    pub async fn release(&self, handle: &LockHandle) {
        let key = Self::key_for(handle.resource_type, &handle.resource_id);
        let mut expected = Expected::new();
        expected.insert(ATTR_OWNER.to_string(), ExpectedCondition::Value(AttrValue::S(handle.owner_id.clone())));
        if let Err(e) = self.kv.delete_item(LOCK_TABLE, &key, Some(expected)).await {
            tracing::warn!(resource = %handle.resource_key(), error = %e, "lock release failed, will reclaim on timeout");
        }
    }

    /// Acquires viewpoint locks in globally sorted order to avoid deadlock
    /// (§4.2). On any failure, releases everything acquired so far and
    /// returns the error.
    pub async fn acquire_sorted_viewpoint_locks(
        &self,
        viewpoint_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<LockHandle>, VfError> {
        let mut sorted = viewpoint_ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut handles = Vec::with_capacity(sorted.len());
        for vp_id in &sorted {
            match self.acquire(LockResourceType::Viewpoint, vp_id, owner_id, None).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        self.release(handle).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }
}
