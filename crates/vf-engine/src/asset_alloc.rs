//! Asset-ID Allocator (C8, spec §4.8). Reserves a contiguous range of
//! local ids from `User.asset_id_seq` via a single-attribute atomic
//! increment -- the one CHECK-phase mutation the auditor (`vf_kv::audit`)
//! allows outside the lock/operation tables -- then encodes each reserved
//! id into a caller-chosen asset-id family.
//!
//! No `asset_id.py` survived in the retrieved source pack; the allocation
//! strategy (reserve-range-then-encode) is inferred from spec §4.8's
//! description of `asset_id_seq` as a per-user monotonic counter shared by
//! every asset kind that user mints.

use std::sync::Arc;

use vf_core::asset_id::{construct_device_local_asset_id, construct_timestamp_asset_id, IdPrefix, LocalId};
use vf_core::errors::{error_ids, VfError};
use vf_core::types::UserId;
use vf_kv::KvClient;

use crate::store::Store;

/// Caps a single allocation request so one caller can't starve a user's
/// 64-bit counter, or build a request large enough to be worth quarantining
/// rather than simply retrying (§4.8 edge case: "absurd id count requests").
pub const MAX_IDS_PER_REQUEST: u64 = 10_000;

pub struct AssetIdAllocator<C: KvClient> {
    store: Arc<Store<C>>,
}

impl<C: KvClient> AssetIdAllocator<C> {
    pub fn new(store: Arc<Store<C>>) -> Self {
        AssetIdAllocator { store }
    }

    /// Reserves `count` local ids for `user_id`'s asset_id_seq counter,
    /// returning the first id in the reserved, half-open range
    /// `[first, first + count)`.
    pub async fn reserve(&self, user_id: &UserId, count: u64) -> Result<u64, VfError> {
        if count == 0 {
            return Err(VfError::Programming("asset id reservation of count 0".into()));
        }
        if count > MAX_IDS_PER_REQUEST {
            return Err(VfError::limit_exceeded(
                error_ids::TOO_MANY_ASSET_IDS,
                format!("requested {count} asset ids, max is {MAX_IDS_PER_REQUEST}"),
            ));
        }
        self.store.bump_asset_id_seq(user_id, count).await
    }

    /// Reserves `count` ids and encodes them as timestamp-prefixed asset ids
    /// (photos, episodes, comments, activities) sharing one timestamp and
    /// device id, as the client's own upload batch would.
    pub async fn reserve_timestamp_ids(
        &self,
        user_id: &UserId,
        prefix: IdPrefix,
        timestamp_seconds: u64,
        device_id: u64,
        reverse_ts: bool,
        count: u64,
    ) -> Result<Vec<String>, VfError> {
        let first = self.reserve(user_id, count).await?;
        Ok((first..first + count)
            .map(|local| construct_timestamp_asset_id(prefix, timestamp_seconds, device_id, &LocalId::Int(local), reverse_ts))
            .collect())
    }

    /// Reserves one id and encodes it as a device/local asset id (operation
    /// ids, viewpoint ids).
    pub async fn reserve_device_local_id(&self, user_id: &UserId, prefix: IdPrefix, device_id: u64) -> Result<String, VfError> {
        let first = self.reserve(user_id, 1).await?;
        Ok(construct_device_local_asset_id(prefix, device_id, first))
    }
}
