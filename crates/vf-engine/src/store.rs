//! Entity Model repositories (C7, spec §4.7): thin wrappers over the KV
//! Client enforcing per-entity invariants at write time. Each entity is
//! stored as a single JSON blob under a `doc` attribute, with the key
//! attributes duplicated alongside it for range-query filtering -- the KV
//! Client (§4.1) only promises opaque-item CRUD plus range queries over the
//! key, so the item's internal shape is ours to choose.

use std::sync::Arc;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use std::collections::BTreeMap;

use vf_core::errors::VfError;
use vf_core::types::*;
use vf_kv::{AttrUpdate, AttrValue, Expected, ExpectedCondition, Item, Key, KvClient, KvError};

pub mod tables {
    pub const USER: &str = "user";
    pub const DEVICE: &str = "device";
    pub const IDENTITY: &str = "identity";
    pub const VIEWPOINT: &str = "viewpoint";
    pub const FOLLOWER: &str = "follower";
    pub const FOLLOWED: &str = "followed";
    pub const EPISODE: &str = "episode";
    pub const POST: &str = "post";
    pub const USER_POST: &str = "user_post";
    pub const PHOTO: &str = "photo";
    pub const USER_PHOTO: &str = "user_photo";
    pub const COMMENT: &str = "comment";
    pub const ACTIVITY: &str = "activity";
    pub const CONTACT: &str = "contact";
    pub const NOTIFICATION: &str = "notification";
    pub const OPERATION: &str = "operation";
    pub const ACCOUNTING: &str = "accounting";
    pub const NOTIFY_DEDUP: &str = "notify_dedup";
    pub const ID_ALLOCATOR: &str = "id_allocator";
}

const DOC_ATTR: &str = "doc";

fn encode<T: Serialize>(value: &T) -> Item {
    let mut item = Item::new();
    item.insert(DOC_ATTR.to_string(), AttrValue::S(serde_json::to_string(value).expect("serializable entity")));
    item
}

fn decode<T: DeserializeOwned>(item: &Item) -> Result<T, VfError> {
    let raw = item
        .get(DOC_ATTR)
        .and_then(AttrValue::as_str)
        .ok_or_else(|| VfError::Programming("entity row missing doc attribute".into()))?;
    serde_json::from_str(raw).map_err(|e| VfError::Programming(format!("corrupt entity row: {e}")))
}

/// Generic accessor shared by every entity repository below.
pub struct Store<C: KvClient> {
    kv: Arc<C>,
}

impl<C: KvClient> Store<C> {
    pub fn new(kv: Arc<C>) -> Self {
        Store { kv }
    }

    pub fn kv(&self) -> &Arc<C> {
        &self.kv
    }

    async fn get<T: DeserializeOwned>(&self, table: &str, key: &Key) -> Result<Option<T>, VfError> {
        match self.kv.get_item(table, key).await {
            Ok(Some(item)) => Ok(Some(decode(&item)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put<T: Serialize>(&self, table: &str, key: &Key, value: &T, expected: Option<Expected>) -> Result<(), VfError> {
        self.kv.put_item(table, key, encode(value), expected).await.map_err(VfError::from)
    }

    async fn query<T: DeserializeOwned>(&self, table: &str, hash: &str, spec: vf_kv::QuerySpec) -> Result<Vec<T>, VfError> {
        let items = self.kv.query(table, hash, spec).await.map_err(VfError::from)?;
        items.iter().map(decode).collect()
    }

    // --- User -------------------------------------------------------------
    //
    // `asset_id_seq` is split out of the `doc` blob into its own top-level
    // attribute (named `asset_id_seq`, matching `vf_kv::audit::ASSET_ID_SEQ_ATTR`
    // exactly) so the Asset-ID Allocator can bump it with a single-attribute
    // `update_item` during CHECK -- the one mutation `CheckingKvClient`
    // permits on this table (grounded on `op_mgr_db_client.py`).

    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, VfError> {
        match self.kv.get_item(tables::USER, &Key::hash_only(user_id)).await.map_err(VfError::from)? {
            None => Ok(None),
            Some(item) => {
                let mut user: User = decode(&item)?;
                if let Some(seq) = item.get(vf_kv::audit::ASSET_ID_SEQ_ATTR).and_then(AttrValue::as_i64) {
                    user.asset_id_seq = seq as u64;
                }
                Ok(Some(user))
            }
        }
    }

    pub async fn put_user(&self, user: &User) -> Result<(), VfError> {
        let mut item = encode(user);
        item.insert(vf_kv::audit::ASSET_ID_SEQ_ATTR.to_string(), AttrValue::N(user.asset_id_seq as i64));
        self.kv.put_item(tables::USER, &Key::hash_only(&user.user_id), item, None).await.map_err(VfError::from)
    }

    pub async fn require_user(&self, user_id: &UserId) -> Result<User, VfError> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| VfError::not_found(vf_core::errors::error_ids::NO_USER, format!("no such user {user_id}")))
    }

    /// Atomically reserves `count` asset ids for `user_id`, returning the
    /// first id in the reserved range (ids `[first, first+count)` are the
    /// caller's to use). The only CHECK-phase write the auditor allows
    /// outside the lock/operation/id_allocator tables.
    pub async fn bump_asset_id_seq(&self, user_id: &UserId, count: u64) -> Result<u64, VfError> {
        let mut updates = BTreeMap::new();
        updates.insert(vf_kv::audit::ASSET_ID_SEQ_ATTR.to_string(), AttrUpdate::Add(count as i64));
        let item = self
            .kv
            .update_item(tables::USER, &Key::hash_only(user_id), updates, None)
            .await
            .map_err(VfError::from)?;
        let new_seq = item
            .get(vf_kv::audit::ASSET_ID_SEQ_ATTR)
            .and_then(AttrValue::as_i64)
            .ok_or_else(|| VfError::Programming("update_item did not return asset_id_seq".into()))? as u64;
        Ok(new_seq - count)
    }

    /// Mints ids from a process-wide counter row in `tables::ID_ALLOCATOR`
    /// (e.g. new user ids minted by `register_prospective_user`, which has
    /// no existing user whose own `asset_id_seq` it could borrow). Allowed
    /// during CHECK: `ID_ALLOCATOR_TABLE` is on the auditor's always-allow
    /// list alongside locks and operation checkpoints.
    pub async fn allocate_global_id(&self, counter: &str, count: u64) -> Result<u64, VfError> {
        let mut updates = BTreeMap::new();
        updates.insert("seq".to_string(), AttrUpdate::Add(count as i64));
        let item = self
            .kv
            .update_item(tables::ID_ALLOCATOR, &Key::hash_only(counter), updates, None)
            .await
            .map_err(VfError::from)?;
        let new_seq = item
            .get("seq")
            .and_then(AttrValue::as_i64)
            .ok_or_else(|| VfError::Programming("update_item did not return seq".into()))? as u64;
        Ok(new_seq - count)
    }

    // --- Device -------------------------------------------------------------

    pub async fn get_device(&self, user_id: &UserId, device_id: DeviceId) -> Result<Option<Device>, VfError> {
        self.get(tables::DEVICE, &Key::hash_range(user_id, device_id.to_string())).await
    }

    pub async fn put_device(&self, device: &Device) -> Result<(), VfError> {
        self.put(tables::DEVICE, &Key::hash_range(&device.user_id, device.device_id.to_string()), device, None).await
    }

    // --- Identity -------------------------------------------------------------

    pub async fn get_identity(&self, key: &str) -> Result<Option<Identity>, VfError> {
        self.get(tables::IDENTITY, &Key::hash_only(key)).await
    }

    pub async fn put_identity(&self, identity: &Identity) -> Result<(), VfError> {
        self.put(tables::IDENTITY, &Key::hash_only(&identity.key), identity, None).await
    }

    // --- Viewpoint -------------------------------------------------------------

    pub async fn get_viewpoint(&self, viewpoint_id: &ViewpointId) -> Result<Option<Viewpoint>, VfError> {
        self.get(tables::VIEWPOINT, &Key::hash_only(viewpoint_id)).await
    }

    pub async fn require_viewpoint(&self, viewpoint_id: &ViewpointId) -> Result<Viewpoint, VfError> {
        self.get_viewpoint(viewpoint_id)
            .await?
            .ok_or_else(|| VfError::not_found(vf_core::errors::error_ids::NO_VIEWPOINT, format!("no such viewpoint {viewpoint_id}")))
    }

    pub async fn put_viewpoint(&self, viewpoint: &Viewpoint) -> Result<(), VfError> {
        self.put(tables::VIEWPOINT, &Key::hash_only(&viewpoint.viewpoint_id), viewpoint, None).await
    }

    // --- Follower -------------------------------------------------------------

    pub async fn get_follower(&self, user_id: &UserId, viewpoint_id: &ViewpointId) -> Result<Option<Follower>, VfError> {
        self.get(tables::FOLLOWER, &Key::hash_range(user_id, viewpoint_id)).await
    }

    pub async fn require_follower(&self, user_id: &UserId, viewpoint_id: &ViewpointId) -> Result<Follower, VfError> {
        self.get_follower(user_id, viewpoint_id).await?.ok_or_else(|| {
            VfError::permission(
                vf_core::errors::error_ids::NO_FOLLOWER,
                format!("user {user_id} does not follow viewpoint {viewpoint_id}, or it does not exist"),
            )
        })
    }

    pub async fn put_follower(&self, follower: &Follower) -> Result<(), VfError> {
        follower.validate_labels()?;
        self.put(tables::FOLLOWER, &Key::hash_range(&follower.user_id, &follower.viewpoint_id), follower, None).await
    }

    pub async fn query_followers(&self, viewpoint_id: &ViewpointId) -> Result<Vec<Follower>, VfError> {
        // Followers are also keyed (user_id, viewpoint_id); a full fan-out
        // query by viewpoint needs a GSI in a real deployment. For this
        // workspace's in-memory backend we scan and filter, which is fine
        // at test/demo scale and keeps the KV trait free of a second index
        // concept not named in §4.1.
        let all = self.kv.scan(tables::FOLLOWER, vf_kv::ScanSpec::default()).await.map_err(VfError::from)?;
        all.iter()
            .map(decode::<Follower>)
            .filter(|f| matches!(f, Ok(f) if &f.viewpoint_id == viewpoint_id))
            .collect()
    }

    // --- Followed secondary index ----------------------------------------------

    /// `UpdateDateUpdated` (grounded on `backend/db/followed.py`): insert
    /// the new day-bucketed row, then delete the old one, skipping both
    /// when the day bucket hasn't changed.
    pub async fn update_followed(
        &self,
        user_id: &UserId,
        viewpoint_id: &ViewpointId,
        old_timestamp: Option<chrono::DateTime<Utc>>,
        new_timestamp: chrono::DateTime<Utc>,
    ) -> Result<(), VfError> {
        if let Some(old) = old_timestamp {
            if old >= new_timestamp {
                return Ok(());
            }
            if !Followed::day_bucket_changed(old, new_timestamp) {
                return Ok(());
            }
        }
        let new_sort_key = Followed::sort_key(viewpoint_id, new_timestamp);
        let followed = Followed { user_id: user_id.clone(), viewpoint_id: viewpoint_id.clone(), last_updated: new_timestamp };
        self.put(tables::FOLLOWED, &Key::hash_range(user_id, &new_sort_key), &followed, None).await?;

        if let Some(old) = old_timestamp {
            let old_sort_key = Followed::sort_key(viewpoint_id, old);
            let _ = self.kv.delete_item(tables::FOLLOWED, &Key::hash_range(user_id, &old_sort_key), None).await;
        }
        Ok(())
    }

    // --- Episode / Post / UserPost -------------------------------------------------------------

    pub async fn get_episode(&self, episode_id: &EpisodeId) -> Result<Option<Episode>, VfError> {
        self.get(tables::EPISODE, &Key::hash_only(episode_id)).await
    }

    pub async fn require_episode(&self, episode_id: &EpisodeId) -> Result<Episode, VfError> {
        self.get_episode(episode_id)
            .await?
            .ok_or_else(|| VfError::not_found(vf_core::errors::error_ids::NO_EPISODE, format!("no such episode {episode_id}")))
    }

    pub async fn put_episode(&self, episode: &Episode) -> Result<(), VfError> {
        self.put(tables::EPISODE, &Key::hash_only(&episode.episode_id), episode, None).await
    }

    pub async fn get_post(&self, episode_id: &EpisodeId, photo_id: &PhotoId) -> Result<Option<Post>, VfError> {
        self.get(tables::POST, &Key::hash_range(episode_id, photo_id)).await
    }

    pub async fn require_post(&self, episode_id: &EpisodeId, photo_id: &PhotoId) -> Result<Post, VfError> {
        self.get_post(episode_id, photo_id)
            .await?
            .ok_or_else(|| VfError::not_found(vf_core::errors::error_ids::NO_POST, format!("no such post {episode_id}/{photo_id}")))
    }

    pub async fn put_post(&self, post: &Post) -> Result<(), VfError> {
        self.put(tables::POST, &Key::hash_range(&post.episode_id, &post.photo_id), post, None).await
    }

    pub async fn query_posts(&self, episode_id: &EpisodeId) -> Result<Vec<Post>, VfError> {
        self.query(tables::POST, episode_id, vf_kv::QuerySpec::default()).await
    }

    pub async fn get_user_post(&self, user_id: &UserId, post_id: &str) -> Result<Option<UserPost>, VfError> {
        self.get(tables::USER_POST, &Key::hash_range(user_id, post_id)).await
    }

    pub async fn put_user_post(&self, user_post: &UserPost) -> Result<(), VfError> {
        self.put(tables::USER_POST, &Key::hash_range(&user_post.user_id, &user_post.post_id), user_post, None).await
    }

    // --- Photo / UserPhoto -------------------------------------------------------------

    pub async fn get_photo(&self, photo_id: &PhotoId) -> Result<Option<Photo>, VfError> {
        self.get(tables::PHOTO, &Key::hash_only(photo_id)).await
    }

    pub async fn put_photo(&self, photo: &Photo) -> Result<(), VfError> {
        self.put(tables::PHOTO, &Key::hash_only(&photo.photo_id), photo, None).await
    }

    pub async fn get_user_photo(&self, user_id: &UserId, photo_id: &PhotoId) -> Result<Option<UserPhoto>, VfError> {
        self.get(tables::USER_PHOTO, &Key::hash_range(user_id, photo_id)).await
    }

    pub async fn put_user_photo(&self, user_photo: &UserPhoto) -> Result<(), VfError> {
        self.put(tables::USER_PHOTO, &Key::hash_range(&user_photo.user_id, &user_photo.photo_id), user_photo, None).await
    }

    // --- Comment / Activity -------------------------------------------------------------

    pub async fn put_comment(&self, comment: &Comment) -> Result<(), VfError> {
        self.put(tables::COMMENT, &Key::hash_range(&comment.viewpoint_id, &comment.comment_id), comment, None).await
    }

    pub async fn put_activity(&self, activity: &Activity) -> Result<(), VfError> {
        self.put(tables::ACTIVITY, &Key::hash_range(&activity.viewpoint_id, &activity.activity_id), activity, None).await
    }

    // --- Contact -------------------------------------------------------------

    pub async fn get_contact(&self, user_id: &UserId, contact_id: &str) -> Result<Option<Contact>, VfError> {
        self.get(tables::CONTACT, &Key::hash_range(user_id, contact_id)).await
    }

    pub async fn put_contact(&self, contact: &Contact) -> Result<(), VfError> {
        self.put(tables::CONTACT, &Key::hash_range(&contact.user_id, &contact.contact_id), contact, None).await
    }

    pub async fn delete_contact(&self, user_id: &UserId, contact_id: &str) -> Result<(), VfError> {
        self.kv.delete_item(tables::CONTACT, &Key::hash_range(user_id, contact_id), None).await.map_err(VfError::from)
    }

    pub async fn query_contacts(&self, user_id: &UserId) -> Result<Vec<Contact>, VfError> {
        self.query(tables::CONTACT, user_id, vf_kv::QuerySpec::default()).await
    }

    // --- Operation row -------------------------------------------------------------

    pub async fn get_operation(&self, user_id: &UserId, operation_id: &OperationId) -> Result<Option<Operation>, VfError> {
        self.get(tables::OPERATION, &Key::hash_range(user_id, operation_id)).await
    }

    pub async fn put_operation(&self, op: &Operation) -> Result<(), VfError> {
        self.put(tables::OPERATION, &Key::hash_range(&op.user_id, &op.operation_id), op, None).await
    }

    pub async fn delete_operation(&self, user_id: &UserId, operation_id: &OperationId) -> Result<(), VfError> {
        self.kv.delete_item(tables::OPERATION, &Key::hash_range(user_id, operation_id), None).await.map_err(VfError::from)
    }

    pub async fn scan_pending_ops(&self, user_id: &UserId, start_after: Option<String>, limit: usize) -> Result<Vec<Operation>, VfError> {
        self.query(
            tables::OPERATION,
            user_id,
            vf_kv::QuerySpec { limit: Some(limit), start_after, ..Default::default() },
        )
        .await
    }

    /// Broad scan for startup orphan discovery (§4.4): every distinct
    /// `user_id` with at least one pending `Operation` row. The item's
    /// `doc` blob already carries `user_id`, so a full-table `Scan` (§4.1)
    /// needs no separate key index -- just dedup the decoded rows.
    pub async fn scan_users_with_pending_ops(&self) -> Result<Vec<UserId>, VfError> {
        let items = self.kv.scan(tables::OPERATION, vf_kv::ScanSpec::default()).await.map_err(VfError::from)?;
        let mut users = std::collections::BTreeSet::new();
        for item in &items {
            let op: Operation = decode(item)?;
            users.insert(op.user_id);
        }
        Ok(users.into_iter().collect())
    }

    // --- Accounting -------------------------------------------------------------

    pub async fn get_accounting(&self, hash_key: &str, sort_key: &str) -> Result<AccountingCounters, VfError> {
        Ok(self.get(tables::ACCOUNTING, &Key::hash_range(hash_key, sort_key)).await?.unwrap_or_default())
    }

    pub async fn put_accounting(&self, hash_key: &str, sort_key: &str, counters: &AccountingCounters) -> Result<(), VfError> {
        self.put(tables::ACCOUNTING, &Key::hash_range(hash_key, sort_key), counters, None).await
    }

    // --- Notification -------------------------------------------------------------

    /// Notification ids sort as plain decimal strings under the KV layer's
    /// lexicographic range query, so the sort key is zero-padded rather than
    /// `to_string()`'d directly (otherwise "10" would sort before "9").
    fn notification_sort_key(notification_id: NotificationId) -> String {
        format!("{notification_id:020}")
    }

    pub async fn put_notification(&self, notification: &Notification) -> Result<(), VfError> {
        let mut expected = Expected::new();
        expected.insert("doc".to_string(), ExpectedCondition::NotExists);
        match self
            .kv
            .put_item(
                tables::NOTIFICATION,
                &Key::hash_range(&notification.user_id, Self::notification_sort_key(notification.notification_id)),
                encode(notification),
                Some(expected),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(KvError::ConditionalCheckFailed) => Err(VfError::ConditionalCheckFailed),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_latest_notification(&self, user_id: &UserId) -> Result<Option<Notification>, VfError> {
        let rows = self
            .query::<Notification>(
                tables::NOTIFICATION,
                user_id,
                vf_kv::QuerySpec { reverse: true, limit: Some(1), ..Default::default() },
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_max_notification_id(&self, user_id: &UserId) -> Result<NotificationId, VfError> {
        Ok(self.get_latest_notification(user_id).await?.map(|n| n.notification_id).unwrap_or(0))
    }

    pub async fn get_notification(&self, user_id: &UserId, notification_id: NotificationId) -> Result<Option<Notification>, VfError> {
        self.get(tables::NOTIFICATION, &Key::hash_range(user_id, Self::notification_sort_key(notification_id))).await
    }

    /// NOTIFY-phase dedup keyed by operation id, written just *before* the
    /// notification row it points to (the KV Client has no cross-key
    /// transactions, per §1's Non-goals, so the two writes still aren't
    /// atomic). A crash between the two leaves a dedup row pointing at an
    /// id with no notification yet; `NotificationManager::notify` recovers
    /// by re-allocating that same id on replay rather than minting a new
    /// one, so the dedup row is always an idempotent overwrite, never a
    /// stale pointer to an id that got skipped.
    pub async fn get_notify_dedup(&self, user_id: &UserId, op_id: &OperationId) -> Result<Option<NotificationId>, VfError> {
        let item = self.kv.get_item(tables::NOTIFY_DEDUP, &Key::hash_range(user_id, op_id)).await.map_err(VfError::from)?;
        Ok(item.and_then(|item| item.get("notification_id").and_then(AttrValue::as_i64)).map(|n| n as NotificationId))
    }

    pub async fn put_notify_dedup(&self, user_id: &UserId, op_id: &OperationId, notification_id: NotificationId) -> Result<(), VfError> {
        let mut item = Item::new();
        item.insert("notification_id".to_string(), AttrValue::N(notification_id as i64));
        self.kv.put_item(tables::NOTIFY_DEDUP, &Key::hash_range(user_id, op_id), item, None).await.map_err(VfError::from)
    }

    pub async fn query_notifications_since(
        &self,
        user_id: &UserId,
        start_after: Option<NotificationId>,
        limit: usize,
    ) -> Result<Vec<Notification>, VfError> {
        self.query(
            tables::NOTIFICATION,
            user_id,
            vf_kv::QuerySpec { limit: Some(limit), start_after: start_after.map(Self::notification_sort_key), ..Default::default() },
        )
        .await
    }
}
