//! Entity model (spec §3): the shared graph the operation engine mutates.
//! Thin data holders here; the write-time invariants they describe are
//! enforced by the repositories in `vf-engine::repo`, not by these types
//! themselves (mirrors the teacher's split between `types.rs` as plain
//! data and a separate store layer owning writes).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VfError;

pub type UserId = String;
pub type ViewpointId = String;
pub type EpisodeId = String;
pub type PhotoId = String;
pub type CommentId = String;
pub type ActivityId = String;
pub type OperationId = String;
pub type DeviceId = u64;
pub type NotificationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Prospective,
    Registered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub name: Option<String>,
    pub private_vp_id: ViewpointId,
    pub webapp_dev_id: DeviceId,
    pub asset_id_seq: u64,
    pub registration_state: RegistrationState,
    pub terminated: bool,
}

impl User {
    pub fn new(user_id: UserId, private_vp_id: ViewpointId, webapp_dev_id: DeviceId) -> Self {
        User {
            user_id,
            name: None,
            private_vp_id,
            webapp_dev_id,
            asset_id_seq: 0,
            registration_state: RegistrationState::Prospective,
            terminated: false,
        }
    }

    pub fn can_log_in(&self) -> bool {
        !self.terminated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEnvironment {
    Dev,
    Ent,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushScheme {
    Apns,
    Gcm,
}

/// `<scheme>-<env>:<opaque>`, e.g. `apns-prod:deadbeef...` (§4.9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    pub scheme: PushScheme,
    pub env: PushEnvironment,
    pub opaque: String,
}

impl PushToken {
    pub fn parse(s: &str) -> Result<Self, VfError> {
        let (head, opaque) = s
            .split_once(':')
            .ok_or_else(|| VfError::invalid_request("INVALID_PUSH_TOKEN", format!("{s:?} missing ':'")))?;
        let (scheme, env) = head
            .split_once('-')
            .ok_or_else(|| VfError::invalid_request("INVALID_PUSH_TOKEN", format!("{s:?} missing '-'")))?;
        let scheme = match scheme {
            "apns" => PushScheme::Apns,
            "gcm" => PushScheme::Gcm,
            other => {
                return Err(VfError::invalid_request(
                    "INVALID_PUSH_TOKEN",
                    format!("unknown scheme {other:?}"),
                ))
            }
        };
        let env = match env {
            "dev" => PushEnvironment::Dev,
            "ent" => PushEnvironment::Ent,
            "prod" => PushEnvironment::Prod,
            other => {
                return Err(VfError::invalid_request("INVALID_PUSH_TOKEN", format!("unknown env {other:?}")))
            }
        };
        Ok(PushToken { scheme, env, opaque: opaque.to_string() })
    }
}

impl std::fmt::Display for PushToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            PushScheme::Apns => "apns",
            PushScheme::Gcm => "gcm",
        };
        let env = match self.env {
            PushEnvironment::Dev => "dev",
            PushEnvironment::Ent => "ent",
            PushEnvironment::Prod => "prod",
        };
        write!(f, "{scheme}-{env}:{}", self.opaque)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub push_token: Option<PushToken>,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub last_access: Option<DateTime<Utc>>,
    /// The user this device currently alerts for. A push token may be
    /// claimed by at most one device; on conflict the prior device's token
    /// is cleared by the repository layer.
    pub alert_user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub authority: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
}

impl Identity {
    /// Canonical key form: lowercase email local-part/domain for
    /// `Email:...`, E.164 for `Phone:...`. Callers provide an
    /// already-validated `canonical_value`; this just joins the pair.
    pub fn make_key(scheme: &str, canonical_value: &str) -> String {
        format!("{scheme}:{canonical_value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewpointType {
    Default,
    Event,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewpoint {
    pub viewpoint_id: ViewpointId,
    pub viewpoint_type: ViewpointType,
    pub owner_id: UserId,
    pub update_seq: u64,
    pub title: Option<String>,
    pub cover_photo: Option<PhotoId>,
}

impl Viewpoint {
    pub fn bump_update_seq(&mut self) -> u64 {
        self.update_seq += 1;
        self.update_seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowerLabel {
    Admin,
    Contribute,
    Personal,
    Removed,
    Unrevivable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follower {
    pub user_id: UserId,
    pub viewpoint_id: ViewpointId,
    pub labels: BTreeSet<FollowerLabel>,
    pub viewed_seq: u64,
    pub adding_user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl Follower {
    pub fn is_removed(&self) -> bool {
        self.labels.contains(&FollowerLabel::Removed)
    }

    /// Invariant (i), §3: at least one of {admin, contribute, personal}
    /// unless removed; once removed, no label is removable.
    pub fn validate_labels(&self) -> Result<(), VfError> {
        if self.is_removed() {
            return Ok(());
        }
        let has_standing_label = self.labels.iter().any(|l| {
            matches!(l, FollowerLabel::Admin | FollowerLabel::Contribute | FollowerLabel::Personal)
        });
        if !has_standing_label {
            return Err(VfError::invalid_request(
                crate::errors::error_ids::FOLLOWER_MUST_HAVE_LABEL,
                format!(
                    "follower {}/{} has no admin/contribute/personal label",
                    self.user_id, self.viewpoint_id
                ),
            ));
        }
        Ok(())
    }

    pub fn set_labels(&mut self, labels: BTreeSet<FollowerLabel>) -> Result<(), VfError> {
        if self.is_removed() {
            return Err(VfError::invalid_request(
                crate::errors::error_ids::REMOVED_FOLLOWER_IMMUTABLE,
                format!("follower {}/{} is removed and immutable", self.user_id, self.viewpoint_id),
            ));
        }
        self.labels = labels;
        self.validate_labels()
    }

    /// Invariant (ii), §3: `viewed_seq <= update_seq`, `viewed_seq` monotonic.
    pub fn advance_viewed_seq(&mut self, new_viewed_seq: u64, current_update_seq: u64) -> Result<(), VfError> {
        if new_viewed_seq > current_update_seq {
            return Err(VfError::Programming(format!(
                "viewed_seq {new_viewed_seq} would exceed update_seq {current_update_seq}"
            )));
        }
        if new_viewed_seq > self.viewed_seq {
            self.viewed_seq = new_viewed_seq;
        }
        Ok(())
    }
}

/// Secondary index row over a user's followed viewpoints, sorted by
/// `(-truncated_day(last_updated), viewpoint_id)` (§3). We materialize the
/// sort key as a string so the KV layer's lexicographic range query does
/// the ordering work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followed {
    pub user_id: UserId,
    pub viewpoint_id: ViewpointId,
    pub last_updated: DateTime<Utc>,
}

impl Followed {
    fn truncated_day(ts: DateTime<Utc>) -> i64 {
        ts.timestamp() / 86_400
    }

    /// Ascending string order on this key yields descending day order
    /// (newest first), then ascending viewpoint_id as a tiebreak.
    pub fn sort_key(viewpoint_id: &str, last_updated: DateTime<Utc>) -> String {
        let day = Self::truncated_day(last_updated);
        let inverted = i64::MAX - day;
        format!("{inverted:020}:{viewpoint_id}")
    }

    pub fn day_bucket_changed(old: DateTime<Utc>, new: DateTime<Utc>) -> bool {
        Self::truncated_day(old) != Self::truncated_day(new)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: EpisodeId,
    pub user_id: UserId,
    pub viewpoint_id: ViewpointId,
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub episode_id: EpisodeId,
    pub photo_id: PhotoId,
    /// Per-post visibility: unshared from the viewpoint (all followers lose it).
    pub unshared: bool,
    /// Per-post removal: contributor revoked it (stronger than unshared).
    pub removed: bool,
}

impl Post {
    pub fn post_id(&self) -> Result<String, VfError> {
        crate::asset_id::construct_post_id(&self.episode_id, &self.photo_id)
    }
}

/// Per-user label on a post (§10.6), distinct from `Post::unshared`/`removed`
/// which are viewpoint-wide. Backs `hide_photos`, which flips only personal
/// visibility and carries no ACCOUNT phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPost {
    pub user_id: UserId,
    pub post_id: String,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub photo_id: PhotoId,
    pub user_id: UserId,
    pub aspect_ratio: Option<f64>,
    pub content_type: Option<String>,
    /// Largest uploaded image size in bytes, the source of the `size_bytes`
    /// accounting counter (§3); `None` until the client finishes uploading.
    pub size_bytes: Option<i64>,
}

/// Per-user asset-key fingerprints for a photo (§10.6), used by
/// `update_user_photo` to dedup client-supplied asset keys (e.g. Apple
/// Photos local identifiers) without storing every raw key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPhoto {
    pub user_id: UserId,
    pub photo_id: PhotoId,
    pub asset_fingerprints: BTreeSet<String>,
}

impl UserPhoto {
    pub fn merge_asset_keys(&mut self, keys: impl IntoIterator<Item = String>) {
        self.asset_fingerprints.extend(keys);
    }
}

/// A user's address-book contact (§6 `upload_contacts`), grounded on
/// `backend/op/upload_contacts_op.py` and `backend/db/contact.py`.
/// `contact_id` is a fingerprint of the contact's identities so
/// re-uploading the same contact (e.g. after a client re-sync) is a no-op
/// rather than a duplicate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub contact_id: String,
    pub name: Option<String>,
    pub identities: Vec<String>,
    pub removed: bool,
    pub timestamp: DateTime<Utc>,
}

impl Contact {
    /// Matches `backend/db/contact.py`'s per-account cap, enforced during
    /// CHECK against the post-upload non-removed contact count.
    pub const MAX_CONTACTS_LIMIT: usize = 10_000;

    /// Deterministic across identical identity sets regardless of input
    /// order -- the source computes this as a hash of contact properties;
    /// here the sorted, joined identity list is itself the fingerprint,
    /// which is simpler and just as collision-free for already-canonical
    /// identity keys (§3 Identity invariant).
    pub fn compute_contact_id(name: Option<&str>, identities: &[String]) -> String {
        let mut sorted = identities.to_vec();
        sorted.sort();
        match name {
            Some(n) => format!("{n}:{}", sorted.join(",")),
            None => sorted.join(","),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub viewpoint_id: ViewpointId,
    pub comment_id: CommentId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub viewpoint_id: ViewpointId,
    pub activity_id: ActivityId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidateViewpoint {
    pub viewpoint_id: ViewpointId,
    #[serde(default)]
    pub get_attributes: bool,
    #[serde(default)]
    pub get_followers: bool,
    #[serde(default)]
    pub get_activities: bool,
    #[serde(default)]
    pub get_episodes: bool,
    #[serde(default)]
    pub get_comments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateEpisode {
    pub episode_id: EpisodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateContacts {
    pub start_key: Option<String>,
}

/// Coarse-grained cache-invalidation payload echoed to the client (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidateSpec {
    #[serde(default)]
    pub viewpoints: Vec<InvalidateViewpoint>,
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub episodes: Vec<InvalidateEpisode>,
    #[serde(default)]
    pub contacts: Option<InvalidateContacts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub notification_id: NotificationId,
    pub name: String,
    pub op_id: Option<OperationId>,
    pub sender_id: Option<UserId>,
    pub sender_device_id: Option<DeviceId>,
    pub timestamp: DateTime<Utc>,
    pub invalidate: InvalidateSpec,
    pub viewpoint_id: Option<ViewpointId>,
    pub activity_id: Option<ActivityId>,
    pub update_seq: Option<u64>,
    pub viewed_seq: Option<u64>,
    pub badge: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub user_id: UserId,
    pub operation_id: OperationId,
    pub method: String,
    pub args: serde_json::Value,
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub checkpoint: Option<serde_json::Value>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub quarantined: bool,
}

impl Operation {
    pub fn new(
        user_id: UserId,
        operation_id: OperationId,
        device_id: DeviceId,
        method: impl Into<String>,
        args: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Operation {
            user_id,
            operation_id,
            method: method.into(),
            args,
            device_id,
            timestamp,
            attempts: 0,
            checkpoint: None,
            backoff_until: None,
            quarantined: false,
        }
    }
}

/// Resource family a `Lock` row belongs to, grounded on
/// `backend/db/lock_resource_type.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockResourceType {
    Job,
    Operation,
    Viewpoint,
}

impl LockResourceType {
    pub fn prefix(self) -> &'static str {
        match self {
            LockResourceType::Job => "job",
            LockResourceType::Operation => "op",
            LockResourceType::Viewpoint => "vp",
        }
    }

    pub fn resource_key(self, resource_id: &str) -> String {
        format!("{}:{resource_id}", self.prefix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub resource_type: LockResourceType,
    pub resource_id: String,
    pub owner_id: String,
    pub expiration: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
}

/// Counters for one `(hash_key, sort_key)` accounting scope (§3, §4.7).
/// Idempotent via `op_ids`: `apply_delta` is a no-op if `op_id` was already
/// recorded, so retried ACCOUNT phases never double-count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountingCounters {
    pub size_bytes: i64,
    pub num_photos: i64,
    pub num_conversations: i64,
    pub op_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountingDelta {
    pub size_bytes: i64,
    pub num_photos: i64,
    pub num_conversations: i64,
}

impl AccountingCounters {
    pub fn has_applied(&self, op_id: &str) -> bool {
        self.op_ids.contains(op_id)
    }

    /// Returns `true` if the delta was newly applied, `false` if `op_id`
    /// had already contributed (idempotent replay).
    pub fn apply_delta(&mut self, op_id: &str, delta: AccountingDelta) -> bool {
        if self.has_applied(op_id) {
            return false;
        }
        self.size_bytes += delta.size_bytes;
        self.num_photos += delta.num_photos;
        self.num_conversations += delta.num_conversations;
        self.op_ids.insert(op_id.to_string());
        true
    }
}

/// Accounting scope hash-key builders (§3): `ow:<user>` (user-owned),
/// `sb:<user>:<vp>` (shared-by), `vs:<vp>` (viewpoint-visible).
pub mod accounting_scope {
    use super::{UserId, ViewpointId};

    pub fn owned_by(user_id: &UserId) -> String {
        format!("ow:{user_id}")
    }

    pub fn shared_by(user_id: &UserId, viewpoint_id: &ViewpointId) -> String {
        format!("sb:{user_id}:{viewpoint_id}")
    }

    pub fn visible_in(viewpoint_id: &ViewpointId) -> String {
        format!("vs:{viewpoint_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_token_round_trips() {
        let token = PushToken { scheme: PushScheme::Apns, env: PushEnvironment::Prod, opaque: "abc123".into() };
        let s = token.to_string();
        assert_eq!(s, "apns-prod:abc123");
        let parsed = PushToken::parse(&s).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn follower_label_invariant_rejects_empty_unless_removed() {
        let mut f = Follower {
            user_id: "u1".into(),
            viewpoint_id: "v1".into(),
            labels: BTreeSet::new(),
            viewed_seq: 0,
            adding_user_id: None,
            timestamp: Utc::now(),
        };
        assert!(f.validate_labels().is_err());
        f.labels.insert(FollowerLabel::Removed);
        assert!(f.validate_labels().is_ok());
    }

    #[test]
    fn follower_viewed_seq_cannot_exceed_update_seq() {
        let mut f = Follower {
            user_id: "u1".into(),
            viewpoint_id: "v1".into(),
            labels: BTreeSet::from([FollowerLabel::Admin]),
            viewed_seq: 0,
            adding_user_id: None,
            timestamp: Utc::now(),
        };
        assert!(f.advance_viewed_seq(5, 3).is_err());
        assert!(f.advance_viewed_seq(3, 5).is_ok());
        assert_eq!(f.viewed_seq, 3);
        // monotonic: a lower value doesn't regress it
        f.advance_viewed_seq(1, 5).unwrap();
        assert_eq!(f.viewed_seq, 3);
    }

    #[test]
    fn removed_follower_is_immutable() {
        let mut f = Follower {
            user_id: "u1".into(),
            viewpoint_id: "v1".into(),
            labels: BTreeSet::from([FollowerLabel::Removed]),
            viewed_seq: 0,
            adding_user_id: None,
            timestamp: Utc::now(),
        };
        assert!(f.set_labels(BTreeSet::from([FollowerLabel::Admin])).is_err());
    }

    #[test]
    fn followed_sort_key_orders_newest_day_first() {
        let older = Followed::sort_key("v1", DateTime::from_timestamp(0, 0).unwrap());
        let newer = Followed::sort_key("v1", DateTime::from_timestamp(86_400 * 10, 0).unwrap());
        assert!(newer < older);
    }

    #[test]
    fn accounting_delta_applies_once_per_op_id() {
        let mut counters = AccountingCounters::default();
        let delta = AccountingDelta { size_bytes: 100, num_photos: 1, num_conversations: 0 };
        assert!(counters.apply_delta("op1", delta));
        assert!(!counters.apply_delta("op1", delta));
        assert_eq!(counters.size_bytes, 100);
        assert_eq!(counters.num_photos, 1);
    }

    #[test]
    fn lock_resource_key_uses_expected_prefixes() {
        assert_eq!(LockResourceType::Operation.resource_key("u1"), "op:u1");
        assert_eq!(LockResourceType::Viewpoint.resource_key("v1"), "vp:v1");
        assert_eq!(LockResourceType::Job.resource_key("j1"), "job:j1");
    }
}
