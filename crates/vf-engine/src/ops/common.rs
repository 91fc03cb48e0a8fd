//! Shapes shared by more than one operation's args/checkpoint.

use serde::{Deserialize, Serialize};

use vf_core::types::{EpisodeId, PhotoId, UserId};

/// One episode and the photo ids within it the caller named, the shape
/// `hide_photos`/`remove_photos`/`unshare` all take (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodePhotoIds {
    pub episode_id: EpisodeId,
    pub photo_ids: Vec<PhotoId>,
}

/// `(episode_id, photo_id)`, the natural key of a `Post` row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostKey {
    pub episode_id: EpisodeId,
    pub photo_id: PhotoId,
}

/// A contact named by `share_new`/`add_followers`/`upload_contacts`: either
/// an already-registered account, or an identity (email/phone) that may not
/// resolve to any user yet. CHECK phases resolve the latter via a nested
/// `register_prospective_user` request (§4.4, §8 S6) when no `Identity` row
/// points at a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContactIdentifier {
    UserId(UserId),
    IdentityKey(String),
}
