//! Viewpoint lock scoping (§4.5, grounded on `backend/op/viewpoint_lock_tracker.py`).
//!
//! `FourPhaseExecutor` never acquires locks itself -- by the time `execute`
//! runs, the caller already holds whatever it needs. `vf-scheduler` calls
//! `viewpoint_locks_for` before invoking the executor to learn which
//! viewpoint ids (if any) a method needs locked, then acquires them all
//! (sorted, to avoid deadlock between concurrent operations racing on
//! overlapping viewpoint sets) via `vf_lock::LockManager::acquire_sorted_viewpoint_locks`.

use serde_json::Value;

use vf_core::types::{UserId, ViewpointId};

/// Returns the viewpoint ids `method` needs locked for the duration of one
/// `FourPhaseExecutor::execute` call, given its still-undeserialized args
/// and the operation's owning user (needed for methods that lock the
/// caller's own private viewpoint rather than one named in `args`).
///
/// Methods not listed need no viewpoint lock at all (e.g. `link_identity`,
/// `update_device`): they touch nothing another concurrent operation on
/// the same viewpoint could race with.
pub fn viewpoint_locks_for(method: &str, args: &Value, private_vp_id: &ViewpointId) -> Vec<ViewpointId> {
    let named = |key: &str| -> Option<ViewpointId> { args.get(key).and_then(Value::as_str).map(str::to_string) };

    match method {
        "hide_photos" | "remove_photos" | "upload_episode" => vec![private_vp_id.clone()],
        "add_followers" | "remove_followers" | "remove_viewpoint" | "update_viewpoint" | "update_follower" | "unshare" | "post_comment" => {
            named("viewpoint_id").into_iter().collect()
        }
        // share_new mints a brand new viewpoint id during CHECK; nothing
        // to lock up front since no other operation can yet name it.
        "share_new" => Vec::new(),
        _ => Vec::new(),
    }
}

/// `register_prospective_user` runs nested, under the inviting user's own
/// context; it never locks a viewpoint of its own (its new user's private
/// viewpoint doesn't exist until UPDATE creates it).
pub fn nested_operation_owner(inviter_id: &UserId) -> UserId {
    inviter_id.clone()
}
