//! Operation method table (§9 "dynamic typing -> tagged variants"): the
//! `vf-scheduler` drain loop reaches the engine through a single
//! `dispatch` entry point so it never needs to know about individual
//! handler or checkpoint types. Argument decoding happens here, once, per
//! `CreateAndExecute` invocation (§4.3), against each method's `*Args`
//! shape -- the target-language rendering of the source's per-method
//! introspected-arg-list callable map.

use vf_core::clock::SharedClock;
use vf_core::errors::VfError;
use vf_core::types::Operation as OpRow;
use vf_kv::KvClient;

use crate::executor::{ExecutionOutcome, FourPhaseExecutor};
use crate::ops::*;

/// Every `vf-scheduler`-callable method name, in no particular order; used
/// to validate `CreateAndExecute` requests before a row is ever written.
pub const KNOWN_METHODS: &[&str] = &[
    "upload_episode",
    "share_new",
    "add_followers",
    "remove_followers",
    "remove_viewpoint",
    "update_viewpoint",
    "update_follower",
    "update_user_photo",
    "post_comment",
    "hide_photos",
    "remove_photos",
    "unshare",
    "update_device",
    "link_identity",
    "register_prospective_user",
    "terminate_account",
    "upload_contacts",
];

fn decode<T: serde::de::DeserializeOwned>(op_row: &OpRow) -> Result<T, VfError> {
    serde_json::from_value(op_row.args.clone())
        .map_err(|e| VfError::invalid_request("MALFORMED_OPERATION_ARGS", format!("{}: {e}", op_row.method)))
}

/// Decodes `op_row.args` per `op_row.method` and runs it through the
/// Four-Phase Executor. The caller (`vf-scheduler`) is responsible for
/// holding whatever viewpoint/user-op locks `ops::locks::viewpoint_locks_for`
/// says this method needs before calling in.
pub async fn dispatch<C: KvClient>(
    executor: &FourPhaseExecutor<C>,
    clock: SharedClock,
    op_row: &mut OpRow,
) -> Result<ExecutionOutcome, VfError> {
    match op_row.method.as_str() {
        "upload_episode" => {
            let args: upload_episode::UploadEpisodeArgs = decode(op_row)?;
            executor.execute(&upload_episode::UploadEpisodeHandler::new(args, clock), op_row).await
        }
        "share_new" => {
            let args: share_new::ShareNewArgs = decode(op_row)?;
            executor.execute(&share_new::ShareNewHandler::new(args, clock), op_row).await
        }
        "add_followers" => {
            let args: add_followers::AddFollowersArgs = decode(op_row)?;
            executor.execute(&add_followers::AddFollowersHandler::new(args, clock), op_row).await
        }
        "remove_viewpoint" => {
            let args: remove_viewpoint::RemoveViewpointArgs = decode(op_row)?;
            executor.execute(&remove_viewpoint::RemoveViewpointHandler::new(args, clock), op_row).await
        }
        "remove_followers" => {
            let args: remove_followers::RemoveFollowersArgs = decode(op_row)?;
            executor.execute(&remove_followers::RemoveFollowersHandler::new(args, clock), op_row).await
        }
        "update_viewpoint" => {
            let args: update_viewpoint::UpdateViewpointArgs = decode(op_row)?;
            executor.execute(&update_viewpoint::UpdateViewpointHandler::new(args, clock), op_row).await
        }
        "update_user_photo" => {
            let args: update_user_photo::UpdateUserPhotoArgs = decode(op_row)?;
            executor.execute(&update_user_photo::UpdateUserPhotoHandler::new(args, clock), op_row).await
        }
        "upload_contacts" => {
            let args: upload_contacts::UploadContactsArgs = decode(op_row)?;
            executor.execute(&upload_contacts::UploadContactsHandler::new(args, clock), op_row).await
        }
        "update_follower" => {
            let args: update_follower::UpdateFollowerArgs = decode(op_row)?;
            executor.execute(&update_follower::UpdateFollowerHandler::new(args, clock), op_row).await
        }
        "post_comment" => {
            let args: post_comment::PostCommentArgs = decode(op_row)?;
            executor.execute(&post_comment::PostCommentHandler::new(args, clock), op_row).await
        }
        "hide_photos" => {
            let args: hide_photos::HidePhotosArgs = decode(op_row)?;
            executor.execute(&hide_photos::HidePhotosHandler::new(args, clock), op_row).await
        }
        "remove_photos" => {
            let args: remove_photos::RemovePhotosArgs = decode(op_row)?;
            executor.execute(&remove_photos::RemovePhotosHandler::new(args, clock), op_row).await
        }
        "unshare" => {
            let args: unshare::UnshareArgs = decode(op_row)?;
            executor.execute(&unshare::UnshareHandler::new(args, clock), op_row).await
        }
        "update_device" => {
            let args: update_device::UpdateDeviceArgs = decode(op_row)?;
            executor.execute(&update_device::UpdateDeviceHandler::new(args, clock), op_row).await
        }
        "link_identity" => {
            let args: link_identity::LinkIdentityArgs = decode(op_row)?;
            executor.execute(&link_identity::LinkIdentityHandler::new(args, clock), op_row).await
        }
        "register_prospective_user" => {
            let args: register_prospective_user::RegisterProspectiveUserArgs = decode(op_row)?;
            executor.execute(&register_prospective_user::RegisterProspectiveUserHandler::new(args, clock), op_row).await
        }
        "terminate_account" => {
            let args: terminate_account::TerminateAccountArgs = decode(op_row)?;
            executor.execute(&terminate_account::TerminateAccountHandler::new(args, clock), op_row).await
        }
        other => Err(VfError::invalid_request("UNKNOWN_OPERATION_METHOD", format!("no handler registered for {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_method_round_trips_through_dispatch_s_match() {
        // Not exhaustive type-checking (that's the compiler's job), just a
        // reminder to keep KNOWN_METHODS and the match arms in dispatch()
        // in sync whenever a new op module is added.
        assert_eq!(KNOWN_METHODS.len(), 17);
    }
}
