//! Concrete `OperationHandler` implementations, one module per RPC method
//! (§6). `vf-scheduler` deserializes a queued `Operation::args` into the
//! matching `*Args` struct and constructs the handler before handing it to
//! `FourPhaseExecutor::execute`.

pub mod add_followers;
pub mod common;
pub mod hide_photos;
pub mod link_identity;
pub mod locks;
pub mod post_comment;
pub mod register_prospective_user;
pub mod remove_followers;
pub mod remove_photos;
pub mod remove_viewpoint;
pub mod share_new;
pub mod terminate_account;
pub mod unshare;
pub mod update_device;
pub mod update_follower;
pub mod update_user_photo;
pub mod update_viewpoint;
pub mod upload_contacts;
pub mod upload_episode;
