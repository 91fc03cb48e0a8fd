//! Operation Execution Engine (spec §2/§4): the Four-Phase Executor, the
//! entity repositories it drives, and the concrete operation handlers
//! (`ops`) that implement each method in the RPC surface (§6).
//!
//! `vf-scheduler` owns running this crate per-user; this crate owns what
//! one operation *does* once it's the scheduler's turn to run.

pub mod accounting;
pub mod asset_alloc;
pub mod dispatch;
pub mod executor;
pub mod failpoint;
pub mod notification;
pub mod ops;
pub mod store;
