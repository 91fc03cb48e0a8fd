//! HTTP front door for the Operation Execution Engine (spec §6). Wires the
//! KV backend, lock manager, Four-Phase Executor, Scheduler, and
//! Side-Effect Gateway behind one axum `Router`. Authentication, XSRF
//! handling, and object storage for photo blobs are explicitly out of
//! scope (spec §1) and have no surface here.

pub mod http;
pub mod lockfile;
pub mod state;
