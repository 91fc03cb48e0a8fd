//! Core library for the Viewfinder operation execution engine.
//!
//! Provides the pieces every other crate in the workspace builds on:
//! - the entity model shared across the KV store, executor, and gateway
//! - the error taxonomy (`VfError`) client and infra errors are expressed in
//! - an injectable clock, so executor and scheduler tests run without
//!   wall-clock dependence
//! - the Asset-ID Codec (order-preserving base64hex, timestamp-prefixed and
//!   device/local asset ids, the Post id `+` join)
//! - process-wide configuration

pub mod asset_id;
pub mod clock;
pub mod config;
pub mod errors;
pub mod types;
