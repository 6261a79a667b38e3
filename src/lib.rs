//! Tollgate - Per-Identity Rate Limiting for Object Storage
//!
//! This crate decides, per request, whether an S3-compatible object storage
//! call may proceed. Callers are identified from their signed credentials,
//! mapped to a quota tier, and counted against sliding request and bandwidth
//! windows held in memory. Tier tables can be reloaded at runtime without
//! interrupting traffic.

pub mod config;
pub mod error;
pub mod ratelimit;
