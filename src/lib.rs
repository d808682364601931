//! commentary: deduplicate raw social comments and enrich them with sentiment labels
//!
//! The pipeline runs in stages that only talk to each other through the
//! status columns of a SQLite store:
//! - transform: raw rows are cleaned, validated and collapsed into canonical records
//! - enrich: canonical records are classified by an external service
//! - secondary: negative records are scored for extremeness
//! - promote: fully classified records are copied into the enriched table once

pub mod classify;
pub mod commands;
pub mod config;
pub mod error;
pub mod meta;
pub mod progress;
pub mod rate_limit;
pub mod transform;
