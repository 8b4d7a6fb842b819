//! Monthly billing lifecycle for SES staffing: supplier orders, client requests, contract ledger
//! and order batches.

pub mod billing;
pub mod config;
pub mod error;
pub mod telemetry;
