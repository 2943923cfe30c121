//! # SQL Approval Gate Library
//!
//! Classify untrusted SQL, assess its estimated plan against risk
//! thresholds, and run approved statements read-only with a row cap, a time
//! budget and an append-only audit trail.
//!
//! # Modules
//!
//! - [`query`] - Normalizer and read-only classifier
//! - [`whitelist`] - Table allow list and catalog schema blocking
//! - [`connector`] - PostgreSQL, MySQL and Snowflake backends
//! - [`plan`] - EXPLAIN adapters and plan metrics
//! - [`risk`] - Threshold rules and verdicts
//! - [`gate`] - Review, bounded execution and screening
//! - [`audit`] - SQLite audit log
//! - [`provenance`] - Table ingestion lineage
//! - [`config`] - Configuration loading
//! - [`output`] - Result formatting
//! - [`error`] - Error types and constructors

pub mod app;
pub mod audit;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod gate;
pub mod logging;
pub mod output;
pub mod plan;
pub mod provenance;
pub mod query;
pub mod risk;
pub mod whitelist;
