//! Toursync Server Library
//!
//! HTTP-triggered synchronization of Korean tourism open-data into Postgres.
//!
//! # Overview
//!
//! The server pulls paginated listings from three fixed upstream tourism
//! APIs, normalizes their heterogeneous response envelopes into flat rows,
//! and reconciles the rows against the destination tables by key and
//! content hash (insert/update, never delete):
//!
//! - **Fetch**: per-source endpoint resolution, layered retry/fallback
//!   strategies, envelope validation, connectivity probes
//! - **Mapper**: envelope unwrapping, per-source field projection, content
//!   hashing
//! - **Sync**: key/hash diffing against existing rows, bounded batch
//!   writes, audit logging to `sync_logs`
//! - **Orchestrator**: sequential per-source pipeline with aggregate run
//!   reporting
//!
//! A run is triggered through a single HTTP endpoint (any method) and
//! always completes: individual source failures are recorded in the run
//! report, never escalated. Only pre-flight failures (missing upstream
//! decoding key, unreachable database) abort a run before it starts.
//!
//! # Framework Stack
//!
//! - **Axum**: HTTP trigger surface
//! - **SQLx**: Postgres access and startup migrations
//! - **Reqwest**: upstream API client

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod mapper;
pub mod orchestrator;
pub mod source;
pub mod sync;

// Re-export commonly used types
pub use error::{AppError, FetchError, SyncError};
pub use source::SourceKind;
