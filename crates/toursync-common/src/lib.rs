//! Toursync Common Library
//!
//! Shared utilities for the Toursync workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by both the server and the CLI:
//!
//! - **Error Handling**: The shared [`ToursyncError`] type
//! - **Content Hashing**: Order-independent record digests for change detection
//! - **Logging**: Centralized `tracing` initialization
//!
//! # Example
//!
//! ```
//! use toursync_common::hash::content_hash;
//! use serde_json::json;
//!
//! let item = json!({"contentid": "7", "title": "Park"});
//! let digest = content_hash(&item);
//! assert_eq!(digest.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod hash;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, ToursyncError};
