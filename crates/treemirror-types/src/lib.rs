//! Core type system and error handling for TreeMirror
//!
//! This crate provides the foundational types shared by the TreeMirror
//! workspace:
//!
//! - **Error handling**: the error taxonomy of a reconciliation pass with
//!   severity levels
//! - **Decisions**: the copy/delete/descend units derived from a directory
//!   comparison
//! - **Records**: operation records and subtree failures streamed to callers
//! - **Statistics**: per-pass counters
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use treemirror_types::{OperationRecord, OperationVerb, PassStats};
//!
//! let record = OperationRecord::copied("source/a.txt", "replica/a.txt", false);
//! assert_eq!(record.verb, OperationVerb::CopiedFile);
//!
//! let mut stats = PassStats::new();
//! stats.record(&record, 2);
//! assert_eq!(stats.operations(), 1);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use error::{AccessOperation, Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use types::*;
