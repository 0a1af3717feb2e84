//! One-way tree reconciliation for TreeMirror
//!
//! This crate makes a replica directory tree an exact copy of a source tree:
//!
//! - **Entry Classification**: compare one directory level of both trees and
//!   partition the names into source-only, replica-only, differing and common
//!   subdirectories
//! - **Tree Reconciliation**: walk the trees with an explicit worklist,
//!   copying, replacing and deleting replica entries until both sides match
//! - **Failure Isolation**: an unreadable subtree is reported and skipped
//!   while the rest of the pass continues
//! - **Event Streaming**: every completed operation is delivered to an
//!   [`EventSink`] the moment it happens
//!
//! # Examples
//!
//! ```rust,no_run
//! use treemirror_sync::{ReconcileOptions, Reconciler};
//! use treemirror_types::{CompareMode, SyncEvent};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let reconciler = Reconciler::with_options(
//!     ReconcileOptions::default().with_compare_mode(CompareMode::Checksum),
//! );
//! let mut events: Vec<SyncEvent> = Vec::new();
//! let stats = reconciler
//!     .run(Path::new("source"), Path::new("replica"), &mut events)
//!     .await?;
//! println!("{} operations, {} bytes copied", stats.operations(), stats.bytes_copied);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod engine;
pub mod sink;
pub mod transfer;

pub use classify::{DirectorySnapshot, EntryClassifier, EntryInfo, Mismatch};
pub use engine::{reconcile, ReconcileOptions, Reconciler};
pub use sink::{split_events, EventSink, FnSink};
pub use transfer::STAGING_SUFFIX;

// Cancellation tokens are part of the public API of `Reconciler`.
pub use tokio_util::sync::CancellationToken;
