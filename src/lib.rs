//! # minifs
//!
//! A replicated file store with:
//! - A single coordinator that owns the file index and placement
//! - Storage nodes holding whole-file replicas on local disk
//! - A text line protocol over TCP; file bytes bypass the coordinator
//! - Per-file serialisation of store, remove and their acknowledgements
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!   client ──┤         Coordinator          │
//!    │       │  index · placement · locks   │
//!    │       └──────────────┬───────────────┘
//!    │                      │ JOIN / REMOVE / acks
//!    │        ┌─────────────┼──────────────┐
//!    │        │             │              │
//!    │   ┌────▼─────┐  ┌────▼─────┐  ┌─────▼────┐
//!    └──►│ Volume 1 │  │ Volume 2 │  │ Volume 3 │
//! STORE/ │  (files) │  │  (files) │  │  (files) │
//! LOAD_DATA└────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minifs-coord serve --port 12345 --replicas 3 --timeout 1000
//! ```
//!
//! ### Start storage nodes
//! ```bash
//! minifs-volume serve --port 12346 --coordinator 127.0.0.1:12345 --data ./vol-1
//! minifs-volume serve --port 12347 --coordinator 127.0.0.1:12345 --data ./vol-2
//! minifs-volume serve --port 12348 --coordinator 127.0.0.1:12345 --data ./vol-3
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minifs store report.pdf --file ./report.pdf
//! minifs load report.pdf --output ./copy.pdf
//! minifs list
//! minifs remove report.pdf
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod volume;

// Re-export commonly used types
pub use client::Client;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use volume::VolumeServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
