//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Membership (which storage nodes are joined, and on which port)
//! - The file index (filename → status, replicas, size)
//! - Placement decisions (random R-subset for stores, random replica for loads)
//! - Quorum tracking of store/remove acknowledgements
//! - Aborting operations that miss their deadline
//!
//! It never handles file bytes; clients exchange those with storage nodes directly.

pub mod locks;
pub mod membership;
pub mod metadata;
pub mod placement;
pub mod server;
pub mod state;
pub mod timeout;

pub use server::Coordinator;
pub use state::{CoordState, Session};
