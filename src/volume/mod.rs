//! Storage node
//!
//! A volume holds whole-file replicas in a flat directory. It joins the
//! coordinator on one long-lived connection, which carries `STORE_ACK` and
//! remove acknowledgements back, and serves file bytes to clients on its own
//! data port.

pub mod files;
pub mod server;

pub use files::FileStore;
pub use server::VolumeServer;
