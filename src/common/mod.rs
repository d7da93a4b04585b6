//! Common utilities and types shared across minifs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{Config, CoordinatorConfig, VolumeConfig};
pub use error::{Error, Result};
pub use protocol::{DataRequest, ErrorCode, Reply, Request};
pub use utils::{format_bytes, parse_duration, retry_with_backoff, validate_filename};
