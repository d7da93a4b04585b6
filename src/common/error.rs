//! Error types for minifs

use crate::common::protocol::{ErrorCode, Reply};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Capacity Errors ===
    #[error("Not enough storage nodes: need {needed}, have {available}")]
    NotEnoughStorageNodes { needed: usize, available: usize },

    // === State Conflict Errors ===
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File does not exist: {0}")]
    FileDoesNotExist(String),

    // === Exhaustion Errors ===
    #[error("No storage node left to load {0} from")]
    LoadExhausted(String),

    // === Protocol Errors ===
    #[error("Malformed message: {0:?}")]
    Malformed(String),

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(String),

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::NotEnoughStorageNodes { .. }
        )
    }

    /// Wire error token reported to the requester, if this error has one.
    ///
    /// Errors without a wire form are logged by the dispatcher and never
    /// reach the peer.
    pub fn to_reply(&self) -> Option<Reply> {
        let code = match self {
            Error::NotEnoughStorageNodes { .. } => ErrorCode::NotEnoughDstores,
            Error::FileAlreadyExists(_) => ErrorCode::FileAlreadyExists,
            Error::FileDoesNotExist(_) => ErrorCode::FileDoesNotExist,
            Error::LoadExhausted(_) => ErrorCode::Load,
            _ => return None,
        };
        Some(Reply::Error(code))
    }

    /// Rebuild a typed error from a wire error token received by a client.
    pub fn from_code(code: ErrorCode, filename: &str) -> Self {
        match code {
            ErrorCode::NotEnoughDstores => Error::NotEnoughStorageNodes {
                needed: 0,
                available: 0,
            },
            ErrorCode::FileAlreadyExists => Error::FileAlreadyExists(filename.to_string()),
            ErrorCode::FileDoesNotExist => Error::FileDoesNotExist(filename.to_string()),
            ErrorCode::Load => Error::LoadExhausted(filename.to_string()),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_errors() {
        let err = Error::NotEnoughStorageNodes {
            needed: 3,
            available: 2,
        };
        assert_eq!(
            err.to_reply().unwrap().to_string(),
            "ERROR_NOT_ENOUGH_DSTORES"
        );
        assert_eq!(
            Error::FileAlreadyExists("f".into())
                .to_reply()
                .unwrap()
                .to_string(),
            "ERROR_FILE_ALREADY_EXISTS"
        );
        assert_eq!(
            Error::LoadExhausted("f".into()).to_reply().unwrap().to_string(),
            "ERROR_LOAD"
        );
        assert!(Error::Malformed("FOO".into()).to_reply().is_none());
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("store".into()).is_retryable());
        assert!(!Error::FileDoesNotExist("f".into()).is_retryable());
    }
}
