//! Line protocol spoken between clients, storage nodes and the coordinator
//!
//! Every message is one newline-terminated line of space-separated tokens.
//! The first token names the message; the rest are its arguments.
//! File bytes never travel through the coordinator: clients push and pull
//! them directly to and from storage nodes after a `STORE`/`LOAD_DATA`
//! header on a separate connection.

use crate::common::{Error, Result};
use std::fmt;
use std::str::SplitWhitespace;

/// Wire tokens for the failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FileAlreadyExists,
    NotEnoughDstores,
    FileDoesNotExist,
    Load,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileAlreadyExists => "ERROR_FILE_ALREADY_EXISTS",
            ErrorCode::NotEnoughDstores => "ERROR_NOT_ENOUGH_DSTORES",
            ErrorCode::FileDoesNotExist => "ERROR_FILE_DOES_NOT_EXIST",
            ErrorCode::Load => "ERROR_LOAD",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "ERROR_FILE_ALREADY_EXISTS" => Some(ErrorCode::FileAlreadyExists),
            "ERROR_NOT_ENOUGH_DSTORES" => Some(ErrorCode::NotEnoughDstores),
            "ERROR_FILE_DOES_NOT_EXIST" => Some(ErrorCode::FileDoesNotExist),
            "ERROR_LOAD" => Some(ErrorCode::Load),
            _ => None,
        }
    }
}

/// Messages received by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A storage node announcing its listening port.
    Join { port: u16 },
    Store { filename: String, size: u64 },
    StoreAck { filename: String },
    Load { filename: String },
    Reload { filename: String, failed_port: u16 },
    Remove { filename: String },
    RemoveAck { filename: String },
    /// A storage node asked to remove a file it does not hold.
    RemoveMissing { filename: String },
    List,
}

impl Request {
    /// Parse one line. Empty lines, unknown commands and bad arguments are
    /// all `Error::Malformed`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut args = Args::new(line);
        let request = match args.command()? {
            "JOIN" => Request::Join {
                port: args.number()?,
            },
            "STORE" => Request::Store {
                filename: args.word()?,
                size: args.number()?,
            },
            "STORE_ACK" => Request::StoreAck {
                filename: args.word()?,
            },
            "LOAD" => Request::Load {
                filename: args.word()?,
            },
            "RELOAD" => Request::Reload {
                filename: args.word()?,
                failed_port: args.number()?,
            },
            "REMOVE" => Request::Remove {
                filename: args.word()?,
            },
            "REMOVE_ACK" => Request::RemoveAck {
                filename: args.word()?,
            },
            "ERROR_FILE_DOES_NOT_EXIST" => Request::RemoveMissing {
                filename: args.word()?,
            },
            "LIST" => Request::List,
            _ => return Err(args.malformed()),
        };
        args.finish()?;
        Ok(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Join { port } => write!(f, "JOIN {}", port),
            Request::Store { filename, size } => write!(f, "STORE {} {}", filename, size),
            Request::StoreAck { filename } => write!(f, "STORE_ACK {}", filename),
            Request::Load { filename } => write!(f, "LOAD {}", filename),
            Request::Reload {
                filename,
                failed_port,
            } => write!(f, "RELOAD {} {}", filename, failed_port),
            Request::Remove { filename } => write!(f, "REMOVE {}", filename),
            Request::RemoveAck { filename } => write!(f, "REMOVE_ACK {}", filename),
            Request::RemoveMissing { filename } => {
                write!(f, "{} {}", ErrorCode::FileDoesNotExist.as_str(), filename)
            }
            Request::List => write!(f, "LIST"),
        }
    }
}

/// Messages sent by the coordinator, to clients and storage nodes alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    StoreTo(Vec<u16>),
    StoreComplete,
    LoadFrom { port: u16, size: u64 },
    RemoveComplete,
    List(Vec<String>),
    /// Instruction to a storage node to delete its copy.
    Remove(String),
    Error(ErrorCode),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Self> {
        let mut args = Args::new(line);
        let command = args.command()?;
        if let Some(code) = ErrorCode::from_token(command) {
            // Storage nodes append the filename; the coordinator does not.
            return Ok(Reply::Error(code));
        }
        let reply = match command {
            "ACK" => Reply::Ack,
            "STORE_TO" => Reply::StoreTo(args.rest_numbers()?),
            "STORE_COMPLETE" => Reply::StoreComplete,
            "LOAD_FROM" => Reply::LoadFrom {
                port: args.number()?,
                size: args.number()?,
            },
            "REMOVE_COMPLETE" => Reply::RemoveComplete,
            "LIST" => Reply::List(args.rest_words()),
            "REMOVE" => Reply::Remove(args.word()?),
            _ => return Err(args.malformed()),
        };
        args.finish()?;
        Ok(reply)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ack => write!(f, "ACK"),
            Reply::StoreTo(ports) => {
                write!(f, "STORE_TO")?;
                for port in ports {
                    write!(f, " {}", port)?;
                }
                Ok(())
            }
            Reply::StoreComplete => write!(f, "STORE_COMPLETE"),
            Reply::LoadFrom { port, size } => write!(f, "LOAD_FROM {} {}", port, size),
            Reply::RemoveComplete => write!(f, "REMOVE_COMPLETE"),
            Reply::List(files) => {
                write!(f, "LIST")?;
                for file in files {
                    write!(f, " {}", file)?;
                }
                Ok(())
            }
            Reply::Remove(filename) => write!(f, "REMOVE {}", filename),
            Reply::Error(code) => write!(f, "{}", code.as_str()),
        }
    }
}

/// Messages a client sends to a storage node's data port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    /// Followed by exactly `size` raw bytes once the node answers `ACK`.
    Store { filename: String, size: u64 },
    LoadData { filename: String },
}

impl DataRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let mut args = Args::new(line);
        let request = match args.command()? {
            "STORE" => DataRequest::Store {
                filename: args.word()?,
                size: args.number()?,
            },
            "LOAD_DATA" => DataRequest::LoadData {
                filename: args.word()?,
            },
            _ => return Err(args.malformed()),
        };
        args.finish()?;
        Ok(request)
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRequest::Store { filename, size } => write!(f, "STORE {} {}", filename, size),
            DataRequest::LoadData { filename } => write!(f, "LOAD_DATA {}", filename),
        }
    }
}

/// Token cursor over one line.
struct Args<'a> {
    line: &'a str,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            tokens: line.split_whitespace(),
        }
    }

    fn malformed(&self) -> Error {
        Error::Malformed(self.line.to_string())
    }

    fn command(&mut self) -> Result<&'a str> {
        self.tokens.next().ok_or_else(|| self.malformed())
    }

    fn word(&mut self) -> Result<String> {
        self.tokens
            .next()
            .map(str::to_string)
            .ok_or_else(|| self.malformed())
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T> {
        self.tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| self.malformed())
    }

    fn rest_words(&mut self) -> Vec<String> {
        self.tokens.by_ref().map(str::to_string).collect()
    }

    fn rest_numbers<T: std::str::FromStr>(&mut self) -> Result<Vec<T>> {
        let line = self.line;
        self.tokens
            .by_ref()
            .map(|t| t.parse().map_err(|_| Error::Malformed(line.to_string())))
            .collect()
    }

    fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            Some(_) => Err(self.malformed()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            Request::parse("JOIN 4001").unwrap(),
            Request::Join { port: 4001 }
        );
        assert_eq!(
            Request::parse("STORE a.txt 10").unwrap(),
            Request::Store {
                filename: "a.txt".into(),
                size: 10
            }
        );
        assert_eq!(
            Request::parse("RELOAD a.txt 4002").unwrap(),
            Request::Reload {
                filename: "a.txt".into(),
                failed_port: 4002
            }
        );
        assert_eq!(
            Request::parse("ERROR_FILE_DOES_NOT_EXIST a.txt").unwrap(),
            Request::RemoveMissing {
                filename: "a.txt".into()
            }
        );
        assert_eq!(Request::parse("LIST").unwrap(), Request::List);
    }

    #[test]
    fn test_malformed_requests() {
        assert!(matches!(Request::parse(""), Err(Error::Malformed(_))));
        assert!(matches!(Request::parse("   "), Err(Error::Malformed(_))));
        assert!(matches!(Request::parse("HELLO"), Err(Error::Malformed(_))));
        assert!(matches!(Request::parse("STORE a.txt"), Err(Error::Malformed(_))));
        assert!(matches!(
            Request::parse("STORE a.txt ten"),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(Request::parse("JOIN 70000"), Err(Error::Malformed(_))));
        assert!(matches!(
            Request::parse("LOAD a.txt extra"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_format_replies() {
        assert_eq!(Reply::StoreTo(vec![1, 2, 3]).to_string(), "STORE_TO 1 2 3");
        assert_eq!(Reply::List(vec![]).to_string(), "LIST");
        assert_eq!(
            Reply::List(vec!["a".into(), "b".into()]).to_string(),
            "LIST a b"
        );
        assert_eq!(
            Reply::LoadFrom { port: 9, size: 10 }.to_string(),
            "LOAD_FROM 9 10"
        );
        assert_eq!(Reply::Remove("f".into()).to_string(), "REMOVE f");
    }

    #[test]
    fn test_parse_replies() {
        assert_eq!(Reply::parse("LIST").unwrap(), Reply::List(vec![]));
        assert_eq!(
            Reply::parse("STORE_TO 4001 4002").unwrap(),
            Reply::StoreTo(vec![4001, 4002])
        );
        assert_eq!(
            Reply::parse("ERROR_FILE_DOES_NOT_EXIST f").unwrap(),
            Reply::Error(ErrorCode::FileDoesNotExist)
        );
        assert!(Reply::parse("STORE_TO 4001 x").is_err());
    }

    #[test]
    fn test_data_requests() {
        assert_eq!(
            DataRequest::parse("LOAD_DATA f").unwrap(),
            DataRequest::LoadData {
                filename: "f".into()
            }
        );
        assert!(DataRequest::parse("LOAD f").is_err());
    }
}
