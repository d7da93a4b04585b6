//! Client for the file store
//!
//! Talks to the coordinator over one long-lived connection and moves file
//! bytes directly to and from storage nodes. Storage nodes are addressed by
//! the port the coordinator announces, on the coordinator's host.

use crate::common::{DataRequest, Error, Reply, Request, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    coordinator: SocketAddr,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl Client {
    /// Connect to the coordinator. `timeout` bounds every wait for a reply.
    pub async fn connect(coordinator: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(coordinator))
            .await?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", coordinator, e)))?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            coordinator,
            lines: BufReader::new(read_half).lines(),
            writer,
            timeout,
        })
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        self.send(&Request::List).await?;
        match self.recv("").await? {
            Reply::List(files) => Ok(files),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Store `data` under `filename` and wait until every replica has it.
    pub async fn store(&mut self, filename: &str, data: &[u8]) -> Result<()> {
        self.send(&Request::Store {
            filename: filename.to_string(),
            size: data.len() as u64,
        })
        .await?;

        let ports = match self.recv(filename).await? {
            Reply::StoreTo(ports) => ports,
            other => return Err(Error::UnexpectedReply(other.to_string())),
        };

        for port in ports {
            // A failed push surfaces as a missing STORE_COMPLETE.
            if let Err(e) = self.push(port, filename, data).await {
                tracing::warn!(port, %filename, "Upload to storage node failed: {}", e);
            }
        }

        match self.recv(filename).await? {
            Reply::StoreComplete => Ok(()),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Fetch `filename`, asking for another replica each time one fails.
    pub async fn load(&mut self, filename: &str) -> Result<Vec<u8>> {
        self.send(&Request::Load {
            filename: filename.to_string(),
        })
        .await?;

        loop {
            let (port, size) = match self.recv(filename).await? {
                Reply::LoadFrom { port, size } => (port, size),
                other => return Err(Error::UnexpectedReply(other.to_string())),
            };

            match self.fetch(port, filename, size).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    tracing::warn!(port, %filename, "Download from storage node failed: {}", e);
                    self.send(&Request::Reload {
                        filename: filename.to_string(),
                        failed_port: port,
                    })
                    .await?;
                }
            }
        }
    }

    pub async fn remove(&mut self, filename: &str) -> Result<()> {
        self.send(&Request::Remove {
            filename: filename.to_string(),
        })
        .await?;

        match self.recv(filename).await? {
            Reply::RemoveComplete => Ok(()),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        tracing::debug!("Sending: {}", request);
        self.writer
            .write_all(format!("{}\n", request).as_bytes())
            .await?;
        Ok(())
    }

    /// Next reply from the coordinator. Error tokens become typed errors.
    async fn recv(&mut self, filename: &str) -> Result<Reply> {
        let line = tokio::time::timeout(self.timeout, self.lines.next_line())
            .await
            .map_err(|_| {
                Error::Timeout(format!("no reply from coordinator within {:?}", self.timeout))
            })??
            .ok_or_else(|| Error::ConnectionFailed("coordinator closed the connection".into()))?;
        tracing::debug!("Received: {}", line);

        match Reply::parse(&line)? {
            Reply::Error(code) => Err(Error::from_code(code, filename)),
            reply => Ok(reply),
        }
    }

    fn node_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.coordinator.ip(), port)
    }

    async fn push(&self, port: u16, filename: &str, data: &[u8]) -> Result<()> {
        let header = DataRequest::Store {
            filename: filename.to_string(),
            size: data.len() as u64,
        };

        tokio::time::timeout(self.timeout, async {
            let stream = TcpStream::connect(self.node_addr(port)).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_half
                .write_all(format!("{}\n", header).as_bytes())
                .await?;

            let mut ack = String::new();
            BufReader::new(read_half).read_line(&mut ack).await?;
            match Reply::parse(ack.trim_end())? {
                Reply::Ack => {}
                _ => return Err(Error::UnexpectedReply(ack.trim_end().to_string())),
            }

            write_half.write_all(data).await?;
            write_half.shutdown().await?;
            Ok(())
        })
        .await?
    }

    async fn fetch(&self, port: u16, filename: &str, size: u64) -> Result<Vec<u8>> {
        let header = DataRequest::LoadData {
            filename: filename.to_string(),
        };

        let data = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(self.node_addr(port)).await?;
            stream
                .write_all(format!("{}\n", header).as_bytes())
                .await?;
            let mut data = Vec::with_capacity(size as usize);
            stream.read_to_end(&mut data).await?;
            Ok::<_, Error>(data)
        })
        .await??;

        if data.len() as u64 != size {
            return Err(Error::ConnectionFailed(format!(
                "received {} of {} bytes",
                data.len(),
                size
            )));
        }
        Ok(data)
    }
}
