//! Volume server

use crate::common::{
    retry_with_backoff, DataRequest, Error, Reply, Request, Result, VolumeConfig,
};
use crate::volume::files::FileStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const JOIN_RETRIES: usize = 5;
const JOIN_BACKOFF: Duration = Duration::from_millis(100);

/// Outgoing messages to the coordinator.
type CoordinatorTx = mpsc::UnboundedSender<Request>;

pub struct VolumeServer {
    config: VolumeConfig,
    listener: TcpListener,
    store: Arc<FileStore>,
}

impl VolumeServer {
    /// Prepare the data directory and bind the data listener.
    pub async fn bind(config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(FileStore::open(&config.data_dir).await?);
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self {
            config,
            listener,
            store,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<FileStore> {
        self.store.clone()
    }

    /// Join the coordinator, then serve clients until the coordinator goes away.
    pub async fn serve(self) -> Result<()> {
        let port = self.local_addr()?.port();
        tracing::info!("Starting volume server");
        tracing::info!("  Data port: {}", port);
        tracing::info!("  Coordinator: {}", self.config.coordinator_addr);
        tracing::info!("  Data dir: {}", self.store.root().display());

        let coordinator_addr = self.config.coordinator_addr;
        let stream = retry_with_backoff(
            || async move {
                TcpStream::connect(coordinator_addr)
                    .await
                    .map_err(|e| Error::ConnectionFailed(format!("{}: {}", coordinator_addr, e)))
            },
            JOIN_RETRIES,
            JOIN_BACKOFF,
        )
        .await?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_messages(write_half, rx));
        let mut lines = BufReader::new(read_half).lines();

        let joined = join(&tx, &mut lines, port).await;
        if let Err(e) = joined {
            writer.abort();
            return Err(e);
        }
        tracing::info!("✓ Volume server ready");

        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let store = self.store.clone();
                        let tx = tx.clone();
                        let timeout = self.config.timeout();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(store, stream, tx, timeout).await {
                                tracing::warn!(%addr, "Client transfer failed: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let store = self.store.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            handle_coordinator(&store, &tx, &line).await;
                        });
                    }
                    Ok(None) => {
                        break Err(Error::ConnectionFailed("coordinator closed the connection".into()));
                    }
                    Err(e) => break Err(e.into()),
                },
            }
        };

        writer.abort();
        result
    }
}

async fn join(
    tx: &CoordinatorTx,
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
    port: u16,
) -> Result<()> {
    tx.send(Request::Join { port })
        .map_err(|_| Error::ConnectionFailed("coordinator writer stopped".into()))?;

    match lines.next_line().await? {
        Some(line) => match Reply::parse(&line)? {
            Reply::Ack => Ok(()),
            _ => Err(Error::UnexpectedReply(line)),
        },
        None => Err(Error::ConnectionFailed(
            "coordinator closed the connection before ACK".into(),
        )),
    }
}

/// Apply one coordinator command.
async fn handle_coordinator(store: &FileStore, tx: &CoordinatorTx, line: &str) {
    let filename = match Reply::parse(line) {
        Ok(Reply::Remove(filename)) => filename,
        Ok(_) | Err(_) => {
            tracing::warn!("Unexpected message from coordinator: {:?}", line);
            return;
        }
    };

    let reply = match store.delete(&filename).await {
        Ok(true) => {
            tracing::debug!(%filename, "Removed");
            Request::RemoveAck { filename }
        }
        Ok(false) => {
            tracing::debug!(%filename, "Remove requested for missing file");
            Request::RemoveMissing { filename }
        }
        Err(e) => {
            // Leave the coordinator to time the remove out.
            tracing::warn!(%filename, "Remove failed: {}", e);
            return;
        }
    };

    if tx.send(reply).is_err() {
        tracing::debug!("Coordinator connection closing, remove ack dropped");
    }
}

/// Serve one client data connection: a single `STORE` or `LOAD_DATA`.
async fn handle_client(
    store: Arc<FileStore>,
    stream: TcpStream,
    coordinator: CoordinatorTx,
    timeout: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    match DataRequest::parse(line.trim_end())? {
        DataRequest::Store { filename, size } => {
            write_line(&mut write_half, &Reply::Ack).await?;
            let written =
                tokio::time::timeout(timeout, store.write_from(&filename, &mut reader, size)).await;
            match written {
                Ok(result) => result?,
                Err(elapsed) => {
                    // The copy was cut off mid-file.
                    let _ = store.delete(&filename).await;
                    return Err(elapsed.into());
                }
            }
            tracing::debug!(%filename, size, "Stored");

            if coordinator.send(Request::StoreAck { filename }).is_err() {
                tracing::warn!("Coordinator connection closing, store ack dropped");
            }
        }
        DataRequest::LoadData { filename } => match store.open_read(&filename).await? {
            Some((mut file, len)) => {
                tokio::io::copy(&mut file, &mut write_half).await?;
                write_half.shutdown().await?;
                tracing::debug!(%filename, size = len, "Served");
            }
            None => {
                tracing::debug!(%filename, "Load requested for missing file, closing");
            }
        },
    }

    Ok(())
}

async fn write_line(writer: &mut OwnedWriteHalf, reply: &Reply) -> Result<()> {
    writer.write_all(format!("{}\n", reply).as_bytes()).await?;
    Ok(())
}

async fn write_messages(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Request>) {
    while let Some(msg) = rx.recv().await {
        let line = format!("{}\n", msg);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!("Write to coordinator failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn store() -> (TempDir, Arc<FileStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn test_remove_replies() {
        let (_dir, store) = store().await;
        store.write("f", b"data").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_coordinator(&store, &tx, "REMOVE f").await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Request::RemoveAck {
                filename: "f".into()
            }
        );

        handle_coordinator(&store, &tx, "REMOVE f").await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Request::RemoveMissing {
                filename: "f".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unexpected_coordinator_message_ignored() {
        let (_dir, store) = store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_coordinator(&store, &tx, "LIST").await;
        handle_coordinator(&store, &tx, "").await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_client_store_and_load() {
        let (_dir, store) = store().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let server_store = store.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let store = server_store.clone();
                let tx = tx.clone();
                tokio::spawn(handle_client(store, stream, tx, Duration::from_secs(1)));
            }
        });

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"STORE f 5\n").await.unwrap();
        let mut ack = [0u8; 4];
        conn.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"ACK\n");
        conn.write_all(b"hello").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            Request::StoreAck {
                filename: "f".into()
            }
        );
        assert_eq!(store.read("f").await.unwrap(), Some(b"hello".to_vec()));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"LOAD_DATA f\n").await.unwrap();
        let mut data = Vec::new();
        conn.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"LOAD_DATA missing\n").await.unwrap();
        let mut data = Vec::new();
        conn.read_to_end(&mut data).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_slow_client_times_out() {
        let (_dir, store) = store().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let server_store = store.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_client(server_store, stream, tx, Duration::from_millis(50)).await
        });

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"STORE f 5\nhe").await.unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(rx.recv().await.is_none());
        assert_eq!(store.read("f").await.unwrap(), None);
        drop(conn);
    }

    #[tokio::test]
    async fn test_join_handshake() {
        let coordinator = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let client = TcpStream::connect(coordinator.local_addr().unwrap())
            .await
            .unwrap();
        let (server_side, _) = coordinator.accept().await.unwrap();

        let (read_half, write_half) = client.into_split();
        tokio::spawn(write_messages(write_half, rx));
        let mut lines = BufReader::new(read_half).lines();

        let (coord_read, mut coord_write) = server_side.into_split();
        let mut coord_lines = BufReader::new(coord_read).lines();

        let joining = tokio::spawn(async move { join(&tx, &mut lines, 4242).await });
        assert_eq!(coord_lines.next_line().await.unwrap().unwrap(), "JOIN 4242");
        coord_write.write_all(b"ACK\n").await.unwrap();
        joining.await.unwrap().unwrap();
    }
}
