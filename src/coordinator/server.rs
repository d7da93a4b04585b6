//! Coordinator server: accept loop and per-connection dispatch

use crate::common::{CoordinatorConfig, Reply, Request, Result};
use crate::coordinator::membership::Peer;
use crate::coordinator::state::{CoordState, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

pub struct Coordinator {
    listener: TcpListener,
    state: Arc<CoordState>,
}

impl Coordinator {
    /// Bind the listener and start the deadline scheduler.
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let state = CoordState::start(config);
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<CoordState> {
        self.state.clone()
    }

    pub async fn serve(self) -> Result<()> {
        let config = self.state.config();
        tracing::info!("Starting coordinator");
        tracing::info!("  Listening: {}", self.local_addr()?);
        tracing::info!("  Replication factor: {}", config.replication_factor);
        tracing::info!("  Timeout: {}ms", config.timeout_ms);
        tracing::info!(
            "  Rebalance period: {}s (rebalancing not enabled)",
            config.rebalance_period_secs
        );

        tracing::info!("✓ Coordinator ready");

        loop {
            let (stream, addr) = self.listener.accept().await?;
            let state = self.state.clone();
            tokio::spawn(async move {
                handle_connection(state, stream, addr).await;
            });
        }
    }
}

/// Serve one connection until it closes, then deregister it.
async fn handle_connection(state: Arc<CoordState>, stream: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = Session::new(Peer::new(tx));
    tracing::debug!(conn = %session.id(), %addr, "Connection accepted");

    let (close_tx, close_rx) = oneshot::channel();
    tokio::spawn(write_replies(write_half, rx, close_rx));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch(&state, &mut session, &line).await,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(conn = %session.id(), "Connection read failed: {}", e);
                break;
            }
        }
    }

    state.disconnect(&session);
    // Records may still hold this connection as a requester, so the channel
    // never closes on its own. Flush what is queued, then refuse the rest.
    let _ = close_tx.send(());
    tracing::debug!(conn = %session.id(), %addr, "Connection closed");
}

/// Handle one line. Failures are reported or logged; none ends the connection.
pub async fn dispatch(state: &CoordState, session: &mut Session, line: &str) {
    if line.trim().is_empty() {
        tracing::warn!(conn = %session.id(), "Empty message ignored");
        return;
    }
    tracing::debug!(conn = %session.id(), "Received message: {}", line);

    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(conn = %session.id(), "{} ignored", e);
            return;
        }
    };

    match state.handle(session, request).await {
        Ok(Some(reply)) => respond(session.peer(), reply),
        Ok(None) => {}
        Err(e) => match e.to_reply() {
            Some(reply) => {
                tracing::debug!(conn = %session.id(), "Request refused: {}", e);
                respond(session.peer(), reply);
            }
            None => tracing::warn!(conn = %session.id(), "Error handling message {:?}: {}", line, e),
        },
    }
}

fn respond(peer: &Peer, reply: Reply) {
    if !peer.send(reply) {
        tracing::debug!(conn = %peer.id, "Reply dropped, connection closing");
    }
}

/// Drain `rx` onto the socket. Once `closing` fires, no new replies are
/// accepted but everything already queued is still written.
async fn write_replies(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Reply>,
    mut closing: oneshot::Receiver<()>,
) {
    let mut closed = false;
    loop {
        let reply = if closed {
            rx.recv().await
        } else {
            tokio::select! {
                reply = rx.recv() => reply,
                _ = &mut closing => {
                    rx.close();
                    closed = true;
                    continue;
                }
            }
        };

        let Some(reply) = reply else { break };
        let line = format!("{}\n", reply);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!("Write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
