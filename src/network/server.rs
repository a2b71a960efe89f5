//! The P2P transport: newline-delimited JSON frames over TCP.
//!
//! Each connection gets a reader task (frames dispatched to the gossip
//! engine in arrival order) and a writer task draining the peer's outbox.
//! A disconnect cancels the writes queued for that peer and nothing else.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{NodeError, Result};
use crate::network::engine::GossipEngine;
use crate::network::peers::PeerHandle;

/// Binds the P2P listener and serves inbound peers forever. A failure to
/// bind the port is fatal.
pub async fn start_p2p_server(engine: GossipEngine, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| NodeError::Transport(format!("p2p bind failed on port {}: {}", port, e)))?;
    info!("p2p server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    serve_peer(engine, stream, peer_addr.to_string()).await;
                });
            }
            Err(e) => warn!("failed to accept peer connection: {}", e),
        }
    }
}

/// Dials a peer and starts serving the connection. The returned string is
/// the registered peer address.
pub async fn connect_to_peer(engine: &GossipEngine, addr: &str) -> Result<String> {
    let stream = TcpStream::connect(addr).await.map_err(|e| {
        NodeError::bad_request(format!("could not connect to peer {}: {}", addr, e))
    })?;
    info!("connected to peer {}", addr);
    let engine = engine.clone();
    let peer_addr = addr.to_string();
    tokio::spawn(async move {
        serve_peer(engine, stream, peer_addr).await;
    });
    Ok(addr.to_string())
}

async fn serve_peer(engine: GossipEngine, stream: TcpStream, addr: String) {
    let (read_half, write_half) = stream.into_split();
    let (outbox, inbox) = mpsc::unbounded_channel::<Arc<str>>();
    let peer = PeerHandle::new(addr.clone(), outbox);

    engine.register_peer(peer.clone());
    let writer = tokio::spawn(write_frames(write_half, inbox));
    engine.handle_open(&peer);

    // Frames from one peer are processed strictly in arrival order.
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => engine.handle_frame(&peer, &line).await,
            Ok(None) => break,
            Err(e) => {
                warn!("read error from peer {}: {}", addr, e);
                break;
            }
        }
    }

    engine.unregister_peer(&addr);
    writer.abort();
    info!("peer {} disconnected", addr);
}

async fn write_frames(mut write_half: OwnedWriteHalf, mut inbox: mpsc::UnboundedReceiver<Arc<str>>) {
    while let Some(frame) = inbox.recv().await {
        if write_half.write_all(frame.as_bytes()).await.is_err()
            || write_half.write_all(b"\n").await.is_err()
        {
            break;
        }
    }
}
