/// Hub router — accepts peer connections and relays messages between them.
///
/// One task per accepted connection owns that connection's transport and
/// runs its receive loop; everyone else reaches the peer through the
/// registry handle. Failures are contained per connection: a malformed
/// payload or dropped socket never disturbs routing between other peers.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{CodecError, Inbound, MessageCodec};
use super::message::{Message, MessageKind};
use super::registry::{ConnectionRegistry, PeerCommand, PeerHandle, SharedRegistry};

/// Introspection record for one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
    pub connected_for: Duration,
}

/// A running hub: listener plus one receive-loop task per connection.
///
/// Dropping the handle does not stop the hub; call [`Hub::shutdown`].
#[derive(Debug)]
pub struct Hub {
    registry: SharedRegistry,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Hub {
    /// Bind the listener and start accepting peers.
    pub async fn bind(addr: &str) -> std::io::Result<Hub> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let registry: SharedRegistry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(%local_addr, "hub listening");
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&registry), shutdown_rx));

        Ok(Hub {
            registry,
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn connected_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry
            .read()
            .await
            .snapshot()
            .into_iter()
            .map(|h| ConnectionInfo {
                addr: h.addr,
                connected_for: h.connected_at.elapsed(),
            })
            .collect()
    }

    pub async fn connection_info(&self, addr: SocketAddr) -> Option<ConnectionInfo> {
        self.registry.read().await.get(addr).map(|h| ConnectionInfo {
            addr: h.addr,
            connected_for: h.connected_at.elapsed(),
        })
    }

    /// Ask a peer's task to drop the connection. Returns false if the
    /// address is not registered.
    pub async fn disconnect(&self, addr: SocketAddr) -> bool {
        let reg = self.registry.read().await;
        match reg.get(addr) {
            Some(handle) => handle.tx.send(PeerCommand::Close).is_ok(),
            None => false,
        }
    }

    /// Send a SERVER_DIRECT notice to one peer. Returns false if the
    /// address is not registered or its task is gone.
    pub async fn notify(&self, addr: SocketAddr, text: &str) -> bool {
        let reg = self.registry.read().await;
        match reg.get(addr) {
            Some(handle) => handle.deliver(Message::server_direct(text)).is_ok(),
            None => false,
        }
    }

    /// Send a SERVER_BROADCAST notice to every peer. Returns the number
    /// of peers it was queued for.
    pub async fn notify_all(&self, text: &str) -> usize {
        let targets = self.registry.read().await.snapshot();
        targets
            .iter()
            .filter(|h| h.deliver(Message::server_broadcast(text)).is_ok())
            .count()
    }

    /// Stop accepting, signal every connection task to stop, and wait for
    /// the accept loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_task.await {
            warn!("accept loop join error: {e}");
        }
        info!("hub stopped");
    }
}

/// Accept loop: register each connection and spawn its receive loop.
async fn accept_loop(
    listener: TcpListener,
    registry: SharedRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept error: {e}");
                        continue;
                    }
                };
                info!(%addr, "peer connected");

                let registry = Arc::clone(&registry);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_peer(socket, addr, Arc::clone(&registry), shutdown).await {
                        warn!(%addr, "connection error: {e}");
                    }
                    // Teardown path: runs exactly once per connection,
                    // whatever ended the loop.
                    cleanup(addr, &registry).await;
                    info!(%addr, "peer disconnected");
                });
            }
        }
    }
}

/// Receive loop for one connection. The `Framed` transport lives and dies
/// with this task.
async fn handle_peer(
    socket: TcpStream,
    addr: SocketAddr,
    registry: SharedRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CodecError> {
    let mut framed = Framed::new(socket, MessageCodec);
    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.write().await.add(PeerHandle::new(addr, tx));

    loop {
        tokio::select! {
            // Inbound frame from this peer.
            frame = framed.next() => {
                let inbound = match frame {
                    Some(Ok(inbound)) => inbound,
                    Some(Err(e)) => {
                        warn!(%addr, "receive error: {e}");
                        break;
                    }
                    None => break, // Peer closed.
                };

                match inbound {
                    Inbound::Frame(msg) => route(&mut framed, addr, msg, &registry).await?,
                    Inbound::Invalid { raw } => {
                        debug!(%addr, "non-protocol payload: {raw}");
                        framed
                            .send(Message::error("hub expects newline-delimited JSON messages"))
                            .await?;
                    }
                }
            }

            // Outbound traffic queued by other tasks (forwards, notices).
            cmd = rx.recv() => match cmd {
                Some(PeerCommand::Deliver(msg)) => framed.send(msg).await?,
                Some(PeerCommand::Close) | None => break,
            },

            _ = shutdown.changed() => break,
        }
    }

    Ok(())
}

/// Classify one decoded message and forward it per the routing rules.
async fn route(
    framed: &mut Framed<TcpStream, MessageCodec>,
    sender: SocketAddr,
    mut msg: Message,
    registry: &SharedRegistry,
) -> Result<(), CodecError> {
    // Stamp the transport-observed origin; never trust the payload's.
    msg.sender = Some(sender);

    match msg.kind {
        MessageKind::Direct => {
            let Some(recipient) = msg.recipient_addr() else {
                framed
                    .send(Message::error("DIRECT requires a host:port recipient"))
                    .await?;
                return Ok(());
            };

            let target = registry.read().await.get(recipient).cloned();
            let delivered = match target {
                Some(handle) => {
                    let ok = handle.deliver(msg).is_ok();
                    if !ok {
                        // Registered but its task died under us.
                        cleanup(recipient, registry).await;
                    }
                    ok
                }
                None => false,
            };
            if delivered {
                debug!(%sender, %recipient, "forwarded direct message");
            } else {
                debug!(%sender, %recipient, "direct recipient unreachable");
                framed
                    .send(Message::error(format!(
                        "recipient {recipient} not found or offline"
                    )))
                    .await?;
            }
        }

        MessageKind::Broadcast => {
            let targets = registry.read().await.snapshot();
            let mut failed = Vec::new();
            let mut delivered = 0usize;
            for handle in targets.iter().filter(|h| h.addr != sender) {
                if handle.deliver(msg.clone()).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(handle.addr);
                }
            }
            debug!(%sender, delivered, "forwarded broadcast");
            // A broken peer must not block the rest of the pass.
            for addr in failed {
                cleanup(addr, registry).await;
            }
        }

        other => {
            debug!(%sender, kind = %other, "unroutable message kind");
            framed
                .send(Message::error(format!("unroutable message type {other}")))
                .await?;
        }
    }

    Ok(())
}

/// Remove a dead connection from live state. Idempotent; safe to call from
/// both the teardown path and a failed-forward path.
pub(crate) async fn cleanup(addr: SocketAddr, registry: &SharedRegistry) {
    if let Some(handle) = registry.write().await.remove(addr) {
        // Nudge the owning task if it is still alive; it drops the socket
        // on exit. A send to a finished task is fine to ignore.
        let _ = handle.tx.send(PeerCommand::Close);
        debug!(%addr, "connection cleaned up");
    }
}
