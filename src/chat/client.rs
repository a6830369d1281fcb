/// Peer client — connection lifecycle, receive loop, and the control
/// surface the UI drives.
///
/// Exactly one transport may be active at a time. The receive loop owns
/// the read half and runs until EOF, transport error, or a disconnect
/// signal; reconnection is always user-initiated. The UI consumes
/// [`ClientEvent`]s; it never touches the transport directly.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::{CodecError, Inbound, MessageCodec};
use super::directory::{
    BlockList, Contact, Directory, PolicyError, SharedBlockList, SharedDirectory, HUB_ADDR,
};
use super::message::{Message, MessageKind};
use super::store::{ServerDef, Store, StoreError};

/// How long `disconnect` waits for the receive loop to exit before
/// treating it as leaked (non-fatal).
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the (external) UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A line for the currently active conversation.
    Display { addr: SocketAddr, line: String },
    /// A human-readable status notice.
    Status(String),
    /// The transport is gone; reconnecting is up to the user.
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("cannot send to blocked contact {0}")]
    RecipientBlocked(SocketAddr),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything the receive loop needs, detached from the `Client` so the
/// control task and the loop never alias mutably.
struct ReceiveContext {
    local_addr: SocketAddr,
    state: Arc<RwLock<ConnectionState>>,
    directory: SharedDirectory,
    blocklist: SharedBlockList,
    active: Arc<RwLock<Option<SocketAddr>>>,
    store: Arc<Store>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

pub struct Client {
    state: Arc<RwLock<ConnectionState>>,
    writer: Option<FramedWrite<OwnedWriteHalf, MessageCodec>>,
    recv_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    local_addr: Option<SocketAddr>,
    directory: SharedDirectory,
    blocklist: SharedBlockList,
    active: Arc<RwLock<Option<SocketAddr>>>,
    store: Arc<Store>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Client {
    /// Load directory and block list from the store and start disconnected.
    pub fn new(
        store: Store,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Client, StoreError> {
        let directory = Directory::from_contacts(store.load_contacts()?);
        let blocklist = BlockList::from_addrs(store.load_blocked()?);
        // Write back the normalized list so the hub contact is on disk.
        store.save_contacts(directory.contacts())?;

        Ok(Client {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: None,
            recv_task: None,
            shutdown_tx: None,
            local_addr: None,
            directory: Arc::new(RwLock::new(directory)),
            blocklist: Arc::new(RwLock::new(blocklist)),
            active: Arc::new(RwLock::new(None)),
            store: Arc::new(store),
            events,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Our address as seen from the transport, while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn directory(&self) -> SharedDirectory {
        Arc::clone(&self.directory)
    }

    pub fn blocklist(&self) -> SharedBlockList {
        Arc::clone(&self.blocklist)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.directory.read().await.contacts().to_vec()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to a hub. Any live transport is disconnected first; only
    /// one may be active at a time.
    pub async fn connect(&mut self, server: &ServerDef) -> Result<(), ClientError> {
        self.disconnect().await;

        *self.state.write().await = ConnectionState::Connecting;
        self.status(format!("connecting to {} ({})", server.name, server.endpoint()));

        let stream = match TcpStream::connect(server.endpoint()).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                self.status(format!("connection to {} failed: {e}", server.endpoint()));
                return Err(e.into());
            }
        };
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = ReceiveContext {
            local_addr,
            state: Arc::clone(&self.state),
            directory: Arc::clone(&self.directory),
            blocklist: Arc::clone(&self.blocklist),
            active: Arc::clone(&self.active),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
        };
        let frames = FramedRead::new(read_half, MessageCodec);
        self.recv_task = Some(tokio::spawn(receive_loop(ctx, frames, shutdown_rx)));
        self.writer = Some(FramedWrite::new(write_half, MessageCodec));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        *self.state.write().await = ConnectionState::Connected;
        self.status(format!("connected to {}", server.endpoint()));
        Ok(())
    }

    /// Tear down the live transport, if any. Waits up to
    /// [`DISCONNECT_TIMEOUT`] for the receive loop; a loop that will not
    /// stop is leaked rather than blocking the control task.
    pub async fn disconnect(&mut self) {
        if self.recv_task.is_none() && *self.state.read().await == ConnectionState::Disconnected {
            return;
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        self.writer = None; // closes the write half

        if let Some(task) = self.recv_task.take() {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, task).await.is_err() {
                warn!("receive loop did not stop within {DISCONNECT_TIMEOUT:?}; leaking it");
            }
        }

        self.local_addr = None;
        *self.state.write().await = ConnectionState::Disconnected;
        let _ = self.events.send(ClientEvent::Disconnected);
    }

    // ── Conversations ────────────────────────────────────────────

    /// Make a conversation active and return its full log.
    pub async fn select_conversation(&self, addr: SocketAddr) -> Vec<String> {
        *self.active.write().await = Some(addr);
        match self.store.load_history(addr) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("failed to load conversation log for {addr}: {e}");
                self.status(format!("could not load history for {addr}: {e}"));
                Vec::new()
            }
        }
    }

    pub async fn active_conversation(&self) -> Option<SocketAddr> {
        *self.active.read().await
    }

    /// Send to a contact: the hub contact broadcasts, anyone else gets a
    /// direct message. A local echo is appended to the recipient's log.
    /// A failed send forces an immediate disconnect.
    pub async fn send_to(&mut self, recipient: SocketAddr, text: &str) -> Result<(), ClientError> {
        if self.writer.is_none() || *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if self.blocklist.read().await.is_blocked(recipient) {
            return Err(ClientError::RecipientBlocked(recipient));
        }

        let (msg, echo) = if recipient == HUB_ADDR {
            (Message::broadcast(text), format!("YOU (BROADCAST): {text}"))
        } else {
            let name = self
                .directory
                .read()
                .await
                .resolve(recipient)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| recipient.to_string());
            (Message::direct(recipient, text), format!("YOU ({name}): {text}"))
        };

        let send_result = match self.writer.as_mut() {
            Some(writer) => writer.send(msg).await,
            None => return Err(ClientError::NotConnected),
        };
        if let Err(e) = send_result {
            self.status(format!("send failed: {e}"));
            self.disconnect().await;
            return Err(e.into());
        }

        if let Err(e) = self.store.append_history(recipient, &echo) {
            warn!("conversation log write failed: {e}");
            self.status(format!("history write failed: {e}"));
        }
        if *self.active.read().await == Some(recipient) {
            let _ = self.events.send(ClientEvent::Display {
                addr: recipient,
                line: echo,
            });
        }
        Ok(())
    }

    // ── Directory and block list edits ───────────────────────────

    pub async fn add_contact(
        &self,
        name: impl Into<String>,
        addr: SocketAddr,
    ) -> Result<(), ClientError> {
        let snapshot = {
            let mut dir = self.directory.write().await;
            dir.add(name, addr)?;
            dir.contacts().to_vec()
        };
        self.persist_contacts(&snapshot);
        Ok(())
    }

    pub async fn edit_contact(
        &self,
        addr: SocketAddr,
        new_name: impl Into<String>,
        new_addr: SocketAddr,
    ) -> Result<(), ClientError> {
        let snapshot = {
            let mut dir = self.directory.write().await;
            dir.edit(addr, new_name, new_addr)?;
            dir.contacts().to_vec()
        };
        if addr != new_addr {
            if let Err(e) = self.store.move_history(addr, new_addr) {
                warn!("failed to move conversation log: {e}");
                self.status(format!("could not move history to {new_addr}: {e}"));
            }
        }
        self.persist_contacts(&snapshot);
        Ok(())
    }

    /// Remove a contact and its conversation log.
    pub async fn remove_contact(&self, addr: SocketAddr) -> Result<Contact, ClientError> {
        let (removed, snapshot) = {
            let mut dir = self.directory.write().await;
            let removed = dir.remove(addr)?;
            (removed, dir.contacts().to_vec())
        };
        self.persist_contacts(&snapshot);
        if let Err(e) = self.store.clear_history(addr) {
            warn!("failed to delete conversation log for {addr}: {e}");
        }
        Ok(removed)
    }

    /// Block an address; subsequent (not retroactive) inbound traffic from
    /// it is suppressed.
    pub async fn block(&self, addr: SocketAddr) -> Result<bool, ClientError> {
        let (newly, snapshot) = {
            let mut blocks = self.blocklist.write().await;
            let newly = blocks.block(addr)?;
            (newly, blocks.addrs().collect::<Vec<_>>())
        };
        self.persist_blocked(snapshot);
        Ok(newly)
    }

    pub async fn unblock(&self, addr: SocketAddr) -> bool {
        let (removed, snapshot) = {
            let mut blocks = self.blocklist.write().await;
            let removed = blocks.unblock(addr);
            (removed, blocks.addrs().collect::<Vec<_>>())
        };
        self.persist_blocked(snapshot);
        removed
    }

    pub async fn clear_history(&self, addr: SocketAddr) -> Result<(), ClientError> {
        Ok(self.store.clear_history(addr)?)
    }

    fn persist_contacts(&self, contacts: &[Contact]) {
        if let Err(e) = self.store.save_contacts(contacts) {
            warn!("failed to persist contacts: {e}");
            self.status(format!("contact list not saved: {e}"));
        }
    }

    fn persist_blocked(&self, blocked: Vec<SocketAddr>) {
        if let Err(e) = self.store.save_blocked(blocked) {
            warn!("failed to persist block list: {e}");
            self.status(format!("block list not saved: {e}"));
        }
    }

    fn status(&self, text: String) {
        let _ = self.events.send(ClientEvent::Status(text));
    }
}

/// Receive loop: one long-lived task per connection.
async fn receive_loop(
    ctx: ReceiveContext,
    mut frames: FramedRead<OwnedReadHalf, MessageCodec>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            // User-initiated disconnect; `disconnect` reports the outcome.
            _ = shutdown.changed() => return,

            frame = frames.next() => match frame {
                Some(Ok(inbound)) => handle_inbound(&ctx, inbound).await,
                Some(Err(e)) => {
                    let _ = ctx.events.send(ClientEvent::Status(format!("receive error: {e}")));
                    break;
                }
                None => {
                    let _ = ctx.events.send(ClientEvent::Status("server closed the connection".into()));
                    break;
                }
            }
        }
    }

    *ctx.state.write().await = ConnectionState::Disconnected;
    let _ = ctx.events.send(ClientEvent::Disconnected);
}

/// Classify one inbound frame, apply the block filter, and route the
/// rendered line to the right conversation.
async fn handle_inbound(ctx: &ReceiveContext, inbound: Inbound) {
    let (target, line) = match inbound {
        Inbound::Invalid { raw } => (HUB_ADDR, format!("RAW SERVER MESSAGE: {raw}")),
        Inbound::Frame(msg) => {
            // Block filter runs before any log or display effect.
            if let Some(sender) = msg.sender {
                if ctx.blocklist.read().await.is_blocked(sender) {
                    debug!(%sender, "suppressed message from blocked address");
                    return;
                }
            }

            match (msg.kind, msg.sender) {
                (MessageKind::Direct, Some(sender)) => {
                    let name = resolve_sender(ctx, sender).await;
                    (sender, format!("DM FROM {name} ({sender}): {}", msg.content))
                }
                (MessageKind::Broadcast, Some(sender)) => {
                    let name = resolve_sender(ctx, sender).await;
                    (
                        HUB_ADDR,
                        format!("BROADCAST FROM {name} ({sender}): {}", msg.content),
                    )
                }
                (MessageKind::ServerDirect | MessageKind::ServerBroadcast, _) => {
                    (HUB_ADDR, format!("SERVER: {}", msg.content))
                }
                (MessageKind::Error, _) => (HUB_ADDR, format!("SERVER ERROR: {}", msg.content)),
                (kind, _) => (
                    HUB_ADDR,
                    format!("UNKNOWN MESSAGE TYPE ({kind}): {}", msg.content),
                ),
            }
        }
    };

    if let Err(e) = ctx.store.append_history(target, &line) {
        warn!("conversation log write failed: {e}");
        let _ = ctx
            .events
            .send(ClientEvent::Status(format!("history write failed: {e}")));
    }
    if *ctx.active.read().await == Some(target) {
        let _ = ctx.events.send(ClientEvent::Display { addr: target, line });
    }
}

/// Resolve a sender to a display name, auto-registering a placeholder
/// contact for unrecognized addresses (never for our own).
async fn resolve_sender(ctx: &ReceiveContext, sender: SocketAddr) -> String {
    {
        let dir = ctx.directory.read().await;
        if let Some(contact) = dir.resolve(sender) {
            return contact.name.clone();
        }
    }
    if sender == ctx.local_addr {
        return "UNKNOWN".into();
    }

    let (name, snapshot) = {
        let mut dir = ctx.directory.write().await;
        let name = dir.auto_register(sender);
        (name, dir.contacts().to_vec())
    };
    debug!(%sender, %name, "auto-registered unknown correspondent");
    if let Err(e) = ctx.store.save_contacts(&snapshot) {
        warn!("failed to persist auto-registered contact: {e}");
        let _ = ctx
            .events
            .send(ClientEvent::Status(format!("contact list not saved: {e}")));
    }
    name
}
