/// Integration tests for the peer client against a live hub.
///
/// Each test binds a hub on an ephemeral port, connects a `Client` backed
/// by a temporary data directory, and drives a second raw peer to produce
/// inbound traffic. Assertions look at the client's event stream and at
/// the conversation logs it writes.
use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

use lanchat::chat::client::{Client, ClientError, ClientEvent, ConnectionState};
use lanchat::chat::codec::MessageCodec;
use lanchat::chat::directory::{placeholder_name, HUB_ADDR};
use lanchat::chat::hub::Hub;
use lanchat::chat::message::Message;
use lanchat::chat::store::{ServerDef, Store};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

struct Fixture {
    hub: Hub,
    client: Client,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    data_dir: TempDir,
}

async fn fixture() -> Fixture {
    let hub = Hub::bind("127.0.0.1:0").await.unwrap();
    let data_dir = TempDir::new().unwrap();
    let store = Store::open(data_dir.path()).unwrap();
    let (tx, events) = mpsc::unbounded_channel();
    let mut client = Client::new(store, tx).unwrap();

    let addr = hub.local_addr();
    let server = ServerDef::new("test hub", addr.ip().to_string(), addr.port());
    client.connect(&server).await.unwrap();

    Fixture {
        hub,
        client,
        events,
        data_dir,
    }
}

impl Fixture {
    fn store(&self) -> Store {
        Store::open(self.data_dir.path()).unwrap()
    }

    /// Pull events until one matches, discarding status chatter.
    async fn wait_for(
        &mut self,
        mut pred: impl FnMut(&ClientEvent) -> bool,
    ) -> ClientEvent {
        timeout(RECV_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

/// A second peer on the same hub, speaking the raw protocol.
struct RawPeer {
    framed: Framed<TcpStream, MessageCodec>,
    addr: SocketAddr,
}

impl RawPeer {
    async fn connect(hub: &Hub) -> RawPeer {
        let stream = TcpStream::connect(hub.local_addr()).await.unwrap();
        let addr = stream.local_addr().unwrap();
        let peer = RawPeer {
            framed: Framed::new(stream, MessageCodec),
            addr,
        };
        // Let the hub's per-connection task register before we route.
        sleep(Duration::from_millis(50)).await;
        peer
    }

    async fn send(&mut self, msg: Message) {
        self.framed.send(msg).await.unwrap();
    }
}

#[tokio::test]
async fn broadcast_from_stranger_lands_in_hub_conversation() {
    let mut fx = fixture().await;
    fx.client.select_conversation(HUB_ADDR).await;
    let mut stranger = RawPeer::connect(&fx.hub).await;

    stranger.send(Message::broadcast("hello everyone")).await;

    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { .. }))
        .await;
    let expected_name = placeholder_name(stranger.addr);
    match event {
        ClientEvent::Display { addr, line } => {
            assert_eq!(addr, HUB_ADDR);
            assert_eq!(
                line,
                format!("BROADCAST FROM {expected_name} ({}): hello everyone", stranger.addr)
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The stranger was auto-registered.
    let contacts = fx.client.contacts().await;
    assert!(contacts
        .iter()
        .any(|c| c.addr == stranger.addr && c.name == expected_name));
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn direct_message_lands_in_sender_conversation() {
    let mut fx = fixture().await;
    let mut peer = RawPeer::connect(&fx.hub).await;
    fx.client.add_contact("ada", peer.addr).await.unwrap();
    fx.client.select_conversation(peer.addr).await;

    let my_addr = fx.client.local_addr().unwrap();
    peer.send(Message::direct(my_addr, "just for you")).await;

    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { .. }))
        .await;
    match event {
        ClientEvent::Display { addr, line } => {
            assert_eq!(addr, peer.addr);
            assert_eq!(line, format!("DM FROM ada ({}): just for you", peer.addr));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The line was logged to the sender's conversation.
    let history = fx.store().load_history(peer.addr).unwrap();
    assert_eq!(history, vec![format!("DM FROM ada ({}): just for you", peer.addr)]);
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn sending_echoes_into_the_conversation_log() {
    let mut fx = fixture().await;
    let peer = RawPeer::connect(&fx.hub).await;
    fx.client.add_contact("ada", peer.addr).await.unwrap();
    fx.client.select_conversation(peer.addr).await;

    fx.client.send_to(peer.addr, "hi ada").await.unwrap();

    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { .. }))
        .await;
    match event {
        ClientEvent::Display { addr, line } => {
            assert_eq!(addr, peer.addr);
            assert_eq!(line, "YOU (ada): hi ada");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        fx.store().load_history(peer.addr).unwrap(),
        vec!["YOU (ada): hi ada"]
    );
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn sending_to_hub_contact_broadcasts() {
    let mut fx = fixture().await;
    fx.client.select_conversation(HUB_ADDR).await;
    let mut listener = RawPeer::connect(&fx.hub).await;

    fx.client.send_to(HUB_ADDR, "hi all").await.unwrap();

    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { .. }))
        .await;
    match event {
        ClientEvent::Display { line, .. } => assert_eq!(line, "YOU (BROADCAST): hi all"),
        other => panic!("unexpected event: {other:?}"),
    }

    // The other peer received it as a BROADCAST.
    let got = timeout(RECV_TIMEOUT, futures::StreamExt::next(&mut listener.framed))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match got {
        lanchat::chat::codec::Inbound::Frame(msg) => {
            assert_eq!(msg.content, "hi all");
            assert_eq!(msg.sender, fx.client.local_addr());
        }
        other => panic!("unexpected inbound: {other:?}"),
    }
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn blocked_sender_is_suppressed_until_unblocked() {
    let mut fx = fixture().await;
    fx.client.select_conversation(HUB_ADDR).await;
    let mut noisy = RawPeer::connect(&fx.hub).await;
    fx.client.block(noisy.addr).await.unwrap();

    noisy.send(Message::broadcast("spam")).await;
    // Give the message time to traverse hub and client.
    sleep(Duration::from_millis(200)).await;

    // No display event, no log line.
    while let Ok(event) = fx.events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::Display { .. }),
            "blocked sender leaked: {event:?}"
        );
    }
    assert!(fx.store().load_history(HUB_ADDR).unwrap().is_empty());

    // Unblocking is not retroactive but restores future traffic.
    assert!(fx.client.unblock(noisy.addr).await);
    noisy.send(Message::broadcast("am I back")).await;
    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { .. }))
        .await;
    match event {
        ClientEvent::Display { line, .. } => assert!(line.ends_with("am I back")),
        other => panic!("unexpected event: {other:?}"),
    }
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn sending_to_blocked_contact_is_refused() {
    let mut fx = fixture().await;
    let peer = RawPeer::connect(&fx.hub).await;
    fx.client.block(peer.addr).await.unwrap();

    let err = fx.client.send_to(peer.addr, "hi").await.unwrap_err();
    assert!(matches!(err, ClientError::RecipientBlocked(a) if a == peer.addr));
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn hub_error_reply_lands_in_hub_conversation() {
    let mut fx = fixture().await;
    fx.client.select_conversation(HUB_ADDR).await;

    let ghost: SocketAddr = "10.255.0.9:1".parse().unwrap();
    fx.client.add_contact("ghost", ghost).await.unwrap();
    fx.client.send_to(ghost, "anyone").await.unwrap();

    let event = fx
        .wait_for(|e| matches!(e, ClientEvent::Display { line, .. } if line.starts_with("SERVER ERROR")))
        .await;
    match event {
        ClientEvent::Display { addr, line } => {
            assert_eq!(addr, HUB_ADDR);
            assert!(line.contains("10.255.0.9:1"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn forced_disconnect_surfaces_as_event() {
    let mut fx = fixture().await;
    let my_addr = fx.client.local_addr().unwrap();

    assert!(fx.hub.disconnect(my_addr).await);
    fx.wait_for(|e| matches!(e, ClientEvent::Disconnected)).await;
    assert_eq!(fx.client.state().await, ConnectionState::Disconnected);

    let err = fx.client.send_to("10.0.0.2:9000".parse().unwrap(), "hi").await;
    assert!(matches!(err, Err(ClientError::NotConnected)));
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn reconnect_after_user_disconnect() {
    let mut fx = fixture().await;
    fx.client.disconnect().await;
    assert_eq!(fx.client.state().await, ConnectionState::Disconnected);

    let addr = fx.hub.local_addr();
    let server = ServerDef::new("test hub", addr.ip().to_string(), addr.port());
    fx.client.connect(&server).await.unwrap();
    assert_eq!(fx.client.state().await, ConnectionState::Connected);

    fx.client.select_conversation(HUB_ADDR).await;
    fx.client.send_to(HUB_ADDR, "back again").await.unwrap();
    fx.wait_for(|e| matches!(e, ClientEvent::Display { .. })).await;
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn contact_edit_carries_history_to_the_new_address() {
    let fx = fixture().await;
    let old: SocketAddr = "10.0.0.2:9000".parse().unwrap();
    let new: SocketAddr = "10.0.0.2:9100".parse().unwrap();
    fx.client.add_contact("ada", old).await.unwrap();
    fx.store().append_history(old, "old line").unwrap();

    fx.client.edit_contact(old, "ada", new).await.unwrap();

    assert!(fx.store().load_history(old).unwrap().is_empty());
    assert_eq!(fx.store().load_history(new).unwrap(), vec!["old line"]);
    fx.hub.shutdown().await;
}

#[tokio::test]
async fn removing_a_contact_deletes_its_log() {
    let fx = fixture().await;
    let peer: SocketAddr = "10.0.0.2:9000".parse().unwrap();
    fx.client.add_contact("ada", peer).await.unwrap();
    fx.store().append_history(peer, "line").unwrap();

    let removed = fx.client.remove_contact(peer).await.unwrap();
    assert_eq!(removed.name, "ada");
    assert!(fx.store().load_history(peer).unwrap().is_empty());
    assert!(fx.store().load_contacts().unwrap().iter().all(|c| c.addr != peer));
    fx.hub.shutdown().await;
}
