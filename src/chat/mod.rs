/// LAN chat fabric: a TCP hub that relays newline-delimited JSON messages
/// between peers, and the peer-side machinery that talks to it.
pub mod client;
pub mod codec;
pub mod console;
pub mod directory;
pub mod hub;
pub mod message;
pub mod registry;
pub mod store;

pub use client::{Client, ClientError, ClientEvent, ConnectionState};
pub use codec::{CodecError, Inbound, MessageCodec, MAX_FRAME_LENGTH};
pub use directory::{BlockList, Contact, Directory, PolicyError, HUB_ADDR};
pub use hub::{ConnectionInfo, Hub};
pub use message::{Message, MessageKind};
pub use store::{ServerDef, Store, StoreError};
