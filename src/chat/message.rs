/// Chat message model and JSON wire form.
///
/// One message per line on the wire:
///   {"type":"DIRECT","recipient":"10.0.0.7:9000","message":"hi","sender_ip":"10.0.0.2:51044"}
///
/// `sender_ip` is stamped by the hub from the transport-observed address.
/// Whatever a client puts there is ignored and overwritten before routing.
use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Deserializer, Serialize};

/// Message classification, as carried in the wire `type` field.
///
/// Unrecognized tags decode to [`MessageKind::Unknown`] rather than failing,
/// so a peer speaking a newer dialect still gets a well-formed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Direct,
    Broadcast,
    ServerDirect,
    ServerBroadcast,
    Error,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Direct => "DIRECT",
            Self::Broadcast => "BROADCAST",
            Self::ServerDirect => "SERVER_DIRECT",
            Self::ServerBroadcast => "SERVER_BROADCAST",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(tag)
    }
}

/// A single logical chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Target address, required and meaningful only for DIRECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Display content.
    #[serde(rename = "message", default)]
    pub content: String,
    /// Origin address, stamped by the hub. Unparseable inbound values are
    /// dropped instead of rejecting the whole message.
    #[serde(
        rename = "sender_ip",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_addr"
    )]
    pub sender: Option<SocketAddr>,
}

/// Errors from decoding a wire line into a [`Message`].
#[derive(Debug, thiserror::Error)]
#[error("malformed message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Message {
    pub fn direct(recipient: SocketAddr, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Direct,
            recipient: Some(recipient.to_string()),
            content: content.into(),
            sender: None,
        }
    }

    pub fn broadcast(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            recipient: None,
            content: content.into(),
            sender: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            recipient: None,
            content: content.into(),
            sender: None,
        }
    }

    pub fn server_direct(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ServerDirect,
            recipient: None,
            content: content.into(),
            sender: None,
        }
    }

    pub fn server_broadcast(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ServerBroadcast,
            recipient: None,
            content: content.into(),
            sender: None,
        }
    }

    /// Parse one wire line (without the trailing newline).
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize to the JSON wire form (without trailing newline).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The recipient parsed as a full address tuple, if present and valid.
    pub fn recipient_addr(&self) -> Option<SocketAddr> {
        self.recipient.as_deref().and_then(|r| r.parse().ok())
    }
}

fn lenient_addr<'de, D>(deserializer: D) -> Result<Option<SocketAddr>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}
