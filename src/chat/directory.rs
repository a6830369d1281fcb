/// Contact directory and block set — the peer's local view of who is who.
///
/// Both structures sit behind shared locks: the control surface edits them
/// and the receive loop reads them (and auto-registers unknown senders).
/// The hub contact is pinned first, immutable, and unblockable.
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Reserved address of the distinguished hub contact. Port 0 can never
/// belong to a live peer connection.
pub const HUB_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

/// Display name of the distinguished hub contact.
pub const HUB_CONTACT_NAME: &str = "Hub Messages";

/// A named association with a remote address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    fn hub() -> Self {
        Self::new(HUB_CONTACT_NAME, HUB_ADDR)
    }

    pub fn is_hub(&self) -> bool {
        self.addr == HUB_ADDR
    }
}

/// Deterministic name for a contact discovered from an unrecognized address.
pub fn placeholder_name(addr: SocketAddr) -> String {
    format!("Unknown User [{addr}]")
}

/// Local policy violations, rejected before any network or persistence
/// effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("the hub contact is reserved and cannot be added, edited, or removed")]
    HubContactReserved,
    #[error("the hub contact cannot be blocked")]
    HubContactUnblockable,
    #[error("a contact with address {0} already exists")]
    DuplicateAddress(SocketAddr),
    #[error("a contact named {0:?} already exists")]
    DuplicateName(String),
    #[error("no contact with address {0}")]
    UnknownContact(SocketAddr),
}

/// The contact directory. The hub contact is always present and first.
#[derive(Debug, Clone)]
pub struct Directory {
    contacts: Vec<Contact>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            contacts: vec![Contact::hub()],
        }
    }

    /// Build from persisted contacts, normalizing the hub contact to the
    /// front (and to its canonical name) whatever the file said.
    pub fn from_contacts(stored: Vec<Contact>) -> Self {
        let mut contacts = vec![Contact::hub()];
        let mut seen: HashSet<SocketAddr> = HashSet::from([HUB_ADDR]);
        for contact in stored {
            if seen.insert(contact.addr) {
                contacts.push(contact);
            }
        }
        Self { contacts }
    }

    /// All contacts, hub first.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn resolve(&self, addr: SocketAddr) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.addr == addr)
    }

    pub fn add(&mut self, name: impl Into<String>, addr: SocketAddr) -> Result<(), PolicyError> {
        let name = name.into();
        if addr == HUB_ADDR {
            return Err(PolicyError::HubContactReserved);
        }
        if self.resolve(addr).is_some() {
            return Err(PolicyError::DuplicateAddress(addr));
        }
        if self.contacts.iter().any(|c| c.name == name) {
            return Err(PolicyError::DuplicateName(name));
        }
        self.contacts.push(Contact::new(name, addr));
        Ok(())
    }

    /// Replace a contact's name and address.
    pub fn edit(
        &mut self,
        addr: SocketAddr,
        new_name: impl Into<String>,
        new_addr: SocketAddr,
    ) -> Result<(), PolicyError> {
        let new_name = new_name.into();
        if addr == HUB_ADDR || new_addr == HUB_ADDR {
            return Err(PolicyError::HubContactReserved);
        }
        if self.resolve(addr).is_none() {
            return Err(PolicyError::UnknownContact(addr));
        }
        if new_addr != addr && self.resolve(new_addr).is_some() {
            return Err(PolicyError::DuplicateAddress(new_addr));
        }
        if self
            .contacts
            .iter()
            .any(|c| c.name == new_name && c.addr != addr)
        {
            return Err(PolicyError::DuplicateName(new_name));
        }
        // resolve() above guarantees the entry exists.
        if let Some(contact) = self.contacts.iter_mut().find(|c| c.addr == addr) {
            contact.name = new_name;
            contact.addr = new_addr;
        }
        Ok(())
    }

    pub fn remove(&mut self, addr: SocketAddr) -> Result<Contact, PolicyError> {
        if addr == HUB_ADDR {
            return Err(PolicyError::HubContactReserved);
        }
        let idx = self
            .contacts
            .iter()
            .position(|c| c.addr == addr)
            .ok_or(PolicyError::UnknownContact(addr))?;
        Ok(self.contacts.remove(idx))
    }

    /// Register a placeholder contact for an unrecognized address and
    /// return its display name. No-op if the address is already known or
    /// reserved. Auto-discovered contacts persist until explicitly removed.
    pub fn auto_register(&mut self, addr: SocketAddr) -> String {
        if let Some(contact) = self.resolve(addr) {
            return contact.name.clone();
        }
        if addr == HUB_ADDR {
            return HUB_CONTACT_NAME.to_owned();
        }
        let name = placeholder_name(addr);
        self.contacts.push(Contact::new(name.clone(), addr));
        name
    }
}

/// Addresses whose inbound traffic this peer suppresses. Membership is
/// independent of directory membership.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocked: HashSet<SocketAddr>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            blocked: addrs.into_iter().filter(|a| *a != HUB_ADDR).collect(),
        }
    }

    /// Block an address. Returns false if it was already blocked.
    pub fn block(&mut self, addr: SocketAddr) -> Result<bool, PolicyError> {
        if addr == HUB_ADDR {
            return Err(PolicyError::HubContactUnblockable);
        }
        Ok(self.blocked.insert(addr))
    }

    /// Unblock an address. Returns false if it was not blocked.
    pub fn unblock(&mut self, addr: SocketAddr) -> bool {
        self.blocked.remove(&addr)
    }

    pub fn is_blocked(&self, addr: SocketAddr) -> bool {
        self.blocked.contains(&addr)
    }

    pub fn addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.blocked.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

pub type SharedDirectory = Arc<RwLock<Directory>>;
pub type SharedBlockList = Arc<RwLock<BlockList>>;
