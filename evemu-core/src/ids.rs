use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::TryFromIntError;
use std::sync::atomic::{AtomicU64, Ordering};

/// A connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

/// A live game entity, such as an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(u32);

/// A bound object issued to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl ClientId {
    pub fn new(value: u64) -> Self {
        ClientId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl EntityId {
    pub fn new(value: u32) -> Self {
        EntityId(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl CharacterId {
    pub fn new(value: u32) -> Self {
        CharacterId(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl HandleId {
    pub fn new(value: u64) -> Self {
        HandleId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharacterId({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(value: u32) -> Self {
        EntityId::new(value)
    }
}

/// Entity ids travel as wire `Int`s; ids past `i32::MAX` have no wire form.
impl TryFrom<EntityId> for i32 {
    type Error = TryFromIntError;

    fn try_from(id: EntityId) -> Result<Self, Self::Error> {
        i32::try_from(id.0)
    }
}

impl From<u32> for CharacterId {
    fn from(value: u32) -> Self {
        CharacterId::new(value)
    }
}

/// Hands out monotonically increasing ids starting at 1.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_client(&self) -> ClientId {
        ClientId::new(self.bump())
    }

    pub fn next_handle(&self) -> HandleId {
        HandleId::new(self.bump())
    }

    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
