//! Records and keys

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Primary key, unique within one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(u64);

impl Key {
    /// Create a key
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw key value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The key immediately after this one, if any
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which store minted a record's key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Key assigned by the primary store (or not assigned yet)
    #[default]
    Primary,
    /// Key minted by the secondary store while the primary was unreachable
    Local,
}

/// A persisted entity
///
/// `uid` is generated once, when the record is created, and never changes. It
/// survives re-keying and is what reconciliation deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Store key (`None` until a store assigns one)
    pub key: Option<Key>,
    /// Globally unique identifier
    pub uid: Uuid,
    /// Which store minted `key`
    #[serde(default)]
    pub origin: Origin,
    /// Domain payload
    pub body: T,
}

impl<T> Record<T> {
    /// Create an unkeyed record
    pub fn new(body: T) -> Self {
        Self {
            key: None,
            uid: Uuid::new_v4(),
            origin: Origin::Primary,
            body,
        }
    }

    /// Set the key
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    /// Check whether the secondary store minted this record's key
    pub fn is_locally_originated(&self) -> bool {
        self.origin == Origin::Local
    }
}
