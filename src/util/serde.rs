//! Shared value types used across the scheduler and its persistence layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority class of a request. Lower values are more urgent; class 0 is
/// always drained before class 1 is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityClass(u8);

impl PriorityClass {
    /// Most urgent class, reserved for node-internal fetches.
    pub const MAXIMUM: Self = Self(0);
    /// Requests a user is actively waiting on.
    pub const INTERACTIVE: Self = Self(1);
    /// Splitfile segments needed immediately.
    pub const IMMEDIATE_SPLITFILE: Self = Self(2);
    /// Update checks.
    pub const UPDATE: Self = Self(3);
    /// Bulk splitfile transfers; the default for queued downloads and uploads.
    pub const BULK_SPLITFILE: Self = Self(4);
    /// Speculative prefetch.
    pub const PREFETCH: Self = Self(5);
    /// Least urgent class.
    pub const MINIMUM: Self = Self(6);

    /// Number of distinct priority classes.
    pub const COUNT: usize = 7;

    /// Build a priority class from its ordinal, rejecting values past `MINIMUM`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        if value <= Self::MINIMUM.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Ordinal value of this class.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Iterate all classes from most to least urgent.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MAXIMUM.0..=Self::MINIMUM.0).map(Self)
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::BULK_SPLITFILE
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a client owning requests. The global queue has its own reserved
/// client name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Reserved name of the client owning global-queue requests.
    pub const GLOBAL_NAME: &'static str = "__global__";

    /// Create a client identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The global-queue client.
    #[must_use]
    pub fn global() -> Self {
        Self(Self::GLOBAL_NAME.to_string())
    }

    /// Whether this is the global-queue client.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL_NAME
    }

    /// Name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content key a request fetches from or inserts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Wrap a key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Best filename for display: the last non-empty path segment, or the
    /// whole key when it has none.
    #[must_use]
    pub fn preferred_filename(&self) -> &str {
        self.0
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a schedulable item, used for grab-array membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a grab array inside the priority index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArrayId(pub u64);

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array-{}", self.0)
    }
}

/// Whether an item or container must survive a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Memory only.
    Transient,
    /// Backed by the durable store.
    Durable,
}

impl Durability {
    /// True for [`Durability::Durable`].
    #[must_use]
    pub const fn is_durable(self) -> bool {
        matches!(self, Self::Durable)
    }
}
