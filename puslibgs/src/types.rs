//! Type definitions shared between ground and space software

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Maximum length of a packet store identifier in bytes
pub const STORE_ID_MAX_LEN: usize = 16;

/// Most packet stores a node holds, bounded by the one-byte store counts of
/// commands and reports
pub const MAX_STORES: usize = u8::MAX as usize;

/// Largest store capacity in bytes, bounded by the four-byte size fields of
/// commands and reports
pub const MAX_STORE_CAPACITY: usize = u32::MAX as usize;

/// Characters reserved for id patterns, never allowed in a store id
pub const STORE_ID_WILDCARDS: [char; 2] = ['*', '.'];

/// Onboard monotonic time in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OnboardTime(pub u64);

impl OnboardTime {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OnboardTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Packet store identifier, 1 to 16 bytes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(String);

impl StoreId {
    /// Create an identifier, checking only its length. Wildcards are checked
    /// separately since they are rejected at a later stage than bad lengths.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::InvalidField("store id"));
        }
        if id.len() > STORE_ID_MAX_LEN {
            return Err(ValidationError::FieldTooLong("store id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.contains(&STORE_ID_WILDCARDS[..])
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Packet store type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Rejects new packets once full
    Bounded,
    /// Evicts the oldest packets to admit new ones
    Circular,
}

impl StoreKind {
    pub fn to_u8(&self) -> u8 {
        match self {
            StoreKind::Circular => 0,
            StoreKind::Bounded => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StoreKind::Circular),
            1 => Some(StoreKind::Bounded),
            _ => None,
        }
    }
}

/// Virtual channel a store plays back on
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualChannel(pub u8);

impl fmt::Display for VirtualChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VC{}", self.0)
    }
}

/// Open retrieval state of a packet store
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetrievalState {
    #[default]
    Closed,
    Open,
    Suspended,
}

impl RetrievalState {
    pub fn to_u8(&self) -> u8 {
        match self {
            RetrievalState::Closed => 0,
            RetrievalState::Open => 1,
            RetrievalState::Suspended => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RetrievalState::Closed),
            1 => Some(RetrievalState::Open),
            2 => Some(RetrievalState::Suspended),
            _ => None,
        }
    }
}

/// Verification stages a telecommand asks to have reported
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckFlags(pub u8);

impl AckFlags {
    pub const ACCEPTANCE: u8 = 0b0001;
    pub const START: u8 = 0b0010;
    pub const PROGRESS: u8 = 0b0100;
    pub const COMPLETION: u8 = 0b1000;

    pub const NONE: AckFlags = AckFlags(0);
    pub const ALL: AckFlags = AckFlags(0b1111);

    pub fn new(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// Correlation key between a telecommand and its verification reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId {
    pub apid: u16,
    pub sequence_count: u16,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}/{}", self.apid, self.sequence_count)
    }
}
