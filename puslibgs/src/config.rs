//! Packet store specifications
//!
//! A `StoreSpec` describes one packet store to be created, either from the
//! startup configuration or from a create command.

use serde::{Deserialize, Serialize};

use crate::types::{StoreId, StoreKind, VirtualChannel, MAX_STORE_CAPACITY};

/// Description of a packet store to create
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSpec {
    pub id: StoreId,
    pub capacity_bytes: usize,
    pub kind: StoreKind,
    pub virtual_channel: VirtualChannel,
    pub storage_enabled: bool,
    /// Only packets from these APIDs are stored; empty stores everything
    pub apids: Vec<u16>,
}

impl StoreSpec {
    pub fn new(id: StoreId, capacity_bytes: usize, kind: StoreKind, virtual_channel: VirtualChannel) -> Self {
        Self {
            id,
            capacity_bytes,
            kind,
            virtual_channel,
            storage_enabled: true,
            apids: Vec::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// JSON representation of a store spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSpecJson {
    pub id: String,
    pub capacity_bytes: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub virtual_channel: u8,
    #[serde(default = "default_enabled")]
    pub storage_enabled: bool,
    #[serde(default)]
    pub apids: Vec<u16>,
}

impl StoreSpecJson {
    pub fn to_store_spec(&self) -> Result<StoreSpec, String> {
        let id = StoreId::new(self.id.as_str()).map_err(|e| format!("{}: {}", self.id, e))?;
        if id.has_wildcard() {
            return Err(format!("Store id {} contains a wildcard", id));
        }
        if self.capacity_bytes == 0 {
            return Err(format!("Store {} has zero capacity", id));
        }
        if self.capacity_bytes > MAX_STORE_CAPACITY {
            return Err(format!(
                "Store {} capacity {} exceeds {} bytes",
                id, self.capacity_bytes, MAX_STORE_CAPACITY
            ));
        }
        let kind = match self.kind.as_str() {
            "bounded" => StoreKind::Bounded,
            "circular" => StoreKind::Circular,
            _ => return Err(format!("Invalid store type: {}", self.kind)),
        };

        Ok(StoreSpec {
            id,
            capacity_bytes: self.capacity_bytes,
            kind,
            virtual_channel: VirtualChannel(self.virtual_channel),
            storage_enabled: self.storage_enabled,
            apids: self.apids.clone(),
        })
    }
}
