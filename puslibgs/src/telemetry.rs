//! Telemetry definitions for PUSpecial
//!
//! Telemetry is sent from space to ground. Verification reports live in
//! [`crate::verification`]; this module holds the service reports.

use serde::{Deserialize, Serialize};

use crate::commands::{put_count, put_u32, put_store_id, PayloadReader, STORAGE_SERVICE, TEST_SERVICE};
use crate::error::ValidationError;
use crate::packet::SpacePacket;
use crate::types::{OnboardTime, RetrievalState, StoreId, StoreKind, VirtualChannel};

/// Storage report subtypes
pub const CONTENT_SUMMARY_REPORT: u8 = 13;
pub const STATUS_REPORT: u8 = 19;
pub const CONFIGURATION_REPORT: u8 = 23;

/// Test service report subtype
pub const CONNECTION_TEST_REPORT: u8 = 2;

/// One line of the packet store configuration report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfiguration {
    pub id: StoreId,
    pub kind: StoreKind,
    pub capacity_bytes: usize,
    pub used_bytes: usize,
    pub virtual_channel: VirtualChannel,
    pub storage_enabled: bool,
    pub retrieval: RetrievalState,
}

/// Content summary of one packet store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentSummary {
    pub id: StoreId,
    pub oldest: Option<OnboardTime>,
    pub newest: Option<OnboardTime>,
    pub entry_count: usize,
    pub used_bytes: usize,
    /// Entries not yet delivered by open retrieval
    pub open_entry_count: usize,
}

/// One line of the packet store status report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStatus {
    pub id: StoreId,
    pub retrieval: RetrievalState,
    pub cursor: usize,
    pub storage_enabled: bool,
    pub time_range_in_progress: bool,
}

/// Union of all service reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Telemetry {
    Configuration(Vec<StoreConfiguration>),
    ContentSummary(ContentSummary),
    Status(Vec<StoreStatus>),
    ConnectionTest,
}

impl Telemetry {
    pub fn service_type(&self) -> u8 {
        match self {
            Telemetry::ConnectionTest => TEST_SERVICE,
            _ => STORAGE_SERVICE,
        }
    }

    pub fn service_subtype(&self) -> u8 {
        match self {
            Telemetry::Configuration(_) => CONFIGURATION_REPORT,
            Telemetry::ContentSummary(_) => CONTENT_SUMMARY_REPORT,
            Telemetry::Status(_) => STATUS_REPORT,
            Telemetry::ConnectionTest => CONNECTION_TEST_REPORT,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = Vec::new();
        match self {
            Telemetry::Configuration(stores) => {
                put_count(&mut w, stores.len());
                for s in stores {
                    put_store_id(&mut w, &s.id);
                    w.push(s.kind.to_u8());
                    put_u32(&mut w, s.capacity_bytes);
                    put_u32(&mut w, s.used_bytes);
                    w.push(s.virtual_channel.0);
                    w.push(s.storage_enabled as u8);
                    w.push(s.retrieval.to_u8());
                }
            }
            Telemetry::ContentSummary(s) => {
                put_store_id(&mut w, &s.id);
                w.extend_from_slice(&s.oldest.unwrap_or_default().0.to_be_bytes());
                w.extend_from_slice(&s.newest.unwrap_or_default().0.to_be_bytes());
                put_u32(&mut w, s.entry_count);
                put_u32(&mut w, s.used_bytes);
                put_u32(&mut w, s.open_entry_count);
            }
            Telemetry::Status(stores) => {
                put_count(&mut w, stores.len());
                for s in stores {
                    put_store_id(&mut w, &s.id);
                    w.push(s.retrieval.to_u8());
                    put_u32(&mut w, s.cursor);
                    w.push(s.storage_enabled as u8);
                    w.push(s.time_range_in_progress as u8);
                }
            }
            Telemetry::ConnectionTest => {}
        }
        w
    }

    /// Wrap the report in a telemetry packet from `apid`
    pub fn to_packet(&self, apid: u16, counter: u16) -> SpacePacket {
        SpacePacket::telemetry(
            apid,
            self.service_type(),
            self.service_subtype(),
            counter,
            self.to_payload(),
        )
    }

    /// Parse a service report, as ground software would
    pub fn from_packet(packet: &SpacePacket) -> Result<Self, ValidationError> {
        let mut r = PayloadReader::new(&packet.payload);
        let tlm = match (packet.service_type, packet.service_subtype) {
            (STORAGE_SERVICE, CONFIGURATION_REPORT) => {
                let count = r.u8("store count")?;
                let mut stores = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    stores.push(StoreConfiguration {
                        id: r.store_id()?,
                        kind: StoreKind::from_u8(r.u8("store type")?)
                            .ok_or(ValidationError::InvalidField("store type"))?,
                        capacity_bytes: r.u32("capacity")? as usize,
                        used_bytes: r.u32("used bytes")? as usize,
                        virtual_channel: VirtualChannel(r.u8("virtual channel")?),
                        storage_enabled: r.u8("storage enabled")? != 0,
                        retrieval: retrieval_state(r.u8("retrieval state")?)?,
                    });
                }
                Telemetry::Configuration(stores)
            }
            (STORAGE_SERVICE, CONTENT_SUMMARY_REPORT) => {
                let id = r.store_id()?;
                let oldest = r.time("oldest")?;
                let newest = r.time("newest")?;
                let entry_count = r.u32("entry count")? as usize;
                let empty = entry_count == 0;
                Telemetry::ContentSummary(ContentSummary {
                    id,
                    oldest: (!empty).then_some(oldest),
                    newest: (!empty).then_some(newest),
                    entry_count,
                    used_bytes: r.u32("used bytes")? as usize,
                    open_entry_count: r.u32("open entry count")? as usize,
                })
            }
            (STORAGE_SERVICE, STATUS_REPORT) => {
                let count = r.u8("store count")?;
                let mut stores = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    stores.push(StoreStatus {
                        id: r.store_id()?,
                        retrieval: retrieval_state(r.u8("retrieval state")?)?,
                        cursor: r.u32("cursor")? as usize,
                        storage_enabled: r.u8("storage enabled")? != 0,
                        time_range_in_progress: r.u8("time range")? != 0,
                    });
                }
                Telemetry::Status(stores)
            }
            (TEST_SERVICE, CONNECTION_TEST_REPORT) => Telemetry::ConnectionTest,
            _ => return Err(ValidationError::InvalidField("report type")),
        };
        r.finish()?;
        Ok(tlm)
    }
}

fn retrieval_state(value: u8) -> Result<RetrievalState, ValidationError> {
    RetrievalState::from_u8(value).ok_or(ValidationError::InvalidField("retrieval state"))
}
