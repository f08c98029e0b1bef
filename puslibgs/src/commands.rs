//! Command definitions for PUSpecial
//!
//! Commands are sent from ground to space as PUS telecommands. Only the
//! storage-and-retrieval service (15) and the test service (17) are
//! interpreted on board; payloads are parsed here and built here for ground use.

use serde::{Deserialize, Serialize};

use crate::config::StoreSpec;
use crate::error::ValidationError;
use crate::packet::{ServiceTable, SpacePacket};
use crate::types::{AckFlags, OnboardTime, StoreId, StoreKind, VirtualChannel, STORE_ID_MAX_LEN};

/// Storage and retrieval service type
pub const STORAGE_SERVICE: u8 = 15;

/// Test service type
pub const TEST_SERVICE: u8 = 17;

/// Connection test subtype of the test service
pub const CONNECTION_TEST: u8 = 1;

/// Storage and retrieval telecommand subtypes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageSubtype {
    EnableStorage,
    DisableStorage,
    StartByTimeRange,
    DeleteContent,
    ReportContentSummary,
    ChangeStartTime,
    ResumeRetrieval,
    SuspendRetrieval,
    AbortByTimeRange,
    ReportStatus,
    Create,
    Delete,
    ReportConfiguration,
    CopyInWindow,
    Resize,
    ChangeType,
    ChangeVirtualChannel,
    EnableRetrieval,
    DisableRetrieval,
}

impl StorageSubtype {
    pub const ALL: [StorageSubtype; 19] = [
        StorageSubtype::EnableStorage,
        StorageSubtype::DisableStorage,
        StorageSubtype::StartByTimeRange,
        StorageSubtype::DeleteContent,
        StorageSubtype::ReportContentSummary,
        StorageSubtype::ChangeStartTime,
        StorageSubtype::ResumeRetrieval,
        StorageSubtype::SuspendRetrieval,
        StorageSubtype::AbortByTimeRange,
        StorageSubtype::ReportStatus,
        StorageSubtype::Create,
        StorageSubtype::Delete,
        StorageSubtype::ReportConfiguration,
        StorageSubtype::CopyInWindow,
        StorageSubtype::Resize,
        StorageSubtype::ChangeType,
        StorageSubtype::ChangeVirtualChannel,
        StorageSubtype::EnableRetrieval,
        StorageSubtype::DisableRetrieval,
    ];

    pub fn to_u8(&self) -> u8 {
        match self {
            StorageSubtype::EnableStorage => 1,
            StorageSubtype::DisableStorage => 2,
            StorageSubtype::StartByTimeRange => 9,
            StorageSubtype::DeleteContent => 11,
            StorageSubtype::ReportContentSummary => 12,
            StorageSubtype::ChangeStartTime => 14,
            StorageSubtype::ResumeRetrieval => 15,
            StorageSubtype::SuspendRetrieval => 16,
            StorageSubtype::AbortByTimeRange => 17,
            StorageSubtype::ReportStatus => 18,
            StorageSubtype::Create => 20,
            StorageSubtype::Delete => 21,
            StorageSubtype::ReportConfiguration => 22,
            StorageSubtype::CopyInWindow => 24,
            StorageSubtype::Resize => 25,
            StorageSubtype::ChangeType => 26,
            StorageSubtype::ChangeVirtualChannel => 28,
            StorageSubtype::EnableRetrieval => 29,
            StorageSubtype::DisableRetrieval => 30,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.to_u8() == value)
    }
}

/// Service table of every telecommand interpreted on board
pub fn supported_services() -> ServiceTable {
    let storage: Vec<u8> = StorageSubtype::ALL.iter().map(|s| s.to_u8()).collect();
    ServiceTable::new()
        .with_service(STORAGE_SERVICE, &storage)
        .with_service(TEST_SERVICE, &[CONNECTION_TEST])
}

/// Stores addressed by a batch command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreSelection {
    All,
    Ids(Vec<StoreId>),
}

impl StoreSelection {
    /// Count-prefixed encoding, as carried by batch commands
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Vec::new();
        put_selection(&mut w, self);
        w
    }
}

/// Range of a delete-content command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeleteRange {
    All,
    UpTo(OnboardTime),
}

/// Storage and retrieval commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageCommand {
    EnableStorage(StoreSelection),
    DisableStorage(StoreSelection),
    StartByTimeRange { id: StoreId, from: OnboardTime, to: OnboardTime },
    DeleteContent { id: StoreId, range: DeleteRange },
    ReportContentSummary(StoreSelection),
    ChangeStartTime { id: StoreId, time: OnboardTime },
    ResumeRetrieval(StoreId),
    SuspendRetrieval(StoreId),
    AbortByTimeRange(StoreId),
    ReportStatus,
    Create(Vec<StoreSpec>),
    Delete(Vec<StoreId>),
    ReportConfiguration,
    CopyInWindow { src: StoreId, dst: StoreId, from: OnboardTime, to: OnboardTime },
    Resize { id: StoreId, capacity: usize },
    ChangeType { id: StoreId, kind: StoreKind },
    ChangeVirtualChannel { id: StoreId, vc: VirtualChannel },
    EnableRetrieval(StoreId),
    DisableRetrieval(StoreId),
}

impl StorageCommand {
    pub fn subtype(&self) -> StorageSubtype {
        match self {
            StorageCommand::EnableStorage(_) => StorageSubtype::EnableStorage,
            StorageCommand::DisableStorage(_) => StorageSubtype::DisableStorage,
            StorageCommand::StartByTimeRange { .. } => StorageSubtype::StartByTimeRange,
            StorageCommand::DeleteContent { .. } => StorageSubtype::DeleteContent,
            StorageCommand::ReportContentSummary(_) => StorageSubtype::ReportContentSummary,
            StorageCommand::ChangeStartTime { .. } => StorageSubtype::ChangeStartTime,
            StorageCommand::ResumeRetrieval(_) => StorageSubtype::ResumeRetrieval,
            StorageCommand::SuspendRetrieval(_) => StorageSubtype::SuspendRetrieval,
            StorageCommand::AbortByTimeRange(_) => StorageSubtype::AbortByTimeRange,
            StorageCommand::ReportStatus => StorageSubtype::ReportStatus,
            StorageCommand::Create(_) => StorageSubtype::Create,
            StorageCommand::Delete(_) => StorageSubtype::Delete,
            StorageCommand::ReportConfiguration => StorageSubtype::ReportConfiguration,
            StorageCommand::CopyInWindow { .. } => StorageSubtype::CopyInWindow,
            StorageCommand::Resize { .. } => StorageSubtype::Resize,
            StorageCommand::ChangeType { .. } => StorageSubtype::ChangeType,
            StorageCommand::ChangeVirtualChannel { .. } => StorageSubtype::ChangeVirtualChannel,
            StorageCommand::EnableRetrieval(_) => StorageSubtype::EnableRetrieval,
            StorageCommand::DisableRetrieval(_) => StorageSubtype::DisableRetrieval,
        }
    }

    /// Parse the application data of a service 15 telecommand
    pub fn parse(subtype: u8, payload: &[u8]) -> Result<Self, ValidationError> {
        let subtype =
            StorageSubtype::from_u8(subtype).ok_or(ValidationError::InvalidField("service subtype"))?;
        let mut r = PayloadReader::new(payload);

        let cmd = match subtype {
            StorageSubtype::EnableStorage => StorageCommand::EnableStorage(r.selection()?),
            StorageSubtype::DisableStorage => StorageCommand::DisableStorage(r.selection()?),
            StorageSubtype::StartByTimeRange => {
                let id = r.store_id()?;
                let (from, to) = r.window()?;
                StorageCommand::StartByTimeRange { id, from, to }
            }
            StorageSubtype::DeleteContent => {
                let id = r.store_id()?;
                let range = match r.u8("delete mode")? {
                    0 => DeleteRange::All,
                    1 => DeleteRange::UpTo(r.time("delete time")?),
                    _ => return Err(ValidationError::InvalidField("delete mode")),
                };
                StorageCommand::DeleteContent { id, range }
            }
            StorageSubtype::ReportContentSummary => {
                StorageCommand::ReportContentSummary(r.selection()?)
            }
            StorageSubtype::ChangeStartTime => StorageCommand::ChangeStartTime {
                id: r.store_id()?,
                time: r.time("start time")?,
            },
            StorageSubtype::ResumeRetrieval => StorageCommand::ResumeRetrieval(r.store_id()?),
            StorageSubtype::SuspendRetrieval => StorageCommand::SuspendRetrieval(r.store_id()?),
            StorageSubtype::AbortByTimeRange => StorageCommand::AbortByTimeRange(r.store_id()?),
            StorageSubtype::ReportStatus => StorageCommand::ReportStatus,
            StorageSubtype::Create => {
                let count = r.u8("store count")?;
                if count == 0 {
                    return Err(ValidationError::InvalidField("store count"));
                }
                let mut specs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = r.store_id()?;
                    let capacity = r.u32("capacity")? as usize;
                    let kind = StoreKind::from_u8(r.u8("store type")?)
                        .ok_or(ValidationError::InvalidField("store type"))?;
                    let vc = VirtualChannel(r.u8("virtual channel")?);
                    specs.push(StoreSpec::new(id, capacity, kind, vc));
                }
                StorageCommand::Create(specs)
            }
            StorageSubtype::Delete => match r.selection()? {
                StoreSelection::Ids(ids) => StorageCommand::Delete(ids),
                StoreSelection::All => return Err(ValidationError::InvalidField("store count")),
            },
            StorageSubtype::ReportConfiguration => StorageCommand::ReportConfiguration,
            StorageSubtype::CopyInWindow => {
                let src = r.store_id()?;
                let dst = r.store_id()?;
                let (from, to) = r.window()?;
                StorageCommand::CopyInWindow { src, dst, from, to }
            }
            StorageSubtype::Resize => StorageCommand::Resize {
                id: r.store_id()?,
                capacity: r.u32("capacity")? as usize,
            },
            StorageSubtype::ChangeType => {
                let id = r.store_id()?;
                let kind = StoreKind::from_u8(r.u8("store type")?)
                    .ok_or(ValidationError::InvalidField("store type"))?;
                StorageCommand::ChangeType { id, kind }
            }
            StorageSubtype::ChangeVirtualChannel => StorageCommand::ChangeVirtualChannel {
                id: r.store_id()?,
                vc: VirtualChannel(r.u8("virtual channel")?),
            },
            StorageSubtype::EnableRetrieval => StorageCommand::EnableRetrieval(r.store_id()?),
            StorageSubtype::DisableRetrieval => StorageCommand::DisableRetrieval(r.store_id()?),
        };

        r.finish()?;
        Ok(cmd)
    }

    /// Encode the application data of this command
    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = Vec::new();
        match self {
            StorageCommand::EnableStorage(sel)
            | StorageCommand::DisableStorage(sel)
            | StorageCommand::ReportContentSummary(sel) => put_selection(&mut w, sel),
            StorageCommand::StartByTimeRange { id, from, to } => {
                put_store_id(&mut w, id);
                w.extend_from_slice(&from.0.to_be_bytes());
                w.extend_from_slice(&to.0.to_be_bytes());
            }
            StorageCommand::DeleteContent { id, range } => {
                put_store_id(&mut w, id);
                match range {
                    DeleteRange::All => w.push(0),
                    DeleteRange::UpTo(time) => {
                        w.push(1);
                        w.extend_from_slice(&time.0.to_be_bytes());
                    }
                }
            }
            StorageCommand::ChangeStartTime { id, time } => {
                put_store_id(&mut w, id);
                w.extend_from_slice(&time.0.to_be_bytes());
            }
            StorageCommand::ResumeRetrieval(id)
            | StorageCommand::SuspendRetrieval(id)
            | StorageCommand::AbortByTimeRange(id)
            | StorageCommand::EnableRetrieval(id)
            | StorageCommand::DisableRetrieval(id) => put_store_id(&mut w, id),
            StorageCommand::ReportStatus | StorageCommand::ReportConfiguration => {}
            StorageCommand::Create(specs) => {
                put_count(&mut w, specs.len());
                for spec in specs {
                    put_store_id(&mut w, &spec.id);
                    put_u32(&mut w, spec.capacity_bytes);
                    w.push(spec.kind.to_u8());
                    w.push(spec.virtual_channel.0);
                }
            }
            StorageCommand::Delete(ids) => put_selection(&mut w, &StoreSelection::Ids(ids.clone())),
            StorageCommand::CopyInWindow { src, dst, from, to } => {
                put_store_id(&mut w, src);
                put_store_id(&mut w, dst);
                w.extend_from_slice(&from.0.to_be_bytes());
                w.extend_from_slice(&to.0.to_be_bytes());
            }
            StorageCommand::Resize { id, capacity } => {
                put_store_id(&mut w, id);
                put_u32(&mut w, *capacity);
            }
            StorageCommand::ChangeType { id, kind } => {
                put_store_id(&mut w, id);
                w.push(kind.to_u8());
            }
            StorageCommand::ChangeVirtualChannel { id, vc } => {
                put_store_id(&mut w, id);
                w.push(vc.0);
            }
        }
        w
    }
}

/// Union of all commands interpreted on board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Command {
    Storage(StorageCommand),
    ConnectionTest,
}

impl Command {
    /// Interpret the service, subtype and application data of a telecommand
    pub fn from_packet(packet: &SpacePacket) -> Result<Self, ValidationError> {
        match (packet.service_type, packet.service_subtype) {
            (STORAGE_SERVICE, subtype) => {
                Ok(Command::Storage(StorageCommand::parse(subtype, &packet.payload)?))
            }
            (TEST_SERVICE, CONNECTION_TEST) => {
                PayloadReader::new(&packet.payload).finish()?;
                Ok(Command::ConnectionTest)
            }
            _ => Err(ValidationError::InvalidField("service type")),
        }
    }

    pub fn service_type(&self) -> u8 {
        match self {
            Command::Storage(_) => STORAGE_SERVICE,
            Command::ConnectionTest => TEST_SERVICE,
        }
    }

    pub fn service_subtype(&self) -> u8 {
        match self {
            Command::Storage(cmd) => cmd.subtype().to_u8(),
            Command::ConnectionTest => CONNECTION_TEST,
        }
    }

    /// Build the telecommand carrying this command
    pub fn to_packet(&self, apid: u16, sequence_count: u16, ack_flags: AckFlags) -> SpacePacket {
        let payload = match self {
            Command::Storage(cmd) => cmd.to_payload(),
            Command::ConnectionTest => Vec::new(),
        };
        SpacePacket::telecommand(
            apid,
            sequence_count,
            ack_flags,
            self.service_type(),
            self.service_subtype(),
            payload,
        )
    }
}

pub(crate) fn put_store_id(w: &mut Vec<u8>, id: &StoreId) {
    w.push(id.as_bytes().len() as u8);
    w.extend_from_slice(id.as_bytes());
}

/// Count prefix of a list. A list longer than the count can express keeps
/// all its entries after a saturated count, so decoding rejects it instead of
/// reading a wrapped count.
pub(crate) fn put_count(w: &mut Vec<u8>, len: usize) {
    w.push(u8::try_from(len).unwrap_or(u8::MAX));
}

/// Size or count as a four-byte field, saturated at its largest value
pub(crate) fn put_u32(w: &mut Vec<u8>, size: usize) {
    w.extend_from_slice(&u32::try_from(size).unwrap_or(u32::MAX).to_be_bytes());
}

fn put_selection(w: &mut Vec<u8>, sel: &StoreSelection) {
    match sel {
        StoreSelection::All => w.push(0),
        StoreSelection::Ids(ids) => {
            put_count(w, ids.len());
            for id in ids {
                put_store_id(w, id);
            }
        }
    }
}

/// Cursor over big-endian application data
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ValidationError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(ValidationError::FieldTooShort(field));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, ValidationError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16(&mut self, field: &'static str) -> Result<u16, ValidationError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, field: &'static str) -> Result<u32, ValidationError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, field: &'static str) -> Result<u64, ValidationError> {
        let b = self.take(8, field)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn time(&mut self, field: &'static str) -> Result<OnboardTime, ValidationError> {
        Ok(OnboardTime(self.u64(field)?))
    }

    pub fn store_id(&mut self) -> Result<StoreId, ValidationError> {
        let len = self.u8("store id length")? as usize;
        if len > STORE_ID_MAX_LEN {
            return Err(ValidationError::FieldTooLong("store id"));
        }
        let raw = self.take(len, "store id")?;
        let id = std::str::from_utf8(raw).map_err(|_| ValidationError::InvalidField("store id"))?;
        StoreId::new(id)
    }

    /// Count-prefixed list of ids, a zero count selecting every store
    pub fn selection(&mut self) -> Result<StoreSelection, ValidationError> {
        let count = self.u8("store count")?;
        if count == 0 {
            return Ok(StoreSelection::All);
        }
        let ids = (0..count)
            .map(|_| self.store_id())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StoreSelection::Ids(ids))
    }

    fn window(&mut self) -> Result<(OnboardTime, OnboardTime), ValidationError> {
        let from = self.time("window start")?;
        let to = self.time("window end")?;
        if from > to {
            return Err(ValidationError::InvalidTimeWindow { from, to });
        }
        Ok((from, to))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail if bytes are left over
    pub fn finish(&self) -> Result<(), ValidationError> {
        if self.remaining() > 0 {
            return Err(ValidationError::FieldTooLong("application data"));
        }
        Ok(())
    }
}
