//! CCSDS space packets carrying a PUS secondary header
//!
//! Layout, big-endian:
//!
//! ```text
//! [0]     version(3) = 0 | type(1) | sec-hdr flag(1) = 1 | apid[10:8]
//! [1]     apid[7:0]
//! [2]     sequence flags(2) = 0b11 | sequence count[13:8]
//! [3]     sequence count[7:0]
//! [4..6]  data length = bytes following the primary header - 1
//! [6]     PUS version(4) = 2 | ack flags(4)
//! [7]     service type
//! [8]     service subtype
//! [9..11] source / request counter
//! [11..]  payload, optionally followed by a 2-byte CRC-16
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use zerocopy::byteorder::network_endian;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::crc::{append_crc, verify_crc, CRC_LEN};
use crate::error::FrameError;
use crate::types::{AckFlags, RequestId};

/// Primary header length
pub const PRIMARY_HEADER_LEN: usize = 6;

/// Secondary header length
pub const SECONDARY_HEADER_LEN: usize = 5;

/// Primary plus secondary header length, also the minimum frame length
pub const HEADER_LEN: usize = PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN;

/// Largest application process id
pub const APID_MAX: u16 = 0x07FF;

/// Sequence counts wrap at this value
pub const SEQUENCE_COUNT_MODULO: u16 = 1 << 14;

const VERSION_MASK: u16 = 0xE000;
const TYPE_TC: u16 = 0x1000;
const SEC_HDR_FLAG: u16 = 0x0800;
const SEQ_FLAGS_MASK: u16 = 0xC000;
const SEQ_FLAGS_UNSEGMENTED: u16 = 0xC000;
const SEQ_COUNT_MASK: u16 = SEQUENCE_COUNT_MODULO - 1;
const PUS_VERSION: u8 = 0x20;

/// CCSDS primary header, as laid out on the wire
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PrimaryHeader {
    packet_identification: network_endian::U16,
    packet_sequence_control: network_endian::U16,
    data_length: network_endian::U16,
}

impl PrimaryHeader {
    /// Version 0, secondary header present, unsegmented. `data_field_len`
    /// counts every byte following the primary header.
    pub fn new(is_command: bool, apid: u16, sequence_count: u16, data_field_len: usize) -> Self {
        let type_bit = if is_command { TYPE_TC } else { 0 };
        Self {
            packet_identification: network_endian::U16::new(type_bit | SEC_HDR_FLAG | (apid & APID_MAX)),
            packet_sequence_control: network_endian::U16::new(
                SEQ_FLAGS_UNSEGMENTED | (sequence_count & SEQ_COUNT_MASK),
            ),
            data_length: network_endian::U16::new(data_field_len.saturating_sub(1) as u16),
        }
    }

    pub fn version(&self) -> u8 {
        ((self.packet_identification.get() & VERSION_MASK) >> 13) as u8
    }

    pub fn is_command(&self) -> bool {
        self.packet_identification.get() & TYPE_TC != 0
    }

    pub fn has_secondary_header(&self) -> bool {
        self.packet_identification.get() & SEC_HDR_FLAG != 0
    }

    pub fn is_unsegmented(&self) -> bool {
        self.packet_sequence_control.get() & SEQ_FLAGS_MASK == SEQ_FLAGS_UNSEGMENTED
    }

    pub fn apid(&self) -> u16 {
        self.packet_identification.get() & APID_MAX
    }

    pub fn sequence_count(&self) -> u16 {
        self.packet_sequence_control.get() & SEQ_COUNT_MASK
    }

    /// Bytes following the primary header, as declared by the data length
    pub fn data_field_len(&self) -> usize {
        self.data_length.get() as usize + 1
    }
}

/// PUS secondary header, as laid out on the wire
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SecondaryHeader {
    version_ack: u8,
    service_type: u8,
    service_subtype: u8,
    counter: network_endian::U16,
}

impl SecondaryHeader {
    pub fn new(ack_flags: AckFlags, service_type: u8, service_subtype: u8, counter: u16) -> Self {
        Self {
            version_ack: PUS_VERSION | ack_flags.bits(),
            service_type,
            service_subtype,
            counter: network_endian::U16::new(counter),
        }
    }

    pub fn pus_version(&self) -> u8 {
        self.version_ack & 0xF0
    }

    pub fn ack_flags(&self) -> AckFlags {
        AckFlags::new(self.version_ack)
    }

    pub fn service_type(&self) -> u8 {
        self.service_type
    }

    pub fn service_subtype(&self) -> u8 {
        self.service_subtype
    }

    pub fn counter(&self) -> u16 {
        self.counter.get()
    }
}

/// Both headers of a frame
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct PusHeader {
    pub primary: PrimaryHeader,
    pub secondary: SecondaryHeader,
}

/// Whether frames on a channel carry the trailing CRC-16
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrcPolicy {
    #[default]
    Enabled,
    Disabled,
}

impl CrcPolicy {
    pub fn is_enabled(&self) -> bool {
        matches!(self, CrcPolicy::Enabled)
    }
}

/// One CCSDS/PUS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePacket {
    pub apid: u16,
    pub is_command: bool,
    pub sequence_count: u16,
    pub ack_flags: AckFlags,
    pub service_type: u8,
    pub service_subtype: u8,
    /// Source counter for spontaneous telemetry, request counter otherwise
    pub counter: u16,
    pub payload: Vec<u8>,
    /// Set by decoding when the trailing CRC was present and checked
    pub crc_valid: bool,
}

impl SpacePacket {
    /// Build a telemetry packet. The sequence count is filled in by the sender.
    pub fn telemetry(apid: u16, service_type: u8, service_subtype: u8, counter: u16, payload: Vec<u8>) -> Self {
        Self {
            apid: apid & APID_MAX,
            is_command: false,
            sequence_count: 0,
            ack_flags: AckFlags::NONE,
            service_type,
            service_subtype,
            counter,
            payload,
            crc_valid: false,
        }
    }

    /// Build a telecommand packet
    pub fn telecommand(
        apid: u16,
        sequence_count: u16,
        ack_flags: AckFlags,
        service_type: u8,
        service_subtype: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            apid: apid & APID_MAX,
            is_command: true,
            sequence_count: sequence_count % SEQUENCE_COUNT_MODULO,
            ack_flags,
            service_type,
            service_subtype,
            counter: sequence_count,
            payload,
            crc_valid: false,
        }
    }

    pub fn request_id(&self) -> RequestId {
        RequestId {
            apid: self.apid,
            sequence_count: self.sequence_count,
        }
    }

    /// Headers for this packet, with the data length covering the payload
    /// and the CRC when the policy requires it
    pub fn header(&self, crc: CrcPolicy) -> PusHeader {
        let crc_len = if crc.is_enabled() { CRC_LEN } else { 0 };
        PusHeader {
            primary: PrimaryHeader::new(
                self.is_command,
                self.apid,
                self.sequence_count,
                SECONDARY_HEADER_LEN + self.payload.len() + crc_len,
            ),
            secondary: SecondaryHeader::new(
                self.ack_flags,
                self.service_type,
                self.service_subtype,
                self.counter,
            ),
        }
    }

    /// Encode the primary and secondary headers only
    pub fn header_bytes(&self, crc: CrcPolicy) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(self.header(crc).as_bytes());
        bytes
    }

    /// Serialize, appending the CRC when the policy requires it
    pub fn to_bytes(&self, crc: CrcPolicy) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len() + CRC_LEN);
        bytes.extend_from_slice(&self.header_bytes(crc));
        bytes.extend_from_slice(&self.payload);
        if crc.is_enabled() {
            append_crc(&mut bytes);
        }
        bytes
    }

    /// Parse a frame without consulting any service table
    pub fn from_bytes(bytes: &[u8], crc: CrcPolicy) -> Result<Self, FrameError> {
        let crc_len = if crc.is_enabled() { CRC_LEN } else { 0 };
        let minimum = HEADER_LEN + crc_len;
        if bytes.len() < minimum {
            return Err(FrameError::TooShort {
                expected: minimum,
                actual: bytes.len(),
            });
        }

        let (header, _) = PusHeader::read_from_prefix(bytes).map_err(|_| FrameError::TooShort {
            expected: minimum,
            actual: bytes.len(),
        })?;
        let PusHeader { primary, secondary } = header;
        if primary.version() != 0 {
            return Err(FrameError::UnsupportedHeader("packet version"));
        }
        if !primary.has_secondary_header() {
            return Err(FrameError::UnsupportedHeader("secondary header flag"));
        }
        if !primary.is_unsegmented() {
            return Err(FrameError::UnsupportedHeader("sequence flags"));
        }
        if secondary.pus_version() != PUS_VERSION {
            return Err(FrameError::UnsupportedHeader("PUS version"));
        }

        let declared = PRIMARY_HEADER_LEN + primary.data_field_len();
        if declared < minimum || bytes.len() < declared {
            return Err(FrameError::TooShort {
                expected: declared.max(minimum),
                actual: bytes.len(),
            });
        }
        if bytes.len() > declared {
            return Err(FrameError::TooLong {
                expected: declared,
                actual: bytes.len(),
            });
        }

        let crc_valid = if crc.is_enabled() {
            verify_crc(bytes)
                .map_err(|(received, computed)| FrameError::CrcMismatch { received, computed })?;
            true
        } else {
            false
        };

        Ok(Self {
            apid: primary.apid(),
            is_command: primary.is_command(),
            sequence_count: primary.sequence_count(),
            ack_flags: secondary.ack_flags(),
            service_type: secondary.service_type(),
            service_subtype: secondary.service_subtype(),
            counter: secondary.counter(),
            payload: bytes[HEADER_LEN..bytes.len() - crc_len].to_vec(),
            crc_valid,
        })
    }
}

/// Services and subtypes a node accepts as telecommands
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    services: BTreeMap<u8, Vec<u8>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service_type: u8, subtypes: &[u8]) -> Self {
        self.register(service_type, subtypes);
        self
    }

    pub fn register(&mut self, service_type: u8, subtypes: &[u8]) {
        let entry = self.services.entry(service_type).or_default();
        entry.extend_from_slice(subtypes);
        entry.sort_unstable();
        entry.dedup();
    }

    pub fn check(&self, service_type: u8, service_subtype: u8) -> Result<(), FrameError> {
        match self.services.get(&service_type) {
            None => Err(FrameError::UnknownServiceType(service_type)),
            Some(subtypes) if subtypes.binary_search(&service_subtype).is_err() => {
                Err(FrameError::UnknownServiceSubtype {
                    service: service_type,
                    subtype: service_subtype,
                })
            }
            Some(_) => Ok(()),
        }
    }
}

/// Frame codec for one channel
#[derive(Debug, Clone)]
pub struct PacketCodec {
    crc: CrcPolicy,
    services: ServiceTable,
}

impl PacketCodec {
    pub fn new(crc: CrcPolicy, services: ServiceTable) -> Self {
        Self { crc, services }
    }

    pub fn crc_policy(&self) -> CrcPolicy {
        self.crc
    }

    /// Decode a frame. Telecommands are also checked against the service table.
    pub fn decode(&self, bytes: &[u8]) -> Result<SpacePacket, FrameError> {
        let packet = SpacePacket::from_bytes(bytes, self.crc)?;
        if packet.is_command {
            self.services.check(packet.service_type, packet.service_subtype)?;
        }
        Ok(packet)
    }

    pub fn encode(&self, packet: &SpacePacket) -> Vec<u8> {
        packet.to_bytes(self.crc)
    }

    /// Best-effort extraction of the headers of a frame that failed to decode
    pub fn raw_header(bytes: &[u8]) -> Vec<u8> {
        bytes[..bytes.len().min(HEADER_LEN)].to_vec()
    }

    /// Best-effort request id and ack flags of a frame that failed to decode
    pub fn raw_request(bytes: &[u8]) -> Option<(RequestId, AckFlags)> {
        let (primary, rest) = PrimaryHeader::read_from_prefix(bytes).ok()?;
        let version_ack = *rest.first()?;
        Some((
            RequestId {
                apid: primary.apid(),
                sequence_count: primary.sequence_count(),
            },
            AckFlags::new(version_ack),
        ))
    }

    /// Application process id of a frame, if it has a primary header
    pub fn raw_apid(bytes: &[u8]) -> Option<u16> {
        PrimaryHeader::ref_from_prefix(bytes).ok().map(|(primary, _)| primary.apid())
    }
}

/// Per-stream sequence counters, one per (apid, is_command)
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    counts: HashMap<(u16, bool), u16>,
    message_count: u16,
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next 14-bit sequence count for a stream
    pub fn next(&mut self, apid: u16, is_command: bool) -> u16 {
        let count = self.counts.entry((apid, is_command)).or_insert(0);
        let current = *count;
        *count = (current + 1) % SEQUENCE_COUNT_MODULO;
        current
    }

    /// Next 16-bit counter for spontaneous telemetry
    pub fn next_message(&mut self) -> u16 {
        let current = self.message_count;
        self.message_count = self.message_count.wrapping_add(1);
        current
    }
}
