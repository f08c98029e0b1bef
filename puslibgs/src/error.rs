//! Error definitions for PUSpecial
//!
//! Errors fall into three families. Frame errors come from malformed input and
//! are always reported at acceptance. Validation errors come from bad fields,
//! unknown services or bad store identifiers. Resource errors come from full
//! stores or stores that are in the wrong state for an operation. Every one of
//! them maps to a numeric [`ErrorCode`] carried in failure verification reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OnboardTime, StoreId};

/// Numeric error codes carried by failure verification reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Acceptance
    UnknownServiceType,
    UnknownServiceSubtype,
    FieldTooShort,
    FieldTooLong,
    CrcMismatch,
    InvalidField,
    DuplicateRequest,
    InvalidTimeWindow,
    UnsupportedHeader,

    // Start
    UnknownStoreId,
    DuplicateStoreId,
    WildcardInStoreId,
    ZeroCapacity,
    RetrievalNotClosed,
    InvalidRetrievalState,
    TooManyStores,
    CapacityBelowUsage,
    RetrievalInProgress,
    NoRetrievalInProgress,
    SameSourceAndDestination,

    // Completion
    StoreFull,
    PacketTooLarge,
    Aborted,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::UnknownServiceType => 0x0001,
            ErrorCode::UnknownServiceSubtype => 0x0002,
            ErrorCode::FieldTooShort => 0x0003,
            ErrorCode::FieldTooLong => 0x0004,
            ErrorCode::CrcMismatch => 0x0005,
            ErrorCode::InvalidField => 0x0006,
            ErrorCode::DuplicateRequest => 0x0007,
            ErrorCode::InvalidTimeWindow => 0x0008,
            ErrorCode::UnsupportedHeader => 0x0009,
            ErrorCode::UnknownStoreId => 0x0010,
            ErrorCode::DuplicateStoreId => 0x0011,
            ErrorCode::WildcardInStoreId => 0x0012,
            ErrorCode::ZeroCapacity => 0x0013,
            ErrorCode::RetrievalNotClosed => 0x0014,
            ErrorCode::InvalidRetrievalState => 0x0015,
            ErrorCode::TooManyStores => 0x0016,
            ErrorCode::CapacityBelowUsage => 0x0017,
            ErrorCode::RetrievalInProgress => 0x0018,
            ErrorCode::NoRetrievalInProgress => 0x0019,
            ErrorCode::SameSourceAndDestination => 0x001A,
            ErrorCode::StoreFull => 0x0020,
            ErrorCode::PacketTooLarge => 0x0021,
            ErrorCode::Aborted => 0x0022,
        }
    }

    pub fn from_code(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(ErrorCode::UnknownServiceType),
            0x0002 => Some(ErrorCode::UnknownServiceSubtype),
            0x0003 => Some(ErrorCode::FieldTooShort),
            0x0004 => Some(ErrorCode::FieldTooLong),
            0x0005 => Some(ErrorCode::CrcMismatch),
            0x0006 => Some(ErrorCode::InvalidField),
            0x0007 => Some(ErrorCode::DuplicateRequest),
            0x0008 => Some(ErrorCode::InvalidTimeWindow),
            0x0009 => Some(ErrorCode::UnsupportedHeader),
            0x0010 => Some(ErrorCode::UnknownStoreId),
            0x0011 => Some(ErrorCode::DuplicateStoreId),
            0x0012 => Some(ErrorCode::WildcardInStoreId),
            0x0013 => Some(ErrorCode::ZeroCapacity),
            0x0014 => Some(ErrorCode::RetrievalNotClosed),
            0x0015 => Some(ErrorCode::InvalidRetrievalState),
            0x0016 => Some(ErrorCode::TooManyStores),
            0x0017 => Some(ErrorCode::CapacityBelowUsage),
            0x0018 => Some(ErrorCode::RetrievalInProgress),
            0x0019 => Some(ErrorCode::NoRetrievalInProgress),
            0x001A => Some(ErrorCode::SameSourceAndDestination),
            0x0020 => Some(ErrorCode::StoreFull),
            0x0021 => Some(ErrorCode::PacketTooLarge),
            0x0022 => Some(ErrorCode::Aborted),
            _ => None,
        }
    }
}

/// Errors raised while decoding a space packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Frame too long: expected {expected} bytes, got {actual}")]
    TooLong { expected: usize, actual: usize },

    #[error("CRC mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    CrcMismatch { received: u16, computed: u16 },

    #[error("Unsupported header field: {0}")]
    UnsupportedHeader(&'static str),

    #[error("Unknown service type {0}")]
    UnknownServiceType(u8),

    #[error("Unknown subtype {subtype} for service {service}")]
    UnknownServiceSubtype { service: u8, subtype: u8 },
}

impl FrameError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::TooShort { .. } => ErrorCode::FieldTooShort,
            FrameError::TooLong { .. } => ErrorCode::FieldTooLong,
            FrameError::CrcMismatch { .. } => ErrorCode::CrcMismatch,
            FrameError::UnsupportedHeader(_) => ErrorCode::UnsupportedHeader,
            FrameError::UnknownServiceType(_) => ErrorCode::UnknownServiceType,
            FrameError::UnknownServiceSubtype { .. } => ErrorCode::UnknownServiceSubtype,
        }
    }

    /// Whether the ack flags of the offending frame can still be trusted
    pub fn header_trusted(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownServiceType(_) | FrameError::UnknownServiceSubtype { .. }
        )
    }
}

/// Bad command fields, bad identifiers, or conflicts with the store table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{0}' is truncated")]
    FieldTooShort(&'static str),

    #[error("Field '{0}' is too long")]
    FieldTooLong(&'static str),

    #[error("Invalid value for field '{0}'")]
    InvalidField(&'static str),

    #[error("Time window is inverted: {from} > {to}")]
    InvalidTimeWindow { from: OnboardTime, to: OnboardTime },

    #[error("Unknown packet store {0}")]
    UnknownStoreId(StoreId),

    #[error("Packet store {0} already exists")]
    DuplicateStoreId(StoreId),

    #[error("Packet store id {0} contains a wildcard")]
    WildcardInStoreId(StoreId),

    #[error("Packet store {0} requested with zero capacity")]
    ZeroCapacity(StoreId),

    #[error("Request {0} is already in progress")]
    DuplicateRequest(String),

    #[error("Source and destination store are both {0}")]
    SameSourceAndDestination(StoreId),
}

impl ValidationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ValidationError::FieldTooShort(_) => ErrorCode::FieldTooShort,
            ValidationError::FieldTooLong(_) => ErrorCode::FieldTooLong,
            ValidationError::InvalidField(_) => ErrorCode::InvalidField,
            ValidationError::InvalidTimeWindow { .. } => ErrorCode::InvalidTimeWindow,
            ValidationError::UnknownStoreId(_) => ErrorCode::UnknownStoreId,
            ValidationError::DuplicateStoreId(_) => ErrorCode::DuplicateStoreId,
            ValidationError::WildcardInStoreId(_) => ErrorCode::WildcardInStoreId,
            ValidationError::ZeroCapacity(_) => ErrorCode::ZeroCapacity,
            ValidationError::DuplicateRequest(_) => ErrorCode::DuplicateRequest,
            ValidationError::SameSourceAndDestination(_) => ErrorCode::SameSourceAndDestination,
        }
    }
}

/// Store capacity and store state conflicts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Packet store {0} is full")]
    StoreFull(StoreId),

    #[error("Packet of {size} bytes exceeds capacity {capacity} of store {id}")]
    PacketTooLarge { id: StoreId, size: usize, capacity: usize },

    #[error("Open retrieval of packet store {0} is not closed")]
    RetrievalNotClosed(StoreId),

    #[error("Open retrieval of packet store {0} is in the wrong state")]
    InvalidRetrievalState(StoreId),

    #[error("Packet store table is full ({0} stores)")]
    TooManyStores(usize),

    #[error("Packet store {id} holds {used} bytes, cannot shrink to {capacity}")]
    CapacityBelowUsage { id: StoreId, used: usize, capacity: usize },

    #[error("By-time-range retrieval already running on packet store {0}")]
    RetrievalInProgress(StoreId),

    #[error("No by-time-range retrieval running on packet store {0}")]
    NoRetrievalInProgress(StoreId),

    #[error("Retrieval aborted")]
    Aborted,
}

impl ResourceError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ResourceError::StoreFull(_) => ErrorCode::StoreFull,
            ResourceError::PacketTooLarge { .. } => ErrorCode::PacketTooLarge,
            ResourceError::RetrievalNotClosed(_) => ErrorCode::RetrievalNotClosed,
            ResourceError::InvalidRetrievalState(_) => ErrorCode::InvalidRetrievalState,
            ResourceError::TooManyStores(_) => ErrorCode::TooManyStores,
            ResourceError::CapacityBelowUsage { .. } => ErrorCode::CapacityBelowUsage,
            ResourceError::RetrievalInProgress(_) => ErrorCode::RetrievalInProgress,
            ResourceError::NoRetrievalInProgress(_) => ErrorCode::NoRetrievalInProgress,
            ResourceError::Aborted => ErrorCode::Aborted,
        }
    }
}

/// Outcomes that arrive out of stage order or for an unknown request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("No verification in progress for request {0}")]
    UnknownRequest(String),

    #[error("Outcome {outcome} not allowed after stage {stage} for request {request}")]
    OutOfOrder {
        request: String,
        stage: &'static str,
        outcome: &'static str,
    },

    #[error("Progress step {got} reported, expected {expected}")]
    StepOutOfOrder { expected: u16, got: u16 },
}

/// PUSpecial error types
#[derive(Error, Debug)]
pub enum PusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Verification error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl PusError {
    pub fn config(msg: impl Into<String>) -> Self {
        PusError::Config(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        PusError::Channel(msg.into())
    }

    /// Code reported for this error in a failure verification report
    pub fn error_code(&self) -> ErrorCode {
        match self {
            PusError::Frame(e) => e.error_code(),
            PusError::Validation(e) => e.error_code(),
            PusError::Resource(e) => e.error_code(),
            _ => ErrorCode::InvalidField,
        }
    }
}

/// Result type alias for PUSpecial operations
pub type PusResult<T> = Result<T, PusError>;
