//! Request verification outcomes and their service 1 telemetry reports
//!
//! Report kinds equal the service 1 subtypes: 1 acceptance OK, 2 acceptance
//! failed, 3 start OK, 4 start failed, 5 progress OK, 6 progress failed,
//! 7 completion OK, 8 completion failed.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ValidationError};
use crate::packet::{SpacePacket, HEADER_LEN};
use crate::types::AckFlags;

/// Service type of verification reports
pub const VERIFICATION_SERVICE: u8 = 1;

/// Verification stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Acceptance,
    Start,
    Progress,
    Completion,
}

impl Stage {
    /// Ack flag bit that opts into reports for this stage
    pub fn ack_bit(&self) -> u8 {
        match self {
            Stage::Acceptance => AckFlags::ACCEPTANCE,
            Stage::Start => AckFlags::START,
            Stage::Progress => AckFlags::PROGRESS,
            Stage::Completion => AckFlags::COMPLETION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Acceptance => "acceptance",
            Stage::Start => "start",
            Stage::Progress => "progress",
            Stage::Completion => "completion",
        }
    }
}

/// Outcome of one verification stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationOutcome {
    AcceptanceOk,
    AcceptanceFail(ErrorCode),
    StartOk,
    StartFail(ErrorCode),
    ProgressOk(u16),
    ProgressFail(ErrorCode, u16),
    CompletionOk,
    CompletionFail(ErrorCode),
}

impl VerificationOutcome {
    /// Numeric kind, 1 to 8
    pub fn kind(&self) -> u8 {
        match self {
            VerificationOutcome::AcceptanceOk => 1,
            VerificationOutcome::AcceptanceFail(_) => 2,
            VerificationOutcome::StartOk => 3,
            VerificationOutcome::StartFail(_) => 4,
            VerificationOutcome::ProgressOk(_) => 5,
            VerificationOutcome::ProgressFail(_, _) => 6,
            VerificationOutcome::CompletionOk => 7,
            VerificationOutcome::CompletionFail(_) => 8,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            VerificationOutcome::AcceptanceOk | VerificationOutcome::AcceptanceFail(_) => {
                Stage::Acceptance
            }
            VerificationOutcome::StartOk | VerificationOutcome::StartFail(_) => Stage::Start,
            VerificationOutcome::ProgressOk(_) | VerificationOutcome::ProgressFail(_, _) => {
                Stage::Progress
            }
            VerificationOutcome::CompletionOk | VerificationOutcome::CompletionFail(_) => {
                Stage::Completion
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }

    /// Failure outcomes and completion end the verification of a request
    pub fn is_terminal(&self) -> bool {
        self.is_failure() || matches!(self, VerificationOutcome::CompletionOk)
    }

    pub fn error(&self) -> Option<ErrorCode> {
        match self {
            VerificationOutcome::AcceptanceFail(e)
            | VerificationOutcome::StartFail(e)
            | VerificationOutcome::ProgressFail(e, _)
            | VerificationOutcome::CompletionFail(e) => Some(*e),
            _ => None,
        }
    }

    pub fn step(&self) -> Option<u16> {
        match self {
            VerificationOutcome::ProgressOk(step) | VerificationOutcome::ProgressFail(_, step) => {
                Some(*step)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VerificationOutcome::AcceptanceOk => "acceptance OK",
            VerificationOutcome::AcceptanceFail(_) => "acceptance failed",
            VerificationOutcome::StartOk => "start OK",
            VerificationOutcome::StartFail(_) => "start failed",
            VerificationOutcome::ProgressOk(_) => "progress OK",
            VerificationOutcome::ProgressFail(_, _) => "progress failed",
            VerificationOutcome::CompletionOk => "completion OK",
            VerificationOutcome::CompletionFail(_) => "completion failed",
        }
    }
}

/// A verification report as carried in a service 1 telemetry packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Primary and secondary header of the request, possibly shorter for
    /// frames that were too short to carry a full header
    pub request_header: Vec<u8>,
    pub outcome: VerificationOutcome,
    /// Bytes following the error code of a failure report, naming what failed
    pub failure_data: Vec<u8>,
}

impl VerificationReport {
    pub fn new(request_header: Vec<u8>, outcome: VerificationOutcome) -> Self {
        Self {
            request_header,
            outcome,
            failure_data: Vec::new(),
        }
    }

    /// Attach failure data. Ignored for reports that are not failures.
    pub fn with_failure_data(mut self, data: Vec<u8>) -> Self {
        if self.outcome.is_failure() {
            self.failure_data = data;
        }
        self
    }

    /// Request counter echoed in the report's secondary header
    pub fn request_counter(&self) -> u16 {
        if self.request_header.len() >= HEADER_LEN {
            u16::from_be_bytes([self.request_header[9], self.request_header[10]])
        } else {
            0
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(HEADER_LEN + 4);
        let mut header = [0u8; HEADER_LEN];
        let n = self.request_header.len().min(HEADER_LEN);
        header[..n].copy_from_slice(&self.request_header[..n]);
        payload.extend_from_slice(&header);
        if let Some(step) = self.outcome.step() {
            payload.extend_from_slice(&step.to_be_bytes());
        }
        if let Some(error) = self.outcome.error() {
            payload.extend_from_slice(&error.code().to_be_bytes());
            payload.extend_from_slice(&self.failure_data);
        }
        payload
    }

    /// Wrap the report in a telemetry packet from `apid`
    pub fn to_packet(&self, apid: u16) -> SpacePacket {
        SpacePacket::telemetry(
            apid,
            VERIFICATION_SERVICE,
            self.outcome.kind(),
            self.request_counter(),
            self.to_payload(),
        )
    }

    /// Parse a report back out of a service 1 packet
    pub fn from_packet(packet: &SpacePacket) -> Result<Self, ValidationError> {
        if packet.service_type != VERIFICATION_SERVICE {
            return Err(ValidationError::InvalidField("service type"));
        }
        let payload = &packet.payload;
        if payload.len() < HEADER_LEN {
            return Err(ValidationError::FieldTooShort("request header"));
        }
        let request_header = payload[..HEADER_LEN].to_vec();
        let rest = &payload[HEADER_LEN..];

        let read_u16 = |buf: &[u8], at: usize, field: &'static str| -> Result<u16, ValidationError> {
            buf.get(at..at + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(ValidationError::FieldTooShort(field))
        };
        let read_error = |buf: &[u8], at: usize| -> Result<ErrorCode, ValidationError> {
            let code = read_u16(buf, at, "error code")?;
            ErrorCode::from_code(code).ok_or(ValidationError::InvalidField("error code"))
        };

        let (outcome, used) = match packet.service_subtype {
            1 => (VerificationOutcome::AcceptanceOk, 0),
            2 => (VerificationOutcome::AcceptanceFail(read_error(rest, 0)?), 2),
            3 => (VerificationOutcome::StartOk, 0),
            4 => (VerificationOutcome::StartFail(read_error(rest, 0)?), 2),
            5 => (VerificationOutcome::ProgressOk(read_u16(rest, 0, "step")?), 2),
            6 => {
                let step = read_u16(rest, 0, "step")?;
                (VerificationOutcome::ProgressFail(read_error(rest, 2)?, step), 4)
            }
            7 => (VerificationOutcome::CompletionOk, 0),
            8 => (VerificationOutcome::CompletionFail(read_error(rest, 0)?), 2),
            _ => return Err(ValidationError::InvalidField("report kind")),
        };
        let failure_data = rest[used..].to_vec();
        if !failure_data.is_empty() && !outcome.is_failure() {
            return Err(ValidationError::FieldTooLong("verification report"));
        }

        Ok(Self {
            request_header,
            outcome,
            failure_data,
        })
    }
}
