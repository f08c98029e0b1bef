//! Effects produced while executing a command or a tick
//!
//! The store manager and the retrieval engine never talk to the transport or
//! the tracker directly. They queue outputs here and the command interpreter
//! turns them into packets in order.

use log::warn;
use puslibgs::{
    ErrorCode, PusError, RequestId, Telemetry, VerificationOutcome, VirtualChannel,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Verification outcome for a tracked request
    Verification {
        request: RequestId,
        outcome: VerificationOutcome,
        /// Appended to the report when the outcome is a failure
        failure_data: Vec<u8>,
    },
    /// Service report, sent as spontaneous telemetry
    Report(Telemetry),
    /// Stored packet played back on a virtual channel
    Playback { vc: VirtualChannel, bytes: Vec<u8> },
    /// A packet could not be stored
    StoringFailure { header: Vec<u8>, error: ErrorCode },
}

#[derive(Debug, Default)]
pub struct Outbox {
    outputs: Vec<Output>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<Output> {
        self.outputs
    }

    pub fn verify(&mut self, request: RequestId, outcome: VerificationOutcome) {
        self.outputs.push(Output::Verification {
            request,
            outcome,
            failure_data: Vec::new(),
        });
    }

    pub fn started(&mut self, request: RequestId) {
        self.verify(request, VerificationOutcome::StartOk);
    }

    pub fn start_failed(&mut self, request: RequestId, error: ErrorCode) {
        self.verify(request, VerificationOutcome::StartFail(error));
    }

    pub fn progress(&mut self, request: RequestId, step: u16) {
        self.verify(request, VerificationOutcome::ProgressOk(step));
    }

    pub fn completed(&mut self, request: RequestId) {
        self.verify(request, VerificationOutcome::CompletionOk);
    }

    pub fn completion_failed(&mut self, request: RequestId, error: ErrorCode) {
        self.verify(request, VerificationOutcome::CompletionFail(error));
    }

    /// Fail completion, naming what failed in the report's failure data
    pub fn completion_failed_with(&mut self, request: RequestId, error: ErrorCode, data: Vec<u8>) {
        self.outputs.push(Output::Verification {
            request,
            outcome: VerificationOutcome::CompletionFail(error),
            failure_data: data,
        });
    }

    /// Report the start stage from the result of the start checks, handing
    /// back the checked value when the request may proceed
    pub fn start<T, E: Into<PusError>>(&mut self, request: RequestId, check: Result<T, E>) -> Option<T> {
        match check {
            Ok(value) => {
                self.started(request);
                Some(value)
            }
            Err(e) => {
                let e = e.into();
                warn!("Request {} rejected at start: {}", request, e);
                self.start_failed(request, e.error_code());
                None
            }
        }
    }

    pub fn report(&mut self, telemetry: Telemetry) {
        self.outputs.push(Output::Report(telemetry));
    }

    pub fn playback(&mut self, vc: VirtualChannel, bytes: Vec<u8>) {
        self.outputs.push(Output::Playback { vc, bytes });
    }

    pub fn storing_failure(&mut self, header: Vec<u8>, error: ErrorCode) {
        self.outputs.push(Output::StoringFailure { header, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puslibgs::{StoreId, ValidationError};

    fn request() -> RequestId {
        RequestId { apid: 1, sequence_count: 2 }
    }

    #[test]
    fn test_start_success() {
        let mut out = Outbox::new();
        let value = out.start(request(), Ok::<_, PusError>(5));
        assert_eq!(value, Some(5));
        assert_eq!(
            out.outputs(),
            &[Output::Verification {
                request: request(),
                outcome: VerificationOutcome::StartOk,
                failure_data: vec![],
            }]
        );
    }

    #[test]
    fn test_start_failure() {
        let mut out = Outbox::new();
        let id = StoreId::new("X").unwrap();
        let value: Option<()> = out.start(request(), Err(ValidationError::UnknownStoreId(id)));
        assert!(value.is_none());
        assert_eq!(
            out.into_outputs(),
            vec![Output::Verification {
                request: request(),
                outcome: VerificationOutcome::StartFail(ErrorCode::UnknownStoreId),
                failure_data: vec![],
            }]
        );
    }
}
