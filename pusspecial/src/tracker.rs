//! Request verification tracker
//!
//! Every accepted telecommand is tracked by request id until a terminal
//! outcome (any failure, or completion) arrives. Outcomes must come in stage
//! order and progress steps must count up from 0. An outcome becomes a
//! service 1 report only when the request's ack flags select its stage.

use std::collections::BTreeMap;

use log::{debug, warn};
use puslibgs::{
    AckFlags, ErrorCode, FrameError, PacketCodec, RequestId, Stage, TrackerError,
    VerificationOutcome, VerificationReport,
};

/// Verification state of one request
#[derive(Debug, Clone)]
struct TrackedRequest {
    /// Primary and secondary header of the request
    header: Vec<u8>,
    ack: AckFlags,
    /// Last stage reported
    stage: Stage,
    next_step: u16,
}

#[derive(Debug, Default)]
pub struct RequestVerificationTracker {
    requests: BTreeMap<RequestId, TrackedRequest>,
}

impl RequestVerificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether verification of `request` has not yet terminated
    pub fn in_flight(&self, request: &RequestId) -> bool {
        self.requests.contains_key(request)
    }

    pub fn in_flight_count(&self) -> usize {
        self.requests.len()
    }

    /// Accept a request and start tracking it
    pub fn accept(
        &mut self,
        request: RequestId,
        header: Vec<u8>,
        ack: AckFlags,
    ) -> Option<VerificationReport> {
        debug!("Request {} accepted", request);
        let report = ack
            .contains(AckFlags::ACCEPTANCE)
            .then(|| VerificationReport::new(header.clone(), VerificationOutcome::AcceptanceOk));
        self.requests.insert(
            request,
            TrackedRequest {
                header,
                ack,
                stage: Stage::Acceptance,
                next_step: 0,
            },
        );
        report
    }

    /// Reject a decoded request at acceptance. It is never tracked.
    pub fn reject(
        &self,
        request: RequestId,
        header: Vec<u8>,
        ack: AckFlags,
        error: ErrorCode,
    ) -> Option<VerificationReport> {
        warn!("Request {} rejected at acceptance: {:?}", request, error);
        ack.contains(AckFlags::ACCEPTANCE)
            .then(|| VerificationReport::new(header, VerificationOutcome::AcceptanceFail(error)))
    }

    /// Reject a frame that could not be decoded. Unless the frame decoded far
    /// enough to trust its ack flags, the report is always produced.
    pub fn reject_frame(&self, bytes: &[u8], error: &FrameError) -> Option<VerificationReport> {
        let header = PacketCodec::raw_header(bytes);
        match PacketCodec::raw_request(bytes) {
            Some((request, ack)) if error.header_trusted() => {
                self.reject(request, header, ack, error.error_code())
            }
            _ => {
                warn!("Frame of {} bytes rejected: {}", bytes.len(), error);
                Some(VerificationReport::new(
                    header,
                    VerificationOutcome::AcceptanceFail(error.error_code()),
                ))
            }
        }
    }

    /// Record an outcome for a tracked request
    pub fn report(
        &mut self,
        request: RequestId,
        outcome: VerificationOutcome,
    ) -> Result<Option<VerificationReport>, TrackerError> {
        let tracked = self
            .requests
            .get_mut(&request)
            .ok_or_else(|| TrackerError::UnknownRequest(request.to_string()))?;

        let allowed = match (tracked.stage, outcome.stage()) {
            (Stage::Acceptance, Stage::Start) => true,
            (Stage::Start | Stage::Progress, Stage::Progress | Stage::Completion) => true,
            _ => false,
        };
        if !allowed {
            return Err(TrackerError::OutOfOrder {
                request: request.to_string(),
                stage: tracked.stage.name(),
                outcome: outcome.name(),
            });
        }
        if let Some(step) = outcome.step() {
            if step != tracked.next_step {
                return Err(TrackerError::StepOutOfOrder {
                    expected: tracked.next_step,
                    got: step,
                });
            }
            tracked.next_step = tracked.next_step.wrapping_add(1);
        }
        tracked.stage = outcome.stage();

        let report = tracked
            .ack
            .contains(outcome.stage().ack_bit())
            .then(|| VerificationReport::new(tracked.header.clone(), outcome));

        if outcome.is_terminal() {
            debug!("Request {} finished: {}", request, outcome.name());
            self.requests.remove(&request);
        }
        Ok(report)
    }

    /// Report a packet that could not be stored. Telemetry carries no ack
    /// flags so the report is unconditional.
    pub fn storing_failure(header: Vec<u8>, error: ErrorCode) -> VerificationReport {
        VerificationReport::new(header, VerificationOutcome::CompletionFail(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puslibgs::{CrcPolicy, SpacePacket};

    fn request(ack: AckFlags) -> (RequestId, Vec<u8>, AckFlags) {
        let tc = SpacePacket::telecommand(0x21, 3, ack, 15, 29, vec![1, b'S']);
        (tc.request_id(), tc.header_bytes(CrcPolicy::Enabled).to_vec(), ack)
    }

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = RequestVerificationTracker::new();
        let (id, header, ack) = request(AckFlags::ALL);
        assert!(tracker.accept(id, header.clone(), ack).is_some());
        assert!(tracker.in_flight(&id));

        let start = tracker.report(id, VerificationOutcome::StartOk).unwrap().unwrap();
        assert_eq!(start.request_header, header);
        tracker.report(id, VerificationOutcome::ProgressOk(0)).unwrap();
        tracker.report(id, VerificationOutcome::ProgressOk(1)).unwrap();
        let done = tracker.report(id, VerificationOutcome::CompletionOk).unwrap().unwrap();
        assert_eq!(done.outcome.kind(), 7);
        assert!(!tracker.in_flight(&id));
    }

    #[test]
    fn test_ack_flags_filter_reports() {
        let mut tracker = RequestVerificationTracker::new();
        let (id, header, _) = request(AckFlags::new(AckFlags::COMPLETION));
        assert!(tracker.accept(id, header, AckFlags::new(AckFlags::COMPLETION)).is_none());
        assert!(tracker.report(id, VerificationOutcome::StartOk).unwrap().is_none());
        assert!(tracker.report(id, VerificationOutcome::CompletionOk).unwrap().is_some());
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut tracker = RequestVerificationTracker::new();
        let (id, header, ack) = request(AckFlags::ALL);
        tracker.accept(id, header, ack);
        tracker
            .report(id, VerificationOutcome::StartFail(ErrorCode::UnknownStoreId))
            .unwrap();
        assert!(matches!(
            tracker.report(id, VerificationOutcome::CompletionOk),
            Err(TrackerError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_stage_order_enforced() {
        let mut tracker = RequestVerificationTracker::new();
        let (id, header, ack) = request(AckFlags::ALL);
        tracker.accept(id, header, ack);
        assert!(matches!(
            tracker.report(id, VerificationOutcome::CompletionOk),
            Err(TrackerError::OutOfOrder { .. })
        ));
        tracker.report(id, VerificationOutcome::StartOk).unwrap();
        assert!(matches!(
            tracker.report(id, VerificationOutcome::StartOk),
            Err(TrackerError::OutOfOrder { .. })
        ));
        assert_eq!(
            tracker.report(id, VerificationOutcome::ProgressOk(1)),
            Err(TrackerError::StepOutOfOrder { expected: 0, got: 1 })
        );
    }

    #[test]
    fn test_reject_respects_ack_flags() {
        let tracker = RequestVerificationTracker::new();
        let (id, header, _) = request(AckFlags::NONE);
        assert!(tracker
            .reject(id, header.clone(), AckFlags::NONE, ErrorCode::InvalidField)
            .is_none());
        assert!(tracker.reject(id, header, AckFlags::ALL, ErrorCode::InvalidField).is_some());
        assert!(!tracker.in_flight(&id));
    }

    #[test]
    fn test_reject_frame() {
        let tracker = RequestVerificationTracker::new();
        let silent = SpacePacket::telecommand(1, 1, AckFlags::NONE, 15, 0x2d, vec![])
            .to_bytes(CrcPolicy::Enabled);

        let err = FrameError::UnknownServiceSubtype { service: 15, subtype: 0x2d };
        assert!(tracker.reject_frame(&silent, &err).is_none());

        let err = FrameError::CrcMismatch { received: 0, computed: 1 };
        let report = tracker.reject_frame(&silent, &err).unwrap();
        assert_eq!(report.outcome, VerificationOutcome::AcceptanceFail(ErrorCode::CrcMismatch));
        assert_eq!(report.request_header.len(), 11);

        let err = FrameError::TooShort { expected: 13, actual: 3 };
        let report = tracker.reject_frame(&silent[..3], &err).unwrap();
        assert_eq!(report.request_header, silent[..3].to_vec());
    }
}
