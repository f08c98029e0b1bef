//! Command interpreter for pusspecial
//!
//! The command interpreter is a single-threaded actor. It owns the store
//! table, the verification tracker and the engines operating on them, and
//! processes one message from its queue to completion before taking the next.
//! Telecommands, packets to store and retrieval ticks all arrive on the same
//! queue.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

use log::{debug, error, info, warn};
use puslibgs::{
    supported_services, Command, ErrorCode, FrameError, PacketCodec, PusResult,
    SequenceCounters, ServiceTable, SpacePacket, StorageCommand, StoreSpec, Telemetry,
    VerificationReport,
};

use crate::config::CoreConfig;
use crate::manager::PacketStoreManager;
use crate::outbox::{Outbox, Output};
use crate::retrieval::RetrievalEngine;
use crate::sink::{Clock, PacketSink};
use crate::store::StoreTable;
use crate::tracker::RequestVerificationTracker;

/// Messages processed by the command interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raw telecommand frame
    Telecommand(Vec<u8>),
    /// Raw telemetry packet produced elsewhere, to be stored
    Store(Vec<u8>),
    /// Retrieval tick
    Tick,
    Shutdown,
}

/// Command interpreter state
pub struct CommandInterpreter<S: PacketSink, C: Clock> {
    config: CoreConfig,
    tc_codec: PacketCodec,
    tm_codec: PacketCodec,
    counters: SequenceCounters,
    tracker: RequestVerificationTracker,
    manager: PacketStoreManager,
    retrieval: RetrievalEngine,
    table: StoreTable,
    sink: S,
    clock: C,
}

impl<S: PacketSink, C: Clock> CommandInterpreter<S, C> {
    /// Create a command interpreter with the initial store table
    pub fn new(config: CoreConfig, stores: Vec<StoreSpec>, sink: S, clock: C) -> PusResult<Self> {
        let manager = PacketStoreManager::new(config.max_stores);
        let mut table = StoreTable::new();
        manager.import(&mut table, stores)?;

        Ok(Self {
            tc_codec: PacketCodec::new(config.tc_crc, supported_services()),
            tm_codec: PacketCodec::new(config.tm_crc, ServiceTable::new()),
            config,
            counters: SequenceCounters::new(),
            tracker: RequestVerificationTracker::new(),
            manager,
            retrieval: RetrievalEngine::new(),
            table,
            sink,
            clock,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn table(&self) -> &StoreTable {
        &self.table
    }

    pub fn tracker(&self) -> &RequestVerificationTracker {
        &self.tracker
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    /// Process one message. Returns false once the interpreter should stop.
    pub fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Telecommand(bytes) => self.process_telecommand(&bytes),
            Message::Store(bytes) => self.process_store(&bytes),
            Message::Tick => self.process_tick(),
            Message::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Run the command interpreter main loop until shutdown or until every
    /// sender is gone
    pub fn run(&mut self, rx: Receiver<Message>) {
        info!(
            "Command interpreter running with {} packet stores",
            self.table.len()
        );
        for message in rx.iter() {
            if !self.handle(message) {
                break;
            }
        }
        info!(
            "Command interpreter stopped, {} requests still in flight",
            self.tracker.in_flight_count()
        );
    }

    fn process_telecommand(&mut self, bytes: &[u8]) {
        let packet = match self.tc_codec.decode(bytes) {
            Ok(packet) if packet.is_command => packet,
            Ok(_) => {
                self.reject_frame(bytes, FrameError::UnsupportedHeader("packet type"));
                return;
            }
            Err(e) => {
                self.reject_frame(bytes, e);
                return;
            }
        };

        let request = packet.request_id();
        let header = PacketCodec::raw_header(bytes);
        debug!(
            "Telecommand {} service {},{}",
            request, packet.service_type, packet.service_subtype
        );

        if self.tracker.in_flight(&request) {
            if let Some(report) =
                self.tracker
                    .reject(request, header, packet.ack_flags, ErrorCode::DuplicateRequest)
            {
                self.emit_report(report);
            }
            return;
        }

        let command = match Command::from_packet(&packet) {
            Ok(command) => command,
            Err(e) => {
                warn!("Telecommand {} has bad application data: {}", request, e);
                if let Some(report) =
                    self.tracker
                        .reject(request, header, packet.ack_flags, e.error_code())
                {
                    self.emit_report(report);
                }
                return;
            }
        };

        if let Some(report) = self.tracker.accept(request, header, packet.ack_flags) {
            self.emit_report(report);
        }

        let mut out = Outbox::new();
        match command {
            Command::ConnectionTest => {
                out.started(request);
                out.report(Telemetry::ConnectionTest);
                out.completed(request);
            }
            Command::Storage(command) if is_retrieval(&command) => {
                self.retrieval
                    .execute(&mut self.table, request, command, &mut out)
            }
            Command::Storage(command) => {
                self.manager
                    .execute(&mut self.table, request, command, &mut out)
            }
        }
        self.dispatch(out.into_outputs());
    }

    fn reject_frame(&mut self, bytes: &[u8], error: FrameError) {
        if let Some(report) = self.tracker.reject_frame(bytes, &error) {
            self.emit_report(report);
        }
    }

    fn process_store(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            debug!("Ignoring empty packet");
            return;
        }
        let mut out = Outbox::new();
        self.retrieval
            .ingest(&mut self.table, bytes, self.clock.now(), &mut out);
        self.dispatch(out.into_outputs());
    }

    fn process_tick(&mut self) {
        let mut out = Outbox::new();
        self.retrieval.tick(&mut self.table, &mut out);
        self.dispatch(out.into_outputs());
    }

    /// Turn outputs into packets, in order. Outputs of storing our own
    /// telemetry are handled right after the output that produced them.
    fn dispatch(&mut self, outputs: Vec<Output>) {
        let mut queue: VecDeque<Output> = outputs.into();
        while let Some(output) = queue.pop_front() {
            let follow_up = match output {
                Output::Verification { request, outcome, failure_data } => {
                    match self.tracker.report(request, outcome) {
                        Ok(Some(report)) => {
                            let report = report.with_failure_data(failure_data);
                            self.emit_tm(report.to_packet(self.config.apid), true)
                        }
                        Ok(None) => Vec::new(),
                        Err(e) => {
                            error!("Verification of {} out of order: {}", request, e);
                            Vec::new()
                        }
                    }
                }
                Output::Report(telemetry) => {
                    let counter = self.counters.next_message();
                    self.emit_tm(telemetry.to_packet(self.config.apid, counter), true)
                }
                Output::Playback { vc, bytes } => {
                    if let Err(e) = self.sink.send_playback(vc, &bytes) {
                        error!("Playback on {} failed: {}", vc, e);
                    }
                    Vec::new()
                }
                Output::StoringFailure { header, error } => {
                    let report = RequestVerificationTracker::storing_failure(header, error);
                    self.emit_tm(report.to_packet(self.config.apid), false)
                }
            };
            for output in follow_up.into_iter().rev() {
                queue.push_front(output);
            }
        }
    }

    fn emit_report(&mut self, report: VerificationReport) {
        let follow_up = self.emit_tm(report.to_packet(self.config.apid), true);
        self.dispatch(follow_up);
    }

    /// Send generated telemetry, then offer it to the stores
    fn emit_tm(&mut self, mut packet: SpacePacket, store: bool) -> Vec<Output> {
        packet.sequence_count = self.counters.next(packet.apid, false);
        let bytes = self.tm_codec.encode(&packet);
        if let Err(e) = self.sink.send_telemetry(&bytes) {
            error!("Telemetry {},{} not sent: {}", packet.service_type, packet.service_subtype, e);
        }

        if !(store && self.config.store_own_telemetry) {
            return Vec::new();
        }
        let mut out = Outbox::new();
        self.retrieval
            .ingest(&mut self.table, &bytes, self.clock.now(), &mut out);
        out.into_outputs()
    }
}

fn is_retrieval(command: &StorageCommand) -> bool {
    matches!(
        command,
        StorageCommand::EnableRetrieval(_)
            | StorageCommand::DisableRetrieval(_)
            | StorageCommand::SuspendRetrieval(_)
            | StorageCommand::ResumeRetrieval(_)
            | StorageCommand::ChangeStartTime { .. }
            | StorageCommand::StartByTimeRange { .. }
            | StorageCommand::AbortByTimeRange(_)
            | StorageCommand::CopyInWindow { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ManualClock, RecordingSink};
    use puslibgs::{
        AckFlags, CrcPolicy, OnboardTime, StoreId, StoreKind, VerificationOutcome,
        VirtualChannel,
    };

    fn interpreter() -> CommandInterpreter<RecordingSink, ManualClock> {
        let config = CoreConfig {
            store_own_telemetry: false,
            ..CoreConfig::default()
        };
        let specs = vec![StoreSpec::new(
            StoreId::new("S").unwrap(),
            1024,
            StoreKind::Circular,
            VirtualChannel(1),
        )];
        CommandInterpreter::new(config, specs, RecordingSink::new(), ManualClock::new(OnboardTime(0)))
            .unwrap()
    }

    fn outcomes(ci: &CommandInterpreter<RecordingSink, ManualClock>) -> Vec<VerificationOutcome> {
        ci.sink()
            .telemetry
            .iter()
            .filter_map(|bytes| SpacePacket::from_bytes(bytes, CrcPolicy::Enabled).ok())
            .filter_map(|packet| VerificationReport::from_packet(&packet).ok())
            .map(|report| report.outcome)
            .collect()
    }

    #[test]
    fn test_connection_test() {
        let mut ci = interpreter();
        let tc = Command::ConnectionTest
            .to_packet(0x20, 1, AckFlags::ALL)
            .to_bytes(CrcPolicy::Enabled);
        assert!(ci.handle(Message::Telecommand(tc)));
        assert_eq!(
            outcomes(&ci),
            vec![
                VerificationOutcome::AcceptanceOk,
                VerificationOutcome::StartOk,
                VerificationOutcome::CompletionOk
            ]
        );
        assert_eq!(ci.sink().telemetry.len(), 4);
    }

    #[test]
    fn test_telemetry_on_command_channel() {
        let mut ci = interpreter();
        let tm = SpacePacket::telemetry(0x20, 17, 2, 0, vec![]).to_bytes(CrcPolicy::Enabled);
        ci.handle(Message::Telecommand(tm));
        assert_eq!(
            outcomes(&ci),
            vec![VerificationOutcome::AcceptanceFail(ErrorCode::UnsupportedHeader)]
        );
    }

    #[test]
    fn test_generated_telemetry_sequence_counts() {
        let mut ci = interpreter();
        for seq in 0..3 {
            let tc = Command::ConnectionTest
                .to_packet(0x20, seq, AckFlags::new(AckFlags::ACCEPTANCE))
                .to_bytes(CrcPolicy::Enabled);
            ci.handle(Message::Telecommand(tc));
        }
        let counts: Vec<u16> = ci
            .sink()
            .telemetry
            .iter()
            .map(|b| SpacePacket::from_bytes(b, CrcPolicy::Enabled).unwrap().sequence_count)
            .collect();
        assert_eq!(counts, (0..counts.len() as u16).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown() {
        let mut ci = interpreter();
        assert!(!ci.handle(Message::Shutdown));
    }

    #[test]
    fn test_run_drains_queue() {
        let mut ci = interpreter();
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(Message::Store(vec![0x08, 0x20, 0xC0, 0, 0, 0])).unwrap();
        tx.send(Message::Tick).unwrap();
        drop(tx);
        ci.run(rx);
        assert_eq!(ci.table().get(&StoreId::new("S").unwrap()).unwrap().entry_count(), 1);
    }
}
