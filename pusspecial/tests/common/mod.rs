//! Shared harness for driving the command interpreter end to end

#![allow(dead_code)]

use puslibgs::{
    AckFlags, Command, CrcPolicy, OnboardTime, PacketCodec, SpacePacket, StorageCommand, StoreId,
    StoreKind, StoreSpec, Telemetry, VerificationOutcome, VerificationReport, VirtualChannel,
    VERIFICATION_SERVICE,
};
use pusspecial_lib::{CommandInterpreter, CoreConfig, ManualClock, Message, RecordingSink};

pub const GROUND_APID: u16 = 0x20;
pub const INSTRUMENT_APID: u16 = 0x30;

/// Length of a packet built by [`Harness::store_at`]
pub const ENTRY_LEN: usize = 21;

pub fn id(s: &str) -> StoreId {
    StoreId::new(s).unwrap()
}

pub fn spec(name: &str, capacity: usize, kind: StoreKind, vc: u8) -> StoreSpec {
    StoreSpec::new(id(name), capacity, kind, VirtualChannel(vc))
}

pub struct Harness {
    pub ci: CommandInterpreter<RecordingSink, ManualClock>,
    pub clock: ManualClock,
    seq: u16,
}

impl Harness {
    pub fn new(stores: Vec<StoreSpec>) -> Self {
        let config = CoreConfig {
            store_own_telemetry: false,
            ..CoreConfig::default()
        };
        Self::with_config(config, stores)
    }

    pub fn with_config(config: CoreConfig, stores: Vec<StoreSpec>) -> Self {
        let clock = ManualClock::new(OnboardTime(0));
        let ci = CommandInterpreter::new(config, stores, RecordingSink::new(), clock.clone()).unwrap();
        Self { ci, clock, seq: 0 }
    }

    /// Send a storage command with every ack flag set. Returns its sequence
    /// count.
    pub fn command(&mut self, command: StorageCommand) -> u16 {
        self.send(Command::Storage(command))
    }

    pub fn send(&mut self, command: Command) -> u16 {
        let seq = self.seq;
        self.seq += 1;
        self.send_with_seq(command, seq);
        seq
    }

    pub fn send_with_seq(&mut self, command: Command, seq: u16) {
        let tc = command
            .to_packet(GROUND_APID, seq, AckFlags::ALL)
            .to_bytes(CrcPolicy::Enabled);
        self.raw(tc);
    }

    pub fn raw(&mut self, bytes: Vec<u8>) {
        assert!(self.ci.handle(Message::Telecommand(bytes)));
    }

    /// Store an instrument packet whose payload is its time tag
    pub fn store_at(&mut self, millis: u64) {
        self.clock.set(OnboardTime(millis));
        let tm = SpacePacket::telemetry(INSTRUMENT_APID, 3, 25, 0, millis.to_be_bytes().to_vec())
            .to_bytes(CrcPolicy::Enabled);
        assert!(self.ci.handle(Message::Store(tm)));
    }

    pub fn tick(&mut self) {
        assert!(self.ci.handle(Message::Tick));
    }

    /// Verification outcomes sent so far, with the sequence count of the
    /// request each one is about
    pub fn outcomes(&self) -> Vec<(u16, VerificationOutcome)> {
        self.verification_reports()
            .into_iter()
            .map(|report| {
                let (request, _) = PacketCodec::raw_request(&report.request_header).unwrap();
                (request.sequence_count, report.outcome)
            })
            .collect()
    }

    /// Verification reports sent so far
    pub fn verification_reports(&self) -> Vec<VerificationReport> {
        self.decoded()
            .iter()
            .filter(|p| p.service_type == VERIFICATION_SERVICE)
            .map(|p| VerificationReport::from_packet(p).unwrap())
            .collect()
    }

    /// Service reports sent so far
    pub fn reports(&self) -> Vec<Telemetry> {
        self.decoded()
            .iter()
            .filter(|p| p.service_type != VERIFICATION_SERVICE)
            .map(|p| Telemetry::from_packet(p).unwrap())
            .collect()
    }

    /// Time tags of the played back packets, with their virtual channel
    pub fn playback(&self) -> Vec<(u8, u64)> {
        self.ci
            .sink()
            .playback
            .iter()
            .map(|(vc, bytes)| {
                let packet = SpacePacket::from_bytes(bytes, CrcPolicy::Enabled).unwrap();
                let mut tag = [0u8; 8];
                tag.copy_from_slice(&packet.payload);
                (vc.0, u64::from_be_bytes(tag))
            })
            .collect()
    }

    /// Number of packets played back, whatever their content
    pub fn playback_count(&self) -> usize {
        self.ci.sink().playback.len()
    }

    pub fn clear(&mut self) {
        self.ci.sink_mut().clear();
    }

    fn decoded(&self) -> Vec<SpacePacket> {
        self.ci
            .sink()
            .telemetry
            .iter()
            .map(|bytes| SpacePacket::from_bytes(bytes, CrcPolicy::Enabled).unwrap())
            .collect()
    }
}
