//! Collaborators of the command interpreter: where packets go and what time
//! it is on board

use std::collections::BTreeMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::trace;
use puslibgs::{OnboardTime, PusResult, VirtualChannel};

/// Byte sink for outbound framed packets
pub trait PacketSink {
    /// Send generated telemetry to the downlink
    fn send_telemetry(&mut self, bytes: &[u8]) -> PusResult<()>;

    /// Send a played back packet on a virtual channel
    fn send_playback(&mut self, vc: VirtualChannel, bytes: &[u8]) -> PusResult<()>;
}

/// Source of onboard time for stored entries
pub trait Clock {
    fn now(&self) -> OnboardTime;
}

/// Milliseconds since process start
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> OnboardTime {
        OnboardTime::from_millis(self.start.elapsed().as_millis() as u64)
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: OnboardTime) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis())),
        }
    }

    pub fn set(&self, time: OnboardTime) {
        self.millis.store(time.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OnboardTime {
        OnboardTime::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Sends telemetry and playback as UDP datagrams
pub struct UdpSink {
    socket: UdpSocket,
    downlink: SocketAddr,
    playback: BTreeMap<VirtualChannel, SocketAddr>,
}

impl UdpSink {
    /// Virtual channels without an address of their own play back on the
    /// downlink
    pub fn new(downlink: SocketAddr, playback: BTreeMap<VirtualChannel, SocketAddr>) -> PusResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            downlink,
            playback,
        })
    }
}

impl PacketSink for UdpSink {
    fn send_telemetry(&mut self, bytes: &[u8]) -> PusResult<()> {
        self.socket.send_to(bytes, self.downlink)?;
        Ok(())
    }

    fn send_playback(&mut self, vc: VirtualChannel, bytes: &[u8]) -> PusResult<()> {
        let addr = self.playback.get(&vc).copied().unwrap_or(self.downlink);
        trace!("Playback of {} bytes on {} to {}", bytes.len(), vc, addr);
        self.socket.send_to(bytes, addr)?;
        Ok(())
    }
}

/// Keeps every packet it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub telemetry: Vec<Vec<u8>>,
    pub playback: Vec<(VirtualChannel, Vec<u8>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.telemetry.clear();
        self.playback.clear();
    }
}

impl PacketSink for RecordingSink {
    fn send_telemetry(&mut self, bytes: &[u8]) -> PusResult<()> {
        self.telemetry.push(bytes.to_vec());
        Ok(())
    }

    fn send_playback(&mut self, vc: VirtualChannel, bytes: &[u8]) -> PusResult<()> {
        self.playback.push((vc, bytes.to_vec()));
        Ok(())
    }
}
