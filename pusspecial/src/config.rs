//! Configuration loading for pusspecial
//!
//! The configuration file is read once at startup. It describes the core
//! (addresses, CRC policy, tick rate) and the initial packet store table.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use puslibgs::{
    CrcPolicy, PusError, PusResult, StoreSpec, StoreSpecJson, VirtualChannel, APID_MAX, MAX_STORES,
};

use self::constants::*;

/// Main configuration for pusspecial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// APID of telemetry generated by the core
    pub apid: u16,
    /// CRC policy of inbound telecommands
    pub tc_crc: CrcPolicy,
    /// CRC policy of generated telemetry
    pub tm_crc: CrcPolicy,
    /// Maximum number of packet stores
    pub max_stores: usize,
    /// Whether telemetry generated by the core is offered to the stores
    pub store_own_telemetry: bool,
    /// Address to listen for telecommands on
    pub listen_addr: SocketAddr,
    /// Address to listen for packets to store on
    pub store_listen_addr: Option<SocketAddr>,
    /// Destination of generated telemetry
    pub downlink_addr: SocketAddr,
    /// Destination of each virtual channel's playback
    pub playback_addrs: BTreeMap<VirtualChannel, SocketAddr>,
    /// Sample rate of the host runtime
    pub sample_rate_hz: u32,
    /// Samples between two retrieval ticks
    pub samples_per_tick: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            apid: DEFAULT_APID,
            tc_crc: CrcPolicy::Enabled,
            tm_crc: CrcPolicy::Enabled,
            max_stores: DEFAULT_MAX_STORES,
            store_own_telemetry: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            store_listen_addr: None,
            downlink_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_DOWNLINK_PORT)),
            playback_addrs: BTreeMap::new(),
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            samples_per_tick: DEFAULT_SAMPLES_PER_TICK,
        }
    }
}

impl CoreConfig {
    /// Period of the shared retrieval tick
    pub fn tick_period(&self) -> Duration {
        let rate = self.sample_rate_hz.max(1) as u64;
        let nanos = self.samples_per_tick as u64 * 1_000_000_000 / rate;
        Duration::from_nanos(nanos.max(1))
    }
}

fn crc_policy(enabled: bool) -> CrcPolicy {
    if enabled {
        CrcPolicy::Enabled
    } else {
        CrcPolicy::Disabled
    }
}

fn parse_addr(field: &str, addr: &str) -> Result<SocketAddr, String> {
    addr.parse()
        .map_err(|e| format!("Invalid {} '{}': {}", field, addr, e))
}

/// JSON representation of the core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfigJson {
    #[serde(default)]
    pub apid: Option<u16>,
    #[serde(default)]
    pub tc_crc: Option<bool>,
    #[serde(default)]
    pub tm_crc: Option<bool>,
    #[serde(default)]
    pub max_stores: Option<usize>,
    #[serde(default)]
    pub store_own_telemetry: Option<bool>,
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub store_listen_addr: Option<String>,
    #[serde(default)]
    pub downlink_addr: Option<String>,
    #[serde(default)]
    pub playback_addrs: BTreeMap<u8, String>,
    #[serde(default)]
    pub sample_rate_hz: Option<u32>,
    #[serde(default)]
    pub samples_per_tick: Option<u32>,
}

impl CoreConfigJson {
    pub fn to_core_config(&self) -> Result<CoreConfig, String> {
        let defaults = CoreConfig::default();

        let apid = self.apid.unwrap_or(defaults.apid);
        if apid > APID_MAX {
            return Err(format!("APID {} out of range", apid));
        }
        if self.sample_rate_hz == Some(0) {
            return Err("Sample rate must be positive".to_string());
        }
        let max_stores = self.max_stores.unwrap_or(defaults.max_stores);
        if max_stores > MAX_STORES {
            return Err(format!("max_stores {} exceeds {}", max_stores, MAX_STORES));
        }

        let listen_addr = match &self.listen_addr {
            Some(addr) => parse_addr("listen_addr", addr)?,
            None => defaults.listen_addr,
        };
        let store_listen_addr = match &self.store_listen_addr {
            Some(addr) => Some(parse_addr("store_listen_addr", addr)?),
            None => None,
        };
        let downlink_addr = match &self.downlink_addr {
            Some(addr) => parse_addr("downlink_addr", addr)?,
            None => defaults.downlink_addr,
        };
        let playback_addrs = self
            .playback_addrs
            .iter()
            .map(|(vc, addr)| Ok((VirtualChannel(*vc), parse_addr("playback_addrs", addr)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?;

        Ok(CoreConfig {
            apid,
            tc_crc: self.tc_crc.map(crc_policy).unwrap_or(defaults.tc_crc),
            tm_crc: self.tm_crc.map(crc_policy).unwrap_or(defaults.tm_crc),
            max_stores,
            store_own_telemetry: self.store_own_telemetry.unwrap_or(defaults.store_own_telemetry),
            listen_addr,
            store_listen_addr,
            downlink_addr,
            playback_addrs,
            sample_rate_hz: self.sample_rate_hz.unwrap_or(defaults.sample_rate_hz),
            samples_per_tick: self.samples_per_tick.unwrap_or(defaults.samples_per_tick),
        })
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PusspecialConfig {
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub core: CoreConfigJson,
    #[serde(default)]
    pub packet_stores: Vec<StoreSpecJson>,
}

/// Load the core configuration and initial store table from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> PusResult<(CoreConfig, Vec<StoreSpec>)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: PusspecialConfig = serde_json::from_reader(reader)?;

    let core_config = config.core.to_core_config().map_err(PusError::Config)?;

    let store_specs: Result<Vec<StoreSpec>, String> = config
        .packet_stores
        .iter()
        .map(|store| store.to_store_spec())
        .collect();

    let store_specs = store_specs.map_err(PusError::Config)?;

    Ok((core_config, store_specs))
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Config file used when none is given on the command line
    pub const DEFAULT_CONFIG_PATH: &str = "pusspecial.json";

    pub const DEFAULT_APID: u16 = 0x0010;

    pub const DEFAULT_MAX_STORES: usize = 16;

    pub const DEFAULT_LISTEN_PORT: u16 = 5000;

    pub const DEFAULT_DOWNLINK_PORT: u16 = 5001;

    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 32_000;

    /// 32000 samples per second, 3200 samples per tick: 10 ticks per second
    pub const DEFAULT_SAMPLES_PER_TICK: u32 = 3_200;

    /// Largest datagram accepted from the transport
    pub const MAX_PACKET_SIZE: usize = 65_542;

    /// How often listener threads check whether they should stop
    pub const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(200);
}

#[cfg(test)]
mod tests {
    use super::*;
    use puslibgs::StoreKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.max_stores, DEFAULT_MAX_STORES);
        assert_eq!(config.tick_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_tick_period_from_sample_rate() {
        let config = CoreConfig {
            sample_rate_hz: 48_000,
            samples_per_tick: 960,
            ..CoreConfig::default()
        };
        assert_eq!(config.tick_period(), Duration::from_millis(20));
    }

    #[test]
    fn test_load_config() {
        let config_json = r#"{
            "version": "1.0",
            "description": "Test config",
            "core": {
                "apid": 33,
                "tc_crc": false,
                "listen_addr": "127.0.0.1:4000",
                "playback_addrs": { "2": "127.0.0.1:6002" }
            },
            "packet_stores": [
                {
                    "id": "HK",
                    "capacity_bytes": 65536,
                    "type": "circular",
                    "virtual_channel": 2
                },
                {
                    "id": "EVENTS",
                    "capacity_bytes": 8192,
                    "type": "bounded",
                    "virtual_channel": 3,
                    "storage_enabled": false,
                    "apids": [5, 6]
                }
            ]
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        let (core, stores) = load_config(temp_file.path()).unwrap();
        assert_eq!(core.apid, 33);
        assert_eq!(core.tc_crc, CrcPolicy::Disabled);
        assert_eq!(core.tm_crc, CrcPolicy::Enabled);
        assert_eq!(core.listen_addr.port(), 4000);
        assert_eq!(core.playback_addrs.len(), 1);
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].kind, StoreKind::Circular);
        assert!(!stores[1].storage_enabled);
        assert_eq!(stores[1].apids, vec![5, 6]);
    }

    #[test]
    fn test_load_config_rejects_bad_store() {
        let config_json = r#"{
            "version": "1.0",
            "packet_stores": [
                { "id": "A*", "capacity_bytes": 10, "type": "bounded", "virtual_channel": 0 }
            ]
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        assert!(matches!(load_config(temp_file.path()), Err(PusError::Config(_))));
    }

    #[test]
    fn test_bad_address() {
        let json = CoreConfigJson {
            downlink_addr: Some("nowhere".to_string()),
            ..CoreConfigJson::default()
        };
        assert!(json.to_core_config().is_err());
    }

    #[test]
    fn test_max_stores_fits_store_count() {
        let mut json = CoreConfigJson {
            max_stores: Some(MAX_STORES),
            ..CoreConfigJson::default()
        };
        assert_eq!(json.to_core_config().unwrap().max_stores, MAX_STORES);

        json.max_stores = Some(MAX_STORES + 1);
        assert!(json.to_core_config().is_err());
    }
}
