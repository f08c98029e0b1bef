//! PUSpecial Ground/Space Library (puslibgs)
//!
//! This library contains definitions shared between ground software and the
//! onboard process (pusspecial): CCSDS/PUS packet framing, CRC-16, storage and
//! retrieval command payloads, telemetry reports and verification reports.

pub mod types;
pub mod crc;
pub mod packet;
pub mod config;
pub mod commands;
pub mod telemetry;
pub mod verification;
pub mod error;

pub use types::*;
pub use packet::*;
pub use config::*;
pub use commands::*;
pub use telemetry::*;
pub use verification::*;
pub use error::*;
