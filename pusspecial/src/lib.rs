//! PUSpecial - onboard request verification and packet store engine
//!
//! pusspecial runs on the spacecraft. It accepts PUS telecommands, reports
//! their verification, administers the packet stores and plays stored
//! telemetry back on virtual channels.

pub mod ci;
pub mod config;
pub mod listener;
pub mod manager;
pub mod outbox;
pub mod retrieval;
pub mod sink;
pub mod store;
pub mod ticker;
pub mod tracker;

pub use ci::*;
pub use config::*;
pub use listener::*;
pub use manager::*;
pub use outbox::*;
pub use retrieval::*;
pub use sink::*;
pub use store::*;
pub use ticker::*;
pub use tracker::*;
