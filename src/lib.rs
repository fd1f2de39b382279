//! Library crate for lan-sweep-rs: host discovery, port scanning and service
//! identification for local networks.
pub mod aggregator;
pub mod arp;
pub mod banner;
pub mod detect;
pub mod error;
pub mod events;
pub mod icmp;
pub mod netdetect;
pub mod orchestrator;
pub mod oshint;
pub mod ports;
pub mod profile;
pub mod resolve;
pub mod scanner;
pub mod server;
pub mod targets;
pub mod throttle;
pub mod types;

pub use error::{OrchestratorError, RangeError};
pub use events::ScanEvent;
pub use orchestrator::{ScanOrchestrator, SessionHandle};
pub use profile::ScanProfile;
pub use types::{HostResult, PortResult};
