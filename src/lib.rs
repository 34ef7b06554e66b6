//! TCP Forwarder
//!
//! Accepts TCP connections on one or more listen endpoints and relays bytes to
//! a target endpoint, optionally across a range of ports, with a global
//! connection limit, connect retries and synchronized teardown.

pub mod cli;
pub mod config;
pub mod engine;
pub mod gate;
pub mod health;
pub mod listener;
pub mod logging;
pub mod relay;
pub mod retry;
pub mod session;

// Re-export commonly used types and functions
pub use config::{Config, ForwarderConfig, PortRange, load_config, parse_config};
pub use engine::{EngineConfig, ForwardRule, ForwardingEngine};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use health::HealthChecker;
pub use listener::Listener;
pub use relay::{DEFAULT_BUFFER_SIZE, Direction, PumpEnd, RelayPump};
pub use retry::RetryPolicy;
pub use session::{Session, SessionReport, SessionState};
