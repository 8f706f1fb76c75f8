//! s3x-gateway - Gateway engine bridging one bus to one device
//!
//! # Data flow
//!
//! ```text
//!  bus command topic ──► CommandTranslator ──► DeviceDriver
//!                              │                    │
//!                              ▼                    ▼ reports
//!                        PinStateTable ◄──── TelemetryReporter ──► bus event topics
//! ```
//!
//! [`GatewaySupervisor`] owns the connection lifecycle: it connects the
//! device and the bus, restores pin configuration after a reconnect, backs
//! off on failures and shuts everything down in order.

pub mod coalescer;
pub mod config;
pub mod pin_table;
pub mod publisher;
pub mod reporter;
pub mod state;
pub mod supervisor;
pub mod translator;
pub mod vocabulary;

pub use coalescer::Coalescer;
pub use config::{
    BackoffConfig, GatewayConfig, SupervisorConfig, TelemetryConfig, TopicConfig,
};
pub use pin_table::PinStateTable;
pub use publisher::BusPublisher;
pub use reporter::{ReporterHandle, TelemetryReporter};
pub use state::SupervisorState;
pub use supervisor::{GatewaySupervisor, SupervisorMonitor};
pub use translator::CommandTranslator;
pub use vocabulary::{CommandMapping, Vocabulary, VocabularyConfig};

// Re-export for convenience
pub use s3x_core::{GatewayError, GatewayResult};
