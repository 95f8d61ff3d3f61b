//! Capture agent for pcapmib
//!
//! Responsibilities:
//! - Parse monitor definitions and open one capture per monitor
//! - Keep the monitors in an index-ordered registry
//! - Count captured traffic from the event loop
//! - Export periodic table snapshots (JSON or Prometheus text)
//! - Answer get / get-next / walk queries over gRPC (:9161)

pub mod capture;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod exporter;
pub mod filter;
pub mod grpc_server;
pub mod lifecycle;
pub mod monitor;
pub mod query;
pub mod registry;

pub use error::{AgentError, Result};
pub use event_loop::{EventLoop, LoopStatus, QueryClient};
pub use monitor::{Monitor, MonitorDefinition};
pub use registry::{Indexed, Registry, RegistryError};
