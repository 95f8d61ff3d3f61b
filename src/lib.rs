//! pcapmib - packet-capture monitors served as an index-addressed counter table
//!
//! Facade over the workspace crates:
//! - [`common`] - OIDs, table layout and row types
//! - [`agent`] - monitor registry, capture event loop and query service
//! - [`proto`] - gRPC protocol definitions (feature `proto`)

#[cfg(feature = "agent")]
pub use pcapmib_agent as agent;
#[cfg(feature = "common")]
pub use pcapmib_common as common;
#[cfg(feature = "proto")]
pub use pcapmib_proto as proto;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
