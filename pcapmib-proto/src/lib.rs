//! gRPC protocol definitions for pcapmib
//!
//! Defines:
//! - `MonitorTableService` - get / get-next / walk over the monitor table
//! - Object, value and exception message types
//! - Agent status
//!
//! Generated from `proto/pcapmib.proto`.

pub mod v1 {
    tonic::include_proto!("pcapmib.v1");
}

pub use v1::monitor_table_service_client::MonitorTableServiceClient;
pub use v1::monitor_table_service_server::{MonitorTableService, MonitorTableServiceServer};
pub use v1::*;
