use crate::config::ConfigError;
use crate::exporter::ExportError;
use crate::lifecycle::MonitorError;
use crate::query::QueryError;
use crate::registry::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("event loop is not running")]
    LoopClosed,

    #[error("can't listen on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;
