//! gRPC server implementation for the agent
//!
//! Implements `MonitorTableService` on top of a [`QueryClient`]: every call
//! becomes one request to the event loop, so the service never touches the
//! registry itself.

use crate::error::{AgentError, Result};
use crate::event_loop::QueryClient;
use crate::query::QueryError;
use log::{error, info};
use pcapmib_common::{Oid, Value, VarBind};
use pcapmib_proto as proto;
use pcapmib_proto::{MonitorTableService, MonitorTableServiceServer};
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// gRPC service implementation
pub struct TableService {
    client: QueryClient,
    base: Oid,
    agent_name: String,
    start_time: Instant,
}

impl TableService {
    pub fn new(client: QueryClient, base: Oid, agent_name: String) -> Self {
        Self {
            client,
            base,
            agent_name,
            start_time: Instant::now(),
        }
    }
}

fn encode_value(value: Value) -> proto::Value {
    let kind = match value {
        Value::Integer(v) => proto::value::Kind::Integer(v),
        Value::OctetString(v) => proto::value::Kind::OctetString(v),
        Value::Counter64(v) => proto::value::Kind::Counter64(v),
    };
    proto::Value { kind: Some(kind) }
}

fn encode_var_bind(var_bind: VarBind) -> proto::VarBind {
    proto::VarBind {
        oid: var_bind.oid.into_inner(),
        value: Some(encode_value(var_bind.value)),
    }
}

fn encode_exception(err: &QueryError) -> proto::Exception {
    match err {
        QueryError::NoSuchObject(_) => proto::Exception::NoSuchObject,
        QueryError::NoSuchInstance(_) => proto::Exception::NoSuchInstance,
        QueryError::EndOfMibView => proto::Exception::EndOfMibView,
    }
}

fn to_status(err: AgentError) -> Status {
    match err {
        AgentError::LoopClosed => Status::unavailable(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

/// Lookup outcomes are answers, not call failures
fn get_response(
    result: Result<VarBind>,
) -> std::result::Result<Response<proto::GetResponse>, Status> {
    match result {
        Ok(var_bind) => Ok(Response::new(proto::GetResponse {
            var_bind: Some(encode_var_bind(var_bind)),
            exception: proto::Exception::Unspecified as i32,
        })),
        Err(AgentError::Query(e)) => Ok(Response::new(proto::GetResponse {
            var_bind: None,
            exception: encode_exception(&e) as i32,
        })),
        Err(e) => Err(to_status(e)),
    }
}

#[tonic::async_trait]
impl MonitorTableService for TableService {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> std::result::Result<Response<proto::GetResponse>, Status> {
        let oid = Oid::from(request.into_inner().oid);
        get_response(self.client.get(oid).await)
    }

    async fn get_next(
        &self,
        request: Request<proto::GetNextRequest>,
    ) -> std::result::Result<Response<proto::GetResponse>, Status> {
        let oid = Oid::from(request.into_inner().oid);
        get_response(self.client.get_next(oid).await)
    }

    type WalkStream =
        Pin<Box<dyn Stream<Item = std::result::Result<proto::VarBind, Status>> + Send + 'static>>;

    async fn walk(
        &self,
        request: Request<proto::WalkRequest>,
    ) -> std::result::Result<Response<Self::WalkStream>, Status> {
        let req = request.into_inner();
        let root = if req.oid.is_empty() {
            self.base.clone()
        } else {
            Oid::from(req.oid)
        };

        let var_binds = self.client.walk(root).await.map_err(to_status)?;
        let stream = tokio_stream::iter(
            var_binds
                .into_iter()
                .map(|var_bind| Ok(encode_var_bind(var_bind))),
        );

        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_status(
        &self,
        _request: Request<proto::GetStatusRequest>,
    ) -> std::result::Result<Response<proto::AgentStatus>, Status> {
        let status = self.client.status().await.map_err(to_status)?;
        let uptime = self.start_time.elapsed().as_secs() as i64;

        Ok(Response::new(proto::AgentStatus {
            agent_name: self.agent_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            healthy: true,
            base_oid: self.base.to_string(),
            monitors: status.monitors,
            seen_octets: status.seen_octets,
            seen_packets: status.seen_packets,
            drain_errors: status.drain_errors,
            uptime_seconds: uptime,
        }))
    }
}

/// Name reported in status replies
pub fn agent_name() -> String {
    std::env::var("PCAPMIB_AGENT_NAME")
        .or_else(|_| hostname::get().map(|h| h.to_string_lossy().to_string()))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Start the gRPC server
///
/// Binds `addr` before returning, so a busy port is reported to the
/// caller; the server then runs on its own task until `shutdown` is
/// cancelled. Returns the bound address.
pub async fn start_server(
    client: QueryClient,
    base: Oid,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::Bind { addr, source: e })?;
    let local_addr = listener.local_addr().map_err(|e| AgentError::Bind { addr, source: e })?;

    let service = TableService::new(client, base, agent_name());

    info!("Starting gRPC server on {}", local_addr);

    let server = tonic::transport::Server::builder()
        .add_service(MonitorTableServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await
        });

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("gRPC server error: {}", e);
        }
    });

    Ok(local_addr)
}
