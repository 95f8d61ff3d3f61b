use pcapmib::agent::capture::datagram::DatagramBackend;
use pcapmib::agent::config::load_definitions;
use pcapmib::agent::exporter::{ExportFormat, Exporter};
use pcapmib::agent::grpc_server::start_server;
use pcapmib::agent::{AgentError, EventLoop, LoopStatus, QueryClient};
use pcapmib::common::{Oid, Value};
use pcapmib_proto::value::Kind;
use pcapmib_proto::{
    Exception, GetNextRequest, GetRequest, GetStatusRequest, MonitorTableServiceClient,
    WalkRequest,
};
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"# capture points
pcapDescr.3  = "dns"
pcapDevice.3 = "eth1"
pcapFilter.3 = "udp port 53"

% ignored
pcapDescr.1  = "everything on eth0"
pcapDevice.1 = "eth0"

pcapDescr.2  = "bad filter"
pcapDevice.2 = "eth0"
pcapFilter.2 = "udp port"

pcapDescr.99 = "index out of range"
"#;

fn base() -> Oid {
    pcapmib::common::DEFAULT_BASE_OID.parse().unwrap()
}

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// IPv4 + UDP frame of `len` bytes on the wire
fn udp_frame(dport: u16, len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; len];
    frame[12..14].copy_from_slice(&[0x08, 0x00]);
    frame[14] = 0x45;
    frame[23] = 17;
    frame[26..30].copy_from_slice(&[10, 0, 0, 1]);
    frame[30..34].copy_from_slice(&[10, 0, 0, 2]);
    frame[34..36].copy_from_slice(&40000u16.to_be_bytes());
    frame[36..38].copy_from_slice(&dport.to_be_bytes());
    frame
}

async fn wait_for_packets(client: &QueryClient, packets: u64) -> LoopStatus {
    let mut status = client.status().await.unwrap();
    for _ in 0..200 {
        if status.seen_packets >= packets {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = client.status().await.unwrap();
    }
    status
}

#[test]
fn test_version_const() {
    assert!(!pcapmib::VERSION.is_empty());
}

#[tokio::test]
async fn test_config_to_counters_to_export() {
    let config = write_config();
    let export_dir = tempfile::tempdir().unwrap();
    let export_path = export_dir.path().join("pcap.json");

    let defs = load_definitions(config.path()).unwrap();
    assert_eq!(
        defs.iter().map(|d| d.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let backend = DatagramBackend::new();
    let mut event_loop = EventLoop::new(backend.clone(), base()).with_exporter(
        Exporter::new(&export_path, ExportFormat::Json),
        Duration::from_millis(50),
    );
    assert_eq!(event_loop.load(&defs), 2);

    let client = event_loop.client();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(event_loop.run(shutdown.clone()));

    backend.inject_len("eth0", 150);
    backend.inject_len("eth0", 10);
    backend.inject("eth1", &udp_frame(53, 90));
    backend.inject("eth1", &udp_frame(123, 90));

    let status = wait_for_packets(&client, 2).await;
    assert_eq!(status.monitors, 2);
    assert_eq!(status.seen_packets, 2);
    assert_eq!(status.seen_octets, 136 + 76);

    let row = client.row(1).await.unwrap();
    assert_eq!(row.description, "everything on eth0");
    assert_eq!(row.seen_octets, 136);
    assert_eq!(client.next_row(1).await.unwrap().index, 3);
    assert!(matches!(
        client.row(2).await,
        Err(AgentError::Registry(_))
    ));

    let filter = client.get(base().join(&[2, 1, 4, 3])).await.unwrap();
    assert_eq!(filter.value, Value::OctetString("udp port 53".into()));

    for _ in 0..200 {
        if export_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert_eq!(backend.live_handles(), 0);

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export_path).unwrap()).unwrap();
    let records = exported.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["index"], 1);
    assert_eq!(records[0]["seen_octets"], 136);
    assert_eq!(records[1]["index"], 3);
    assert_eq!(records[1]["device"], "eth1");
    assert_eq!(records[1]["seen_packets"], 1);
}

#[tokio::test]
async fn test_grpc_queries() {
    let backend = DatagramBackend::new();
    let mut event_loop = EventLoop::new(backend.clone(), base());
    let defs = load_definitions(write_config().path()).unwrap();
    event_loop.load(&defs);

    let client = event_loop.client();
    let shutdown = CancellationToken::new();
    let addr: SocketAddr = start_server(
        client.clone(),
        base(),
        "127.0.0.1:0".parse().unwrap(),
        shutdown.clone(),
    )
    .await
    .unwrap();
    let running = tokio::spawn(event_loop.run(shutdown.clone()));

    backend.inject_len("eth0", 1514);
    wait_for_packets(&client, 1).await;

    let mut grpc = MonitorTableServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let octets = base().join(&[2, 1, 5, 1]);
    let response = grpc
        .get(GetRequest {
            oid: octets.clone().into_inner(),
        })
        .await
        .unwrap()
        .into_inner();
    let var_bind = response.var_bind.unwrap();
    assert_eq!(var_bind.oid, octets.into_inner());
    assert_eq!(var_bind.value.unwrap().kind, Some(Kind::Counter64(1500)));

    let response = grpc
        .get(GetRequest {
            oid: base().join(&[2, 1, 5, 2]).into_inner(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.var_bind.is_none());
    assert_eq!(response.exception, Exception::NoSuchInstance as i32);

    let response = grpc
        .get_next(GetNextRequest {
            oid: base().join(&[1, 0]).into_inner(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        response.var_bind.unwrap().oid,
        base().join(&[2, 1, 1, 1]).into_inner()
    );

    let response = grpc
        .get_next(GetNextRequest {
            oid: base().join(&[2, 1, 6, 3]).into_inner(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.exception, Exception::EndOfMibView as i32);

    let mut walk = grpc
        .walk(WalkRequest { oid: Vec::new() })
        .await
        .unwrap()
        .into_inner();
    let mut walked = Vec::new();
    while let Some(var_bind) = walk.message().await.unwrap() {
        walked.push(var_bind);
    }
    assert_eq!(walked.len(), 1 + 6 * 2);
    assert_eq!(
        walked[0].value.clone().unwrap().kind,
        Some(Kind::Integer(2))
    );

    let status = grpc
        .get_status(GetStatusRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(status.healthy);
    assert_eq!(status.monitors, 2);
    assert_eq!(status.seen_packets, 1);
    assert_eq!(status.base_oid, pcapmib::common::DEFAULT_BASE_OID);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}
