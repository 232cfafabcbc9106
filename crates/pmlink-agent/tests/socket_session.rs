//! End-to-end sessions over the socket transports, serving the sample
//! module in-process.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::net::{TcpListener, UnixListener};

use pmlink_agent::{serve_tcp, serve_unix_listener, SampleModule, ServeConfig};
use pmlink_core::protocol::{
    AttrKind, Attribute, FilterMode, InstanceDomainId, InstanceFilter, LabelTarget, MetricId,
    TextKind, TextTarget,
};
use pmlink_core::{AgentError, ConnectConfig, ConnectionKind, ConnectionManager};

const SHADE: MetricId = MetricId {
    domain: 29,
    cluster: 0,
    item: 2,
};
const SHADE_INDOM: InstanceDomainId = InstanceDomainId {
    domain: 29,
    serial: 1,
};

#[tokio::test]
async fn unix_socket_session_covers_metadata_and_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_unix_listener(
        listener,
        SampleModule::new(),
        ServeConfig::default(),
    ));

    let mut manager = ConnectionManager::new(ConnectConfig::default());
    manager.open_unix(&path).await.unwrap();
    assert_eq!(manager.kind(), ConnectionKind::Socket);
    let conn = manager.current().unwrap();

    let instances = conn.instances(SHADE_INDOM, InstanceFilter::All).await.unwrap();
    assert_eq!(instances.len(), 3);
    let green = conn
        .instances(SHADE_INDOM, InstanceFilter::Name("green".into()))
        .await
        .unwrap();
    assert_eq!(green[0].id, 1);

    let oneline = conn
        .help_text(TextTarget::Metric(SHADE), TextKind::OneLine)
        .await
        .unwrap();
    assert!(!oneline.is_empty());

    let ids = conn
        .lookup_ids(&["probe.shade".into(), "probe.nope".into()])
        .await
        .unwrap();
    assert_eq!(ids[0], Ok(SHADE));
    assert_eq!(ids[1], Err(AgentError::NO_SUCH_METRIC));

    let names = conn.lookup_names(SHADE).await.unwrap();
    assert_eq!(names, vec!["probe.shade".to_string()]);

    let children = conn.children("probe").await.unwrap();
    assert_eq!(children.len(), 3);
    let leaves = conn.traverse("").await.unwrap();
    assert_eq!(leaves.len(), 3);

    let labels = conn.labels(LabelTarget::Context).await.unwrap();
    assert_eq!(labels[0].name, "agent");

    conn.attribute(Attribute {
        kind: AttrKind::Username,
        value: "tester".into(),
    })
    .await
    .unwrap();

    manager.close().await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn tcp_session_applies_instance_profile() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_tcp(
        listener,
        SampleModule::new(),
        ServeConfig::default(),
    ));

    let mut manager = ConnectionManager::new(ConnectConfig::default());
    manager.open_inet(port).await.unwrap();
    let conn = manager.current().unwrap();

    let sets = conn.fetch(&[SHADE]).await.unwrap();
    assert_eq!(sets[0].result.as_ref().unwrap().len(), 3);

    // Restrict the profile to the green instance only.
    conn.set_instance_filter(SHADE_INDOM, FilterMode::Include, vec![1]);
    let sets = conn.fetch(&[SHADE]).await.unwrap();
    let values = sets[0].result.as_ref().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].instance, Some(1));

    // Clearing restores the include-everything default.
    conn.clear_profile(FilterMode::Include);
    let sets = conn.fetch(&[SHADE]).await.unwrap();
    assert_eq!(sets[0].result.as_ref().unwrap().len(), 3);

    manager.close().await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn ipv6_loopback_session() {
    let listener = TcpListener::bind((Ipv6Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_tcp(
        listener,
        SampleModule::new(),
        ServeConfig::default(),
    ));

    let mut manager = ConnectionManager::new(ConnectConfig::default());
    manager.open_inet6(port).await.unwrap();
    let conn = manager.current().unwrap();

    let desc = conn.descriptor(SHADE).await.unwrap();
    assert_eq!(desc.indom, Some(SHADE_INDOM));

    manager.close().await;
    server.await.unwrap().unwrap();
}
