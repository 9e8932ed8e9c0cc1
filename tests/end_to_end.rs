//! End-to-end tests driving the fully assembled pipeline through
//! `Managers`/`DnsCore` against an in-process fake upstream, the way the
//! teacher's own integration tests exercise a resolver against a local
//! stub server rather than mocking individual stages.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use heimdall_forwarder::config::Config;
use heimdall_forwarder::core::DnsCore;
use heimdall_forwarder::dns::{DnsMessage, Header, Question, Record, RecordType};
use heimdall_forwarder::hosts::HostOverride;
use heimdall_forwarder::managers::Managers;
use heimdall_forwarder::metrics::Metrics;
use heimdall_forwarder::pipeline::{QueryContext, Stage};
use heimdall_forwarder::upstream::{Transport, UpstreamDescriptor};
use tokio::net::UdpSocket;

/// Spawns a fake upstream resolver answering every A query for `answer_name`
/// with a fixed record, and every other query with NXDOMAIN-ish empty
/// NOERROR. Returns its bound address and a shared hit counter.
async fn spawn_fake_upstream(answer_ip: Ipv4Addr) -> (String, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let task_hits = hits.clone();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 512];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            task_hits.fetch_add(1, Ordering::SeqCst);
            let query = match DnsMessage::parse(&buf[..len]) {
                Ok(q) => q,
                Err(_) => continue,
            };
            let mut reply = query.new_reply();
            if let Some(question) = query.question() {
                if matches!(question.qtype, RecordType::A) {
                    reply
                        .answer
                        .push(Record::new_a(&question.name, 60, answer_ip));
                }
            }
            if let Ok(wire) = reply.to_wire() {
                let _ = socket.send_to(&wire, peer).await;
            }
        }
    });

    (addr.to_string(), hits)
}

fn a_query(name: &str) -> DnsMessage {
    DnsMessage {
        header: Header {
            id: 42,
            qdcount: 1,
            recursion_desired: true,
            ..Default::default()
        },
        questions: vec![Question {
            name: name.into(),
            qtype: RecordType::A,
            qclass: Default::default(),
        }],
        ..Default::default()
    }
}

async fn build_core(upstream_addr: String) -> Arc<DnsCore> {
    let mut config = Config::parse(
        r#"
        [listen]
        udp = "127.0.0.1:0"
        tcp = "127.0.0.1:0"
        "#,
    )
    .unwrap();
    config.upstreams = vec![UpstreamDescriptor {
        name: "fake".into(),
        address: upstream_addr,
        transport: Some(Transport::Udp),
        weight: 10,
        timeout_ms: 2_000,
        server_name: None,
    }];

    let metrics = Arc::new(Metrics::new().unwrap());
    let managers = Managers::new(config, None, metrics.clone(), None).unwrap();
    DnsCore::new(managers, metrics)
}

#[tokio::test]
async fn resolves_through_upstream_and_then_hits_cache() {
    let (addr, hits) = spawn_fake_upstream(Ipv4Addr::new(93, 184, 216, 34)).await;
    let core = build_core(addr).await;
    let ctx = QueryContext::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));

    let pipeline = core.active_pipeline();
    let (first, source1) = pipeline
        .resolve(&ctx, &a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(first.answer.len(), 1);
    assert!(source1.starts_with("udp:"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (second, source2) = pipeline
        .resolve(&ctx, &a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(source2, "cache");
    assert_eq!(second.answer.len(), 1);
    // No second upstream round-trip: the cache served the repeat query.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn host_override_short_circuits_before_reaching_upstream() {
    let (addr, hits) = spawn_fake_upstream(Ipv4Addr::new(93, 184, 216, 34)).await;
    let core = build_core(addr).await;
    core.set_hosts(vec![HostOverride {
        pattern: "*.internal".into(),
        a: vec![Ipv4Addr::new(10, 0, 0, 5)],
        aaaa: vec![],
        ttl: 30,
    }])
    .unwrap();

    let ctx = QueryContext::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    let pipeline = core.active_pipeline();
    let (reply, source) = pipeline
        .resolve(&ctx, &a_query("api.internal"))
        .await
        .unwrap();

    assert_eq!(source, "hosts");
    assert_eq!(
        reply.answer[0].ip_address(),
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn set_upstreams_rejects_invalid_batch_and_keeps_serving_the_old_one() {
    let (addr, _hits) = spawn_fake_upstream(Ipv4Addr::new(93, 184, 216, 34)).await;
    let core = build_core(addr.clone()).await;

    let err = core.set_upstreams_config(vec![UpstreamDescriptor {
        name: "".into(),
        address: addr,
        transport: Some(Transport::Udp),
        weight: 1,
        timeout_ms: 100,
        server_name: None,
    }]);
    assert!(err.is_err());

    // The previously configured upstream is still active.
    let ctx = QueryContext::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    let (reply, _) = core
        .active_pipeline()
        .resolve(&ctx, &a_query("still-works.example"))
        .await
        .unwrap();
    assert_eq!(reply.answer.len(), 1);
}
