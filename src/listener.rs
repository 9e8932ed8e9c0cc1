//! DNS listener (spec §4.7): binds UDP and TCP endpoints and drives every
//! inbound query through the active pipeline. Grounded on the teacher's
//! `server.rs` per-request-task discipline (one task per datagram, one task
//! per TCP connection) and its `should_refuse_query`/`handle_*` shape,
//! simplified to the forwarding-only contract this crate implements: no
//! rate limiter, no buffer pool, no zone/UPDATE handling.

use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, warn};

use crate::core::DnsCore;
use crate::dns::{DnsMessage, RData, Record, RecordType};
use crate::error::{ResolverError, Result};
use crate::history::QueryStatus;
use crate::pipeline::{QueryContext, Stage};

const UDP_RECV_BUF: usize = 4096;
const DEFAULT_UDP_PAYLOAD: u16 = 512;
const TCP_MAX_MESSAGE: usize = u16::MAX as usize;

pub struct Listener {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    core: Arc<DnsCore>,
}

impl Listener {
    /// Binds both sockets up front so a bind failure on either one is a
    /// fatal startup error (spec §7 "Fatal startup"), never a partially
    /// running listener.
    pub async fn bind(listen_udp: &str, listen_tcp: &str, core: Arc<DnsCore>) -> Result<Self> {
        let udp = UdpSocket::bind(listen_udp)
            .await
            .map_err(|e| ResolverError::BindFailed(listen_udp.to_string(), e.to_string()))?;
        let tcp = TcpListener::bind(listen_tcp)
            .await
            .map_err(|e| ResolverError::BindFailed(listen_tcp.to_string(), e.to_string()))?;
        Ok(Listener {
            udp: Arc::new(udp),
            tcp,
            core,
        })
    }

    /// Runs the UDP and TCP accept loops concurrently until either one
    /// exits with a fatal I/O error. No query ever blocks the listener
    /// beyond the per-upstream transport timeouts (spec §4.7 state
    /// machine) since each query is dispatched onto its own task.
    pub async fn run(self) -> Result<()> {
        let Listener { udp, tcp, core } = self;

        let udp_core = core.clone();
        let udp_sock = udp.clone();
        let udp_task = tokio::spawn(run_udp(udp_sock, udp_core));
        let tcp_task = tokio::spawn(run_tcp(tcp, core));

        tokio::select! {
            res = udp_task => join_result(res)?,
            res = tcp_task => join_result(res)?,
        }
        Ok(())
    }
}

fn join_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(ResolverError::Io(format!("listener task panicked: {e}"))),
    }
}

async fn run_udp(sock: Arc<UdpSocket>, core: Arc<DnsCore>) -> Result<()> {
    let mut buf = vec![0u8; UDP_RECV_BUF];
    loop {
        let (len, peer) = match sock.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "udp recv_from failed, continuing");
                continue;
            }
        };
        let data = buf[..len].to_vec();
        let sock = sock.clone();
        let core = core.clone();
        tokio::spawn(async move {
            let Some(response) = handle_query(&core, &data, peer.ip(), Some(DEFAULT_UDP_PAYLOAD)).await else {
                return;
            };
            if let Err(e) = sock.send_to(&response, peer).await {
                error!(error = %e, peer = %peer, "failed to send udp response");
            }
        });
    }
}

async fn run_tcp(listener: TcpListener, core: Arc<DnsCore>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let core = core.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, peer, core).await {
                warn!(error = %e, peer = %peer, "tcp connection error");
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    core: Arc<DnsCore>,
) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(peer = %peer, "tcp connection closed by client");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let message_len = u16::from_be_bytes(len_buf) as usize;
        let mut message_buf = vec![0u8; message_len];
        stream.read_exact(&mut message_buf).await?;

        // TCP carries no UDP size ceiling (spec §6.1); cap only at the
        // length-prefix's own u16 range.
        let Some(response) = handle_query(&core, &message_buf, peer.ip(), None).await else {
            break;
        };
        if response.len() > TCP_MAX_MESSAGE {
            error!(peer = %peer, len = response.len(), "tcp response exceeds length-prefix range, dropping connection");
            break;
        }
        let response_len = response.len() as u16;
        stream.write_all(&response_len.to_be_bytes()).await?;
        stream.write_all(&response).await?;
        stream.flush().await?;
    }

    Ok(())
}

/// Parses, resolves, and serializes one query end to end (spec §4.7 state
/// machine: `Received -> Pipeline -> Answered`). Returns `None` only when
/// the inbound frame could not even be parsed into a DNS message — there is
/// no query id to reply against. Every other outcome, including a pipeline
/// panic, degrades to a well-formed `SERVFAIL` and is recorded in history.
async fn handle_query(
    core: &Arc<DnsCore>,
    raw: &[u8],
    peer_ip: IpAddr,
    udp_payload_limit: Option<u16>,
) -> Option<Vec<u8>> {
    let query = match DnsMessage::parse(raw) {
        Ok(q) => q,
        Err(e) => {
            debug!(error = %e, peer = %peer_ip, "dropping unparseable query");
            return None;
        }
    };

    let client_ip = extract_client_ip(&query, peer_ip);
    let ctx = QueryContext::new(client_ip);
    let pipeline = core.active_pipeline();

    let started = Instant::now();
    let outcome = AssertUnwindSafe(pipeline.resolve(&ctx, &query))
        .catch_unwind()
        .await;

    let (name, qtype) = query
        .question()
        .map(|q| (q.name.clone(), q.qtype))
        .unwrap_or_else(|| (String::new(), RecordType::A));

    let (mut reply, source, status) = match outcome {
        Ok(Ok((reply, source))) => (reply, source, QueryStatus::Ok),
        Ok(Err(e)) => {
            warn!(error = %e, name = %name, "resolve failed, replying servfail");
            (query.servfail(), "error".to_string(), QueryStatus::Error)
        }
        Err(_) => {
            error!(name = %name, "pipeline panicked, replying servfail");
            (query.servfail(), "panic".to_string(), QueryStatus::Error)
        }
    };

    core.record_query(name, qtype, source, started.elapsed(), status, client_ip);

    if let Some(limit) = udp_payload_limit {
        truncate_for_udp(&mut reply, effective_udp_limit(&query, limit));
    }

    match reply.to_wire() {
        Ok(wire) => Some(wire),
        Err(e) => {
            error!(error = %e, "failed to serialize reply, falling back to servfail");
            query.servfail().to_wire().ok()
        }
    }
}

/// Client IP extraction (spec §4.7): prefer EDNS0 Client Subnet when
/// present and not the unspecified address, else the UDP/TCP peer address.
fn extract_client_ip(query: &DnsMessage, peer_ip: IpAddr) -> IpAddr {
    match query.client_subnet() {
        Some(subnet) if !subnet.address.is_unspecified() => subnet.address,
        _ => peer_ip,
    }
}

/// The client's advertised EDNS0 buffer size if present, else the UDP
/// default of 512 bytes (RFC 1035 §2.3.4 / RFC 6891).
fn effective_udp_limit(query: &DnsMessage, default: u16) -> u16 {
    match query.edns() {
        Some(RData::Opt(opt)) if opt.udp_payload_size > 0 => opt.udp_payload_size,
        _ => default,
    }
}

/// Truncated-as-error (spec §9 "Truncated-as-error") is the chain's
/// internal failover signal; this is the *outward*-facing counterpart: a
/// UDP reply that would exceed the negotiated payload size is replaced
/// with an empty, truncated skeleton so the client retries over TCP,
/// matching the teacher's `run_udp_server` truncation handling.
fn truncate_for_udp(reply: &mut DnsMessage, limit: u16) {
    let Ok(wire) = reply.to_wire() else {
        return;
    };
    if wire.len() <= limit as usize {
        return;
    }
    reply.answer.clear();
    reply.authority.clear();
    reply.additional.retain(|r| r.rtype == RecordType::OPT);
    reply.header.truncated = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::edns::{ClientSubnet, EdnsOpt, EdnsOption, OPTION_CODE_CLIENT_SUBNET};
    use crate::dns::{Header, Question, RecordClass};
    use std::net::Ipv4Addr;

    fn base_query() -> DnsMessage {
        DnsMessage {
            header: Header {
                id: 9,
                qdcount: 1,
                recursion_desired: true,
                ..Default::default()
            },
            questions: vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn opt_record_with_subnet(addr: Ipv4Addr) -> Record {
        let mut data = vec![0x00, 0x01, 32, 0];
        data.extend_from_slice(&addr.octets());
        Record {
            name: String::new(),
            rtype: RecordType::OPT,
            rclass: RecordClass::from(4096u16),
            ttl: 0,
            rdata: RData::Opt(EdnsOpt {
                udp_payload_size: 4096,
                extended_rcode: 0,
                version: 0,
                flags: 0,
                options: vec![EdnsOption {
                    code: OPTION_CODE_CLIENT_SUBNET,
                    data,
                }],
            }),
        }
    }

    #[test]
    fn extracts_client_subnet_over_peer_when_present() {
        let mut query = base_query();
        query
            .additional
            .push(opt_record_with_subnet(Ipv4Addr::new(203, 0, 113, 9)));
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            extract_client_ip(&query, peer),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
        // `ClientSubnet` is re-exported at the crate root for pipeline stages.
        let _: Option<ClientSubnet> = query.client_subnet();
    }

    #[test]
    fn falls_back_to_peer_when_no_client_subnet() {
        let query = base_query();
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(extract_client_ip(&query, peer), peer);
    }

    #[test]
    fn falls_back_to_peer_when_client_subnet_unspecified() {
        let mut query = base_query();
        query
            .additional
            .push(opt_record_with_subnet(Ipv4Addr::UNSPECIFIED));
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(extract_client_ip(&query, peer), peer);
    }

    #[test]
    fn truncates_oversized_udp_reply() {
        let query = base_query();
        let mut reply = query.new_reply();
        for i in 0..200u32 {
            reply.answer.push(Record::new_a(
                "example.com",
                60,
                Ipv4Addr::new(10, 0, (i / 256) as u8, (i % 256) as u8),
            ));
        }
        truncate_for_udp(&mut reply, 512);
        assert!(reply.header.truncated);
        assert!(reply.answer.is_empty());
    }

    #[test]
    fn leaves_small_replies_untouched() {
        let query = base_query();
        let mut reply = query.new_reply();
        reply
            .answer
            .push(Record::new_a("example.com", 60, Ipv4Addr::new(1, 1, 1, 1)));
        truncate_for_udp(&mut reply, 512);
        assert!(!reply.header.truncated);
        assert_eq!(reply.answer.len(), 1);
    }
}
