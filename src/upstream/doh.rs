//! DNS-over-HTTPS client transport (RFC 8484), GET form with the query
//! base64url-encoded in the `dns` parameter.
//!
//! If the system resolver cannot resolve the DoH endpoint's own hostname
//! (spec §4.1 "DoH" / §9 "DoH endpoint bootstrap"), a fixed
//! hostname-to-IP map for well-known providers is consulted and the request
//! retried against that IP directly, with the original hostname preserved as
//! both the TLS SNI and the `Host` header (`reqwest::ClientBuilder::resolve`
//! overrides only the connect-time address, not what is sent on the wire).

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::{Client, Url};
use tracing::{trace, warn};

use crate::dns::DnsMessage;
use crate::error::UpstreamError;

use super::{UpstreamDescriptor, UpstreamExchange, UpstreamTransport};

pub struct DohTransport;

/// Well-known DoH provider hostname -> bootstrap IP, consulted only when
/// the system resolver fails to resolve the endpoint's own hostname. A
/// pragmatic remedy, not a general bootstrap resolver (spec §9).
const BOOTSTRAP_MAP: &[(&str, &str)] = &[
    ("cloudflare-dns.com", "1.1.1.1"),
    ("dns.google", "8.8.8.8"),
    ("dns.quad9.net", "9.9.9.9"),
    ("doh.opendns.com", "208.67.222.222"),
];

fn bootstrap_ip(host: &str) -> Option<SocketAddr> {
    BOOTSTRAP_MAP
        .iter()
        .find(|(name, _)| *name == host)
        .map(|(_, ip)| format!("{ip}:443").parse().expect("bootstrap entry is a valid socket address"))
}

fn client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .use_rustls_tls()
            .build()
            .expect("reqwest client with rustls backend must build")
    })
}

/// Builds a one-off client that resolves `host` to `addr` while still
/// presenting `host` for SNI and the `Host` header, for the DoH bootstrap
/// fallback path.
fn bootstrapped_client(host: &str, addr: SocketAddr) -> Option<Client> {
    Client::builder()
        .use_rustls_tls()
        .resolve(host, addr)
        .build()
        .ok()
}

fn is_resolution_failure(err: &reqwest::Error) -> bool {
    err.is_connect()
}

#[async_trait]
impl UpstreamTransport for DohTransport {
    async fn exchange(
        &self,
        descriptor: &UpstreamDescriptor,
        query: &DnsMessage,
    ) -> Result<UpstreamExchange, UpstreamError> {
        let wire = query
            .to_wire()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(&wire);

        let started = Instant::now();
        let first_attempt = client()
            .get(&descriptor.address)
            .query(&[("dns", &encoded)])
            .header(reqwest::header::ACCEPT, "application/dns-message")
            .timeout(descriptor.timeout())
            .send()
            .await;

        let response = match first_attempt {
            Ok(response) => response,
            Err(err) if is_resolution_failure(&err) => {
                let host = Url::parse(&descriptor.address)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string));
                let retried = host
                    .as_deref()
                    .and_then(bootstrap_ip)
                    .zip(host.as_deref())
                    .and_then(|(addr, host)| bootstrapped_client(host, addr));
                match retried {
                    Some(bootstrapped) => {
                        warn!(upstream = %descriptor.name, host = ?host, "doh endpoint resolution failed, retrying via bootstrap IP");
                        bootstrapped
                            .get(&descriptor.address)
                            .query(&[("dns", &encoded)])
                            .header(reqwest::header::ACCEPT, "application/dns-message")
                            .timeout(descriptor.timeout())
                            .send()
                            .await
                            .map_err(|e| UpstreamError::Transport(e.to_string()))?
                    }
                    None => return Err(UpstreamError::Transport(err.to_string())),
                }
            }
            Err(err) => return Err(UpstreamError::Transport(err.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let rtt = started.elapsed();

        trace!(bytes = body.len(), upstream = %descriptor.name, "doh response received");
        let response = DnsMessage::parse(&body).map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        Ok(UpstreamExchange { response, rtt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_map_covers_well_known_providers() {
        assert_eq!(
            bootstrap_ip("cloudflare-dns.com"),
            Some("1.1.1.1:443".parse().unwrap())
        );
        assert_eq!(bootstrap_ip("dns.google"), Some("8.8.8.8:443".parse().unwrap()));
        assert_eq!(bootstrap_ip("unknown.example"), None);
    }
}
