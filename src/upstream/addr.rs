//! Upstream address scheme detection (spec §6.2).

use super::Transport;

/// Parsed upstream address: the transport to use and the host/port or URL
/// to dial. `raw` is the normalized, scheme-less-where-possible form used
/// when persisting configuration back to disk (legacy `udp:`/`tcp:` prefixes
/// are accepted on ingest but never written back out).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAddress {
    pub transport: Transport,
    pub endpoint: String,
}

pub fn parse(address: &str, declared_transport: Option<Transport>) -> ParsedAddress {
    if let Some(rest) = address.strip_prefix("udp://") {
        return ParsedAddress {
            transport: Transport::Udp,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("tcp://") {
        return ParsedAddress {
            transport: Transport::Tcp,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("tls://") {
        return ParsedAddress {
            transport: Transport::Dot,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("dot://") {
        return ParsedAddress {
            transport: Transport::Dot,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("quic://") {
        return ParsedAddress {
            transport: Transport::Doq,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("doq://") {
        return ParsedAddress {
            transport: Transport::Doq,
            endpoint: rest.to_string(),
        };
    }
    if address.starts_with("https://") {
        return ParsedAddress {
            transport: Transport::Doh,
            endpoint: address.to_string(),
        };
    }
    // Legacy `udp:host:port` / `tcp:host:port` — normalize to scheme-less form.
    if let Some(rest) = address.strip_prefix("udp:") {
        return ParsedAddress {
            transport: Transport::Udp,
            endpoint: rest.to_string(),
        };
    }
    if let Some(rest) = address.strip_prefix("tcp:") {
        return ParsedAddress {
            transport: Transport::Tcp,
            endpoint: rest.to_string(),
        };
    }

    // Bare `host:port`: default UDP, unless an explicit transport was
    // declared, unless the port is 853 (well-known DoT port).
    let transport = declared_transport.unwrap_or_else(|| {
        if address.rsplit(':').next() == Some("853") {
            Transport::Dot
        } else {
            Transport::Udp
        }
    });
    ParsedAddress {
        transport,
        endpoint: address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_scheme_prefixed_transports() {
        assert_eq!(parse("udp://1.1.1.1:53", None).transport, Transport::Udp);
        assert_eq!(parse("tcp://1.1.1.1:53", None).transport, Transport::Tcp);
        assert_eq!(parse("tls://1.1.1.1:853", None).transport, Transport::Dot);
        assert_eq!(parse("dot://1.1.1.1:853", None).transport, Transport::Dot);
        assert_eq!(
            parse("quic://1.1.1.1:853", None).transport,
            Transport::Doq
        );
        assert_eq!(
            parse("https://dns.google/dns-query", None).transport,
            Transport::Doh
        );
    }

    #[test]
    fn defaults_bare_host_port_to_udp_unless_port_853() {
        assert_eq!(parse("1.1.1.1:53", None).transport, Transport::Udp);
        assert_eq!(parse("1.1.1.1:853", None).transport, Transport::Dot);
    }

    #[test]
    fn normalizes_legacy_scheme_prefix() {
        let parsed = parse("udp:1.1.1.1:53", None);
        assert_eq!(parsed.transport, Transport::Udp);
        assert_eq!(parsed.endpoint, "1.1.1.1:53");
    }
}
