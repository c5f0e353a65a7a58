//! Request orchestrator
//!
//! Wires the pieces together for exactly one exchange: classify the server
//! string, build the query, pick the dialer and deadline, instantiate the
//! transport through the factory and measure the round trip. No retries, no
//! fallback across transports.

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use log::{debug, warn};
use serde::Deserialize;
use tokio::time::Instant;

use crate::dialer::{DialOptions, Dialer, DirectDialer};
use crate::error::DnsError;
use crate::message::Message;
use crate::scheme::{classify, Scheme};
use crate::socks5::Socks5Dialer;
use crate::transport::{create_transport, DohMethod, TlsOptions, TransportOptions};

/// One query, as it arrives over the FFI or CLI surface.
///
/// `qtype` defaults to `A` and `qclass` to `IN` when empty. The JSON entry
/// point deserializes straight into this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub server: String,
    pub qname: String,
    #[serde(default)]
    pub qtype: String,
    #[serde(default)]
    pub qclass: String,
    /// SOCKS5 proxy, with or without the `socks5://` prefix.
    #[serde(default)]
    pub socks5: Option<String>,
    /// Explicit TLS server name override.
    #[serde(default)]
    pub sni: Option<String>,
    /// EDNS(0) client subnet in CIDR form.
    #[serde(default)]
    pub client_subnet: Option<String>,
    /// RFC 8484 method for DoH/DoH3: `post` (default) or `get`.
    #[serde(default)]
    pub http_method: Option<String>,
}

impl QueryRequest {
    pub fn new(server: impl Into<String>, qname: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            qname: qname.into(),
            ..Self::default()
        }
    }
}

/// Decoded response plus the observed round-trip time.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub message: Message,
    pub rtt: Duration,
}

/// Encrypted transports get a little longer to cover their handshakes.
fn timeout_for(scheme: Scheme) -> Duration {
    match scheme {
        Scheme::Tls | Scheme::Https | Scheme::Quic | Scheme::Https3 => Duration::from_secs(7),
        Scheme::Udp | Scheme::Tcp => Duration::from_secs(5),
    }
}

/// Perform one DNS exchange described by `request`.
pub async fn execute(request: &QueryRequest) -> Result<QueryOutcome, DnsError> {
    if request.server.is_empty() {
        return Err(DnsError::EmptyServer);
    }
    let (scheme, address) = classify(&request.server);
    let message = Message::query(&request.qname, &request.qtype, &request.qclass)?;

    let timeout = timeout_for(scheme);
    let deadline = Instant::now() + timeout;

    let proxy = request
        .socks5
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let dialer: Arc<dyn Dialer> = match proxy {
        Some(proxy) => Arc::new(Socks5Dialer::new(proxy, None, None, DialOptions { timeout })),
        None => Arc::new(DirectDialer::new(DialOptions { timeout })),
    };

    // Scheme-qualified address for the factory. DoH keeps the caller's URL;
    // the QUIC/H3 aliases are normalized by their constructors.
    let server_addr = match scheme {
        Scheme::Https | Scheme::Https3 => address,
        _ => format!("{}{}", scheme.prefix(), address),
    };

    let client_subnet = parse_client_subnet(request.client_subnet.as_deref());
    let tls = TlsOptions {
        server_name: request.sni.clone().filter(|s| !s.is_empty()),
        ..TlsOptions::default()
    };
    let method = match request.http_method.as_deref() {
        Some(m) if m.eq_ignore_ascii_case("get") => DohMethod::Get,
        _ => DohMethod::Post,
    };

    let mut options = TransportOptions::new(server_addr, dialer);
    options.client_subnet = client_subnet;
    options.tls = tls;
    options.method = method;

    let transport = create_transport(options)?;
    transport.start()?;
    debug!(
        "exchange via {} to {} (id {})",
        transport.name(),
        request.server,
        message.header.id
    );

    let started = std::time::Instant::now();
    let result = transport.exchange(deadline, message).await;
    let rtt = started.elapsed();
    let _ = transport.close();

    let message = result?;
    debug!("exchange done in {:?}, rcode {}", rtt, message.header.rcode);
    Ok(QueryOutcome { message, rtt })
}

/// The decorator must only be installed for a prefix that parses; anything
/// else is dropped with a warning rather than silently sent on the wire.
fn parse_client_subnet(text: Option<&str>) -> Option<IpNet> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }
    match text.parse::<IpNet>() {
        Ok(prefix) => Some(prefix),
        Err(e) => {
            warn!("ignoring invalid client subnet {text:?}: {e}");
            None
        }
    }
}
