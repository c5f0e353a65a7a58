//! Server string classification.
//!
//! The scheme prefix of the `server` argument selects the wire transport.
//! A bare `host:port` is treated as plain UDP.

/// Wire transport selected by the server string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
    Https3,
}

impl Scheme {
    /// Canonical prefix used when rebuilding a scheme-qualified address.
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Udp => "udp://",
            Scheme::Tcp => "tcp://",
            Scheme::Tls => "tls://",
            Scheme::Https => "https://",
            Scheme::Quic => "quic://",
            Scheme::Https3 => "https3://",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Udp => "udp",
            Scheme::Tcp => "tcp",
            Scheme::Tls => "tls",
            Scheme::Https => "https",
            Scheme::Quic => "quic",
            Scheme::Https3 => "https3",
        }
    }
}

// Prefixes are tested in declaration order; aliases map onto one tag.
const PREFIXES: &[(&str, Scheme)] = &[
    ("udp://", Scheme::Udp),
    ("tcp://", Scheme::Tcp),
    ("tls://", Scheme::Tls),
    ("https://", Scheme::Https),
    ("quic://", Scheme::Quic),
    ("doq://", Scheme::Quic),
    ("https3://", Scheme::Https3),
    ("http3://", Scheme::Https3),
    ("h3://", Scheme::Https3),
];

/// Classify a server string into a scheme tag and a normalized address.
///
/// The recognised prefix is stripped, yielding `host:port` for the socket
/// schemes; DoH and DoH3 keep the full URL since the path matters. An
/// unrecognised prefix falls back to UDP with the original string.
pub fn classify(server: &str) -> (Scheme, String) {
    for (prefix, scheme) in PREFIXES {
        if let Some(rest) = server.strip_prefix(prefix) {
            let address = match scheme {
                Scheme::Https | Scheme::Https3 => server.to_string(),
                _ => rest.to_string(),
            };
            return (*scheme, address);
        }
    }
    (Scheme::Udp, server.to_string())
}
