//! Error type shared by the codec, dialers and transports.
//!
//! Every failure mode of one exchange maps onto a variant here; the FFI layer
//! renders the variant name, message and source chain into the JSON error
//! envelope, so sources are preserved rather than stringified away.

use std::io;

use thiserror::Error;

/// Boxed source for errors coming out of the TLS/QUIC/HTTP stacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("empty server")]
    EmptyServer,

    #[error("build query failed: {0}")]
    Build(String),

    #[error("pack message failed: {0}")]
    Pack(String),

    #[error("unpack message failed: {0}")]
    Unpack(String),

    #[error("dns payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("dial {address}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {address}")]
    Handshake {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("i/o deadline exceeded")]
    Timeout,

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("zero length response frame")]
    ZeroLengthFrame,

    #[error("http status {status}: {preview}")]
    BadStatus { status: u16, preview: String },

    #[error("unknown DNS server format: {0}")]
    UnknownFormat(String),

    #[error("packet conn is locked to a fixed remote address")]
    ProxyUdpAddrLocked,

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("unknown record type: {0}")]
    UnknownType(String),

    #[error("unknown record class: {0}")]
    UnknownClass(String),

    #[error("socks5 proxy: {0}")]
    Proxy(String),

    #[error("quic: {0}")]
    Quic(String),

    #[error("http exchange failed")]
    Http(#[source] BoxError),

    #[error("i/o error")]
    Io(#[from] io::Error),

    #[error("tls error")]
    Tls(#[from] rustls::Error),
}

impl DnsError {
    /// Stable kind name rendered into the `type` field of the JSON error
    /// envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            DnsError::EmptyServer => "EmptyServer",
            DnsError::Build(_) => "Build",
            DnsError::Pack(_) => "Pack",
            DnsError::Unpack(_) => "Unpack",
            DnsError::PayloadTooLarge(_) => "PayloadTooLarge",
            DnsError::Dial { .. } => "Dial",
            DnsError::Handshake { .. } => "Handshake",
            DnsError::Timeout => "Timeout",
            DnsError::ShortRead { .. } => "ShortRead",
            DnsError::ZeroLengthFrame => "ZeroLengthFrame",
            DnsError::BadStatus { .. } => "BadStatus",
            DnsError::UnknownFormat(_) => "UnknownFormat",
            DnsError::ProxyUdpAddrLocked => "ProxyUdpAddrLocked",
            DnsError::UnsupportedNetwork(_) => "UnsupportedNetwork",
            DnsError::UnsupportedScheme(_) => "UnsupportedScheme",
            DnsError::UnknownType(_) => "UnknownType",
            DnsError::UnknownClass(_) => "UnknownClass",
            DnsError::Proxy(_) => "Proxy",
            DnsError::Quic(_) => "Quic",
            DnsError::Http(_) => "Http",
            DnsError::Io(_) => "Io",
            DnsError::Tls(_) => "Tls",
        }
    }
}
