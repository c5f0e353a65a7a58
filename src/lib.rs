//! dnsprobe: multi-transport DNS client with a C ABI
//!
//! Performs one DNS query exchange against a server whose address scheme
//! selects the wire transport - plain UDP, TCP, DNS over TLS (RFC 7858),
//! DNS over HTTPS (RFC 8484), DNS over QUIC (RFC 9250) or DNS over HTTP/3 -
//! optionally tunneled through a SOCKS5 proxy, and returns the decoded
//! response plus measured RTT as a compact JSON document. Supports EDNS(0)
//! Client Subnet injection and an explicit TLS server name override.
//!
//! ## As a library
//!
//! ```rust,no_run
//! use dnsprobe::client::{execute, QueryRequest};
//! use dnsprobe::render::render;
//!
//! # async fn example() {
//! let mut request = QueryRequest::new("tls://1.1.1.1:853", "example.com");
//! request.sni = Some("cloudflare-dns.com".into());
//! println!("{}", render(execute(&request).await));
//! # }
//! ```
//!
//! ## From C
//!
//! ```c
//! char *result = dns_request("https://dns.google/dns-query",
//!                            "example.com", "A", "IN", NULL, NULL);
//! // ... parse the JSON ...
//! free_string(result);
//! ```
//!
//! Connections live for exactly one exchange; there is no caching, no
//! retrying and no fallback across transports.

pub mod client;
pub mod dialer;
pub mod error;
pub mod ffi;
pub mod message;
pub mod render;
pub mod scheme;
pub mod socks5;
pub mod transport;

// Re-export the facade types
pub use client::{execute, QueryOutcome, QueryRequest};
pub use dialer::{DialOptions, Dialer, DirectDialer};
pub use error::DnsError;
pub use message::Message;
pub use render::render;
pub use scheme::{classify, Scheme};
pub use socks5::Socks5Dialer;
pub use transport::{create_transport, DohMethod, TlsOptions, Transport, TransportOptions};
