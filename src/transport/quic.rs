//! DNS over QUIC (RFC 9250)
//!
//! One bidirectional stream per query, carrying the same 2-octet length
//! framing as DNS over TCP. ALPN is `doq`; the on-wire message id must be 0,
//! so the original id is restored on the response before it is returned.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use super::{build_client_config, derive_tls_identity, host_part, Transport, TransportOptions, TlsOptions};
use crate::dialer::{resolve, with_deadline, Network};
use crate::error::DnsError;
use crate::message::{Message, MAX_MESSAGE_SIZE};
use crate::scheme::classify;

const DOQ_ALPN: &[u8] = b"doq";

/// DOQ_NO_ERROR from RFC 9250 §4.3.
const DOQ_NO_ERROR: u32 = 0x0;

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    if options.dialer.proxied() {
        return Err(DnsError::UnsupportedNetwork(
            "quic transports manage their own socket and cannot use a socks5 proxy".into(),
        ));
    }
    let (_, address) = classify(&options.address);
    Ok(Box::new(QuicTransport {
        address,
        tls: options.tls,
    }))
}

struct QuicTransport {
    address: String,
    tls: TlsOptions,
}

#[async_trait]
impl Transport for QuicTransport {
    fn name(&self) -> &'static str {
        "quic"
    }

    async fn exchange(&self, deadline: Instant, mut message: Message) -> Result<Message, DnsError> {
        // RFC 9250 §4.2.1: the message id on the wire must be zero.
        let query_id = message.header.id;
        message.header.id = 0;

        let payload = message.pack()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::PayloadTooLarge(payload.len()));
        }

        let remote = with_deadline(deadline, resolve(Network::Udp, &self.address)).await?;
        let host = host_part(&self.address);
        let (crypto, _) = build_client_config(&self.tls, host, &[DOQ_ALPN])?;
        let (sni, _) = derive_tls_identity(&self.tls, host);

        let client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| DnsError::Quic(e.to_string()))?,
        ));
        let bind = if remote.is_ipv6() {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };
        let endpoint = quinn::Endpoint::client(bind).map_err(|e| DnsError::Dial {
            address: self.address.clone(),
            source: e,
        })?;

        debug!("doq connect to {} (sni {})", remote, sni);
        let connecting =
            endpoint
                .connect_with(client_config, remote, &sni)
                .map_err(|e| DnsError::Handshake {
                    address: self.address.clone(),
                    source: Box::new(e),
                })?;
        let connection = with_deadline(deadline, async {
            connecting.await.map_err(|e| DnsError::Handshake {
                address: self.address.clone(),
                source: Box::new(e),
            })
        })
        .await?;

        let (mut send, mut recv) = with_deadline(deadline, async {
            connection
                .open_bi()
                .await
                .map_err(|e| DnsError::Quic(e.to_string()))
        })
        .await?;

        let mut frame = Vec::with_capacity(payload.len() + 2);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&payload);
        with_deadline(deadline, async {
            send.write_all(&frame)
                .await
                .map_err(|e| DnsError::Quic(e.to_string()))
        })
        .await?;
        send.finish().map_err(|e| DnsError::Quic(e.to_string()))?;

        let mut len_buf = [0u8; 2];
        with_deadline(deadline, async {
            recv.read_exact(&mut len_buf)
                .await
                .map_err(|e| DnsError::Quic(e.to_string()))
        })
        .await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(DnsError::ZeroLengthFrame);
        }
        let mut body = vec![0u8; len];
        with_deadline(deadline, async {
            recv.read_exact(&mut body)
                .await
                .map_err(|e| DnsError::Quic(e.to_string()))
        })
        .await?;

        connection.close(DOQ_NO_ERROR.into(), b"");

        let mut response = Message::unpack(&body)?;
        response.header.id = query_id;
        Ok(response)
    }
}
