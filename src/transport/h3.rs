//! DNS over HTTP/3.
//!
//! Same request/response semantics as the DoH transport, carried over an
//! HTTP/3 session with ALPN `h3`. The `https3`/`http3`/`h3` scheme aliases
//! are folded back into an `https` URL for request construction.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use tokio::time::Instant;
use url::Url;

use super::https::{build_doh_request, ERROR_PREVIEW_LIMIT};
use super::{build_client_config, derive_tls_identity, DohMethod, Transport, TransportOptions, TlsOptions};
use crate::dialer::{resolve, with_deadline, Network};
use crate::error::DnsError;
use crate::message::Message;

const H3_ALPN: &[u8] = b"h3";

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    if options.dialer.proxied() {
        return Err(DnsError::UnsupportedNetwork(
            "quic transports manage their own socket and cannot use a socks5 proxy".into(),
        ));
    }
    let rewritten = ["https3://", "http3://", "h3://"]
        .iter()
        .find_map(|prefix| {
            options
                .address
                .strip_prefix(prefix)
                .map(|rest| format!("https://{rest}"))
        })
        .unwrap_or_else(|| options.address.clone());
    let url = Url::parse(&rewritten).map_err(|_| DnsError::UnknownFormat(options.address.clone()))?;
    if url.host_str().is_none() {
        return Err(DnsError::UnknownFormat(options.address));
    }
    Ok(Box::new(H3Transport {
        url,
        tls: options.tls,
        method: options.method,
        headers: options.headers,
    }))
}

struct H3Transport {
    url: Url,
    tls: TlsOptions,
    method: DohMethod,
    headers: Vec<(String, String)>,
}

#[async_trait]
impl Transport for H3Transport {
    fn name(&self) -> &'static str {
        "https3"
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError> {
        let payload = message.pack()?;
        let host = self.url.host_str().unwrap_or_default().to_string();
        let port = self.url.port().unwrap_or(443);
        let addr = format!("{host}:{port}");

        let remote = with_deadline(deadline, resolve(Network::Udp, &addr)).await?;
        let (crypto, _) = build_client_config(&self.tls, &host, &[H3_ALPN])?;
        let (sni, _) = derive_tls_identity(&self.tls, &host);

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
            address: addr.clone(),
            source: e,
        })?;

        debug!("doh3 connect to {} (sni {})", remote, sni);
        let connecting =
            endpoint
                .connect_with(client_config, remote, &sni)
                .map_err(|e| DnsError::Handshake {
                    address: addr.clone(),
                    source: Box::new(e),
                })?;
        let connection = with_deadline(deadline, async {
            connecting.await.map_err(|e| DnsError::Handshake {
                address: addr.clone(),
                source: Box::new(e),
            })
        })
        .await?;

        let h3_conn = h3_quinn::Connection::new(connection);
        let (mut driver, mut send_request): (
            h3::client::Connection<h3_quinn::Connection, Bytes>,
            h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>,
        ) = with_deadline(deadline, async {
            h3::client::new(h3_conn).await.map_err(h3_err)
        })
        .await?;
        tokio::spawn(async move {
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });

        let (request, body) = build_doh_request(&self.url, self.method, &self.headers, &payload)?;
        debug!("doh3 {} {}", request.method(), request.uri());
        let mut stream = with_deadline(deadline, async {
            send_request.send_request(request).await.map_err(h3_err)
        })
        .await?;
        if let Some(bytes) = body {
            with_deadline(deadline, async {
                stream.send_data(bytes).await.map_err(h3_err)
            })
            .await?;
        }
        with_deadline(deadline, async { stream.finish().await.map_err(h3_err) }).await?;

        let response = with_deadline(deadline, async {
            stream.recv_response().await.map_err(h3_err)
        })
        .await?;
        let status = response.status();

        let mut data = BytesMut::new();
        loop {
            let chunk = match with_deadline(deadline, async {
                stream.recv_data().await.map_err(h3_err)
            })
            .await?
            {
                Some(chunk) => chunk,
                None => break,
            };
            data.put(chunk);
            if status != http::StatusCode::OK && data.len() >= ERROR_PREVIEW_LIMIT {
                break;
            }
        }

        if status != http::StatusCode::OK {
            let preview_len = data.len().min(ERROR_PREVIEW_LIMIT);
            return Err(DnsError::BadStatus {
                status: status.as_u16(),
                preview: String::from_utf8_lossy(&data[..preview_len]).into_owned(),
            });
        }
        Message::unpack(&data)
    }
}

fn h3_err<E>(e: E) -> DnsError
where
    E: std::error::Error + Send + Sync + 'static,
{
    DnsError::Http(Box::new(e))
}
