//! DNS over HTTPS (RFC 8484).
//!
//! The HTTP/2 connection rides on a stream obtained from the dialer, so DoH
//! works both direct and through SOCKS5. POST carries the packed query as the
//! request body; GET encodes it in the `dns` query parameter.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use log::debug;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use url::Url;

use super::{build_client_config, DohMethod, Transport, TransportOptions, TlsOptions};
use crate::dialer::{with_deadline, Dialer, Network};
use crate::error::DnsError;
use crate::message::Message;

pub(super) const MIME_DNS_MESSAGE: &str = "application/dns-message";

/// Body bytes echoed back in a bad-status error.
pub(super) const ERROR_PREVIEW_LIMIT: usize = 512;

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    let url =
        Url::parse(&options.address).map_err(|_| DnsError::UnknownFormat(options.address.clone()))?;
    if url.host_str().is_none() {
        return Err(DnsError::UnknownFormat(options.address));
    }
    Ok(Box::new(HttpsTransport {
        url,
        dialer: options.dialer,
        tls: options.tls,
        method: options.method,
        headers: options.headers,
    }))
}

struct HttpsTransport {
    url: Url,
    dialer: Arc<dyn Dialer>,
    tls: TlsOptions,
    method: DohMethod,
    headers: Vec<(String, String)>,
}

#[async_trait]
impl Transport for HttpsTransport {
    fn name(&self) -> &'static str {
        "https"
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError> {
        let payload = message.pack()?;
        let host = self.url.host_str().unwrap_or_default().to_string();
        let port = self.url.port().unwrap_or(443);
        let addr = format!("{host}:{port}");

        let stream = self
            .dialer
            .dial_stream(Network::Tcp, &addr, deadline)
            .await?;

        // ServerName defaults to the URL hostname when not overridden.
        let (config, server_name) = build_client_config(&self.tls, &host, &[b"h2"])?;
        let connector = TlsConnector::from(Arc::new(config));
        let tls_stream = with_deadline(deadline, async {
            connector
                .connect(server_name, stream)
                .await
                .map_err(|e| DnsError::Handshake {
                    address: addr.clone(),
                    source: Box::new(e),
                })
        })
        .await?;

        let (send_request, connection) = with_deadline(deadline, async {
            h2::client::handshake(tls_stream).await.map_err(http_err)
        })
        .await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("h2 connection terminated: {e}");
            }
        });

        let mut send_request =
            with_deadline(deadline, async { send_request.ready().await.map_err(http_err) }).await?;

        let (request, body) = build_doh_request(&self.url, self.method, &self.headers, &payload)?;
        debug!("doh {} {}", request.method(), request.uri());
        let (response_fut, mut request_body) = send_request
            .send_request(request, body.is_none())
            .map_err(http_err)?;
        if let Some(bytes) = body {
            request_body.send_data(bytes, true).map_err(http_err)?;
        }

        let response =
            with_deadline(deadline, async { response_fut.await.map_err(http_err) }).await?;
        let status = response.status();
        let mut body = response.into_body();
        let mut data = Vec::new();
        loop {
            let chunk = match with_deadline(deadline, async { Ok(body.data().await) }).await? {
                Some(chunk) => chunk.map_err(http_err)?,
                None => break,
            };
            let _ = body.flow_control().release_capacity(chunk.len());
            data.extend_from_slice(&chunk);
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

fn http_err(e: h2::Error) -> DnsError {
    DnsError::Http(Box::new(e))
}

/// Build the RFC 8484 request; POST returns the packed query as a body,
/// GET folds it into the `dns` parameter as unpadded base64url.
pub(super) fn build_doh_request(
    url: &Url,
    method: DohMethod,
    headers: &[(String, String)],
    payload: &[u8],
) -> Result<(http::Request<()>, Option<Bytes>), DnsError> {
    let mut builder = match method {
        DohMethod::Get => {
            let mut url = url.clone();
            url.query_pairs_mut()
                .append_pair("dns", &URL_SAFE_NO_PAD.encode(payload));
            http::Request::builder()
                .method(http::Method::GET)
                .uri(url.as_str())
        }
        DohMethod::Post => http::Request::builder()
            .method(http::Method::POST)
            .uri(url.as_str())
            .header(http::header::CONTENT_TYPE, MIME_DNS_MESSAGE),
    };
    builder = builder.header(http::header::ACCEPT, MIME_DNS_MESSAGE);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = builder.body(()).map_err(|e| DnsError::Http(Box::new(e)))?;
    let body = match method {
        DohMethod::Post => Some(Bytes::copy_from_slice(payload)),
        DohMethod::Get => None,
    };
    Ok((request, body))
}
