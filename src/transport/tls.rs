//! DNS over TLS (RFC 7858): TCP length-prefix framing inside a TLS stream.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use super::tcp::{read_frame, write_frame};
use super::{build_client_config, host_part, Transport, TransportOptions, TlsOptions};
use crate::dialer::{with_deadline, Dialer, Network};
use crate::error::DnsError;
use crate::message::{Message, MAX_MESSAGE_SIZE};
use crate::scheme::classify;

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    let (_, address) = classify(&options.address);
    Ok(Box::new(TlsTransport {
        address,
        dialer: options.dialer,
        tls: options.tls,
    }))
}

struct TlsTransport {
    address: String,
    dialer: Arc<dyn Dialer>,
    tls: TlsOptions,
}

#[async_trait]
impl Transport for TlsTransport {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError> {
        let payload = message.pack()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::PayloadTooLarge(payload.len()));
        }

        let stream = self
            .dialer
            .dial_stream(Network::Tcp, &self.address, deadline)
            .await?;

        let (config, server_name) =
            build_client_config(&self.tls, host_part(&self.address), &[])?;
        debug!("dot handshake with {} as {:?}", self.address, server_name);
        let connector = TlsConnector::from(Arc::new(config));
        let mut tls_stream = with_deadline(deadline, async {
            connector
                .connect(server_name, stream)
                .await
                .map_err(|e| DnsError::Handshake {
                    address: self.address.clone(),
                    source: Box::new(e),
                })
        })
        .await?;

        with_deadline(deadline, write_frame(&mut tls_stream, &payload)).await?;
        let response = with_deadline(deadline, read_frame(&mut tls_stream)).await?;
        Message::unpack(&response)
    }
}
