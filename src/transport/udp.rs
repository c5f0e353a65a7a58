//! Plain UDP exchange: one datagram out, one datagram back.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use super::{Transport, TransportOptions};
use crate::dialer::{with_deadline, Dialer, Network};
use crate::error::DnsError;
use crate::message::{Message, MAX_MESSAGE_SIZE};
use crate::scheme::classify;

/// Receive buffer size; EDNS responses can exceed the classic 512 bytes.
const RECV_BUF_SIZE: usize = 4096;

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    let (_, address) = classify(&options.address);
    Ok(Box::new(UdpTransport {
        address,
        dialer: options.dialer,
    }))
}

struct UdpTransport {
    address: String,
    dialer: Arc<dyn Dialer>,
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError> {
        let payload = message.pack()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::PayloadTooLarge(payload.len()));
        }

        let conn = self
            .dialer
            .dial_packet(Network::Udp, &self.address, deadline)
            .await?;
        with_deadline(deadline, conn.send_to(&payload, None)).await?;

        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let (n, from) = with_deadline(deadline, conn.recv_from(&mut buf)).await?;
        debug!("udp exchange with {}: {} bytes in", from, n);

        Message::unpack(&buf[..n])
    }
}
