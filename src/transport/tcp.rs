//! DNS over TCP (RFC 1035 §4.2.2): two-byte length prefix framing.
//!
//! The frame helpers here are shared with the DoT transport, which runs the
//! same framing over a TLS stream.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::{Transport, TransportOptions};
use crate::dialer::{with_deadline, Dialer, Network};
use crate::error::DnsError;
use crate::message::{Message, MAX_MESSAGE_SIZE};
use crate::scheme::classify;

pub(super) fn new_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    let (_, address) = classify(&options.address);
    Ok(Box::new(TcpTransport {
        address,
        dialer: options.dialer,
    }))
}

struct TcpTransport {
    address: String,
    dialer: Arc<dyn Dialer>,
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError> {
        let payload = message.pack()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DnsError::PayloadTooLarge(payload.len()));
        }

        let mut stream = self
            .dialer
            .dial_stream(Network::Tcp, &self.address, deadline)
            .await?;

        with_deadline(deadline, write_frame(&mut stream, &payload)).await?;
        let response = with_deadline(deadline, read_frame(&mut stream)).await?;
        Message::unpack(&response)
    }
}

/// Write one `[u16 BE length][payload]` frame.
pub(super) async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), DnsError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let len = (payload.len() as u16).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; a zero-length frame is an error.
pub(super) async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>, DnsError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| map_short_read(e, 2))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(DnsError::ZeroLengthFrame);
    }
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| map_short_read(e, len))?;
    Ok(payload)
}

fn map_short_read(err: io::Error, expected: usize) -> DnsError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DnsError::ShortRead { expected, got: 0 }
    } else {
        DnsError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(256);
        write_frame(&mut client, b"hello").await.unwrap();
        let frame = read_frame(&mut server).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn zero_length_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(&[0, 0]).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, DnsError::ZeroLengthFrame));
    }

    #[tokio::test]
    async fn truncated_frame_is_short_read() {
        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, DnsError::ShortRead { expected: 10, .. }));
    }
}
