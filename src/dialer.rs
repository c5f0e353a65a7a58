//! Dialer abstraction
//!
//! A dialer is the connection factory a transport uses to reach its server:
//! a stream dial for TCP-based exchanges and a packet dial for UDP. Two
//! implementations exist, the direct OS-socket dialer below and the SOCKS5
//! dialer in `socks5`. Transports hold a `dyn Dialer` and never care which.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::Instant;

use crate::error::DnsError;

/// Byte stream returned by a stream dial.
pub trait StreamConn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamConn for T {}

impl std::fmt::Debug for dyn StreamConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<stream>")
    }
}

pub type BoxStream = Box<dyn StreamConn>;

/// Network selector, mirroring the `tcp`/`tcp4`/`tcp6` and `udp`/`udp4`/
/// `udp6` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    pub fn is_packet(&self) -> bool {
        !self.is_stream()
    }

    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp4 | Network::Udp4 => addr.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => addr.is_ipv6(),
            _ => true,
        }
    }
}

/// Knobs shared by both dialers.
#[derive(Debug, Clone, Copy)]
pub struct DialOptions {
    /// Connection establishment timeout. The SOCKS5 dialer also derives its
    /// per-phase handshake timeouts from this, at seconds granularity.
    pub timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Run one I/O stage under the exchange deadline, surfacing expiry as a
/// timeout error rather than whatever the aborted stage would report.
pub(crate) async fn with_deadline<T>(
    deadline: Instant,
    fut: impl std::future::Future<Output = Result<T, DnsError>>,
) -> Result<T, DnsError> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(DnsError::Timeout),
    }
}

/// Single-target datagram conversation returned by a packet dial.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Send one datagram. `addr` may be omitted for the fixed remote; a
    /// SOCKS5-backed conn rejects any other address.
    async fn send_to(&self, buf: &[u8], addr: Option<SocketAddr>) -> Result<usize, DnsError>;

    /// Receive one datagram, reporting the remote it came from.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DnsError>;

    /// The fixed remote this conversation is bound to.
    fn remote_addr(&self) -> SocketAddr;
}

/// Unified stream + packet connection factory.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_stream(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<BoxStream, DnsError>;

    async fn dial_packet(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<Box<dyn PacketConn>, DnsError>;

    /// Whether connections go through a proxy. QUIC-based transports refuse
    /// proxied dialers since they manage their own UDP socket.
    fn proxied(&self) -> bool {
        false
    }
}

/// Resolve `address` and pick the first candidate matching the network's
/// address family.
pub(crate) async fn resolve(network: Network, address: &str) -> Result<SocketAddr, DnsError> {
    let candidates = lookup_host(address).await.map_err(|e| DnsError::Dial {
        address: address.to_string(),
        source: e,
    })?;
    candidates
        .into_iter()
        .find(|a| network.accepts(a))
        .ok_or_else(|| DnsError::Dial {
            address: address.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no matching address"),
        })
}

/// Plain OS-socket dialer.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    options: DialOptions,
}

impl DirectDialer {
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial_stream(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<BoxStream, DnsError> {
        if !network.is_stream() {
            return Err(DnsError::UnsupportedNetwork(format!(
                "stream dial does not support {}",
                network.as_str()
            )));
        }
        // Honour both the exchange deadline and the configured connect timeout.
        let deadline = deadline.min(Instant::now() + self.options.timeout);
        let addr = with_deadline(deadline, resolve(network, address)).await?;
        let stream = with_deadline(deadline, async {
            TcpStream::connect(addr).await.map_err(|e| DnsError::Dial {
                address: address.to_string(),
                source: e,
            })
        })
        .await?;
        Ok(Box::new(stream))
    }

    async fn dial_packet(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<Box<dyn PacketConn>, DnsError> {
        if !network.is_packet() {
            return Err(DnsError::UnsupportedNetwork(format!(
                "packet dial does not support {}",
                network.as_str()
            )));
        }
        let remote = with_deadline(deadline, resolve(network, address)).await?;
        let bind_addr = if remote.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| DnsError::Dial {
            address: address.to_string(),
            source: e,
        })?;
        // Connect so write/read act as a single-target conversation.
        socket.connect(remote).await.map_err(|e| DnsError::Dial {
            address: address.to_string(),
            source: e,
        })?;
        Ok(Box::new(DirectPacketConn { socket, remote }))
    }
}

struct DirectPacketConn {
    socket: UdpSocket,
    remote: SocketAddr,
}

#[async_trait]
impl PacketConn for DirectPacketConn {
    async fn send_to(&self, buf: &[u8], addr: Option<SocketAddr>) -> Result<usize, DnsError> {
        if let Some(addr) = addr {
            if addr != self.remote {
                return Err(DnsError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "udp socket is connected to a different remote",
                )));
            }
        }
        Ok(self.socket.send(buf).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DnsError> {
        let n = self.socket.recv(buf).await?;
        Ok((n, self.remote))
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}
