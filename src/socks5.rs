//! SOCKS5 client (RFC 1928)
//!
//! Implements the client side of the protocol for the two shapes a DNS
//! exchange needs: CONNECT for stream transports and UDP ASSOCIATE for the
//! datagram path. The associate conn is deliberately locked to a single
//! remote so the UDP exchanger can treat it like a connected socket.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;

use crate::dialer::{resolve, with_deadline, BoxStream, DialOptions, Dialer, Network, PacketConn};
use crate::error::DnsError;

const SOCKS5_VERSION: u8 = 0x05;

const AUTH_NONE: u8 = 0x00;
const AUTH_USERPASS: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Dialer that routes stream dials through SOCKS5 CONNECT and packet dials
/// through UDP ASSOCIATE.
pub struct Socks5Dialer {
    proxy_addr: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl Socks5Dialer {
    /// `proxy` accepts `host:port` with or without a `socks5://` prefix.
    pub fn new(
        proxy: &str,
        username: Option<String>,
        password: Option<String>,
        options: DialOptions,
    ) -> Self {
        let proxy_addr = proxy
            .strip_prefix("socks5://")
            .unwrap_or(proxy)
            .to_string();
        // Seconds granularity, matching the proxy-side negotiation timeouts.
        let timeout = Duration::from_secs(options.timeout.as_secs().max(1));
        Self {
            proxy_addr,
            username,
            password,
            timeout,
        }
    }

    /// Connect to the proxy and run method selection plus the optional
    /// username/password sub-negotiation.
    async fn connect_proxy(&self, deadline: Instant) -> Result<TcpStream, DnsError> {
        let mut stream = with_deadline(deadline, async {
            TcpStream::connect(&self.proxy_addr)
                .await
                .map_err(|e| DnsError::Dial {
                    address: self.proxy_addr.clone(),
                    source: e,
                })
        })
        .await?;

        with_deadline(deadline, async {
            let want_auth = self.username.is_some() || self.password.is_some();
            if want_auth {
                stream
                    .write_all(&[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_USERPASS])
                    .await?;
            } else {
                stream.write_all(&[SOCKS5_VERSION, 1, AUTH_NONE]).await?;
            }

            let mut choice = [0u8; 2];
            stream.read_exact(&mut choice).await?;
            if choice[0] != SOCKS5_VERSION {
                return Err(DnsError::Proxy(format!(
                    "bad version in method select: {:#x}",
                    choice[0]
                )));
            }
            match choice[1] {
                AUTH_NONE => {}
                AUTH_USERPASS => {
                    let user = self.username.clone().unwrap_or_default();
                    let pass = self.password.clone().unwrap_or_default();
                    if user.len() > 255 || pass.len() > 255 {
                        return Err(DnsError::Proxy("username/password too long".into()));
                    }
                    let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
                    auth.push(0x01);
                    auth.push(user.len() as u8);
                    auth.extend_from_slice(user.as_bytes());
                    auth.push(pass.len() as u8);
                    auth.extend_from_slice(pass.as_bytes());
                    stream.write_all(&auth).await?;

                    let mut resp = [0u8; 2];
                    stream.read_exact(&mut resp).await?;
                    if resp[0] != 0x01 || resp[1] != 0x00 {
                        return Err(DnsError::Proxy("authentication failed".into()));
                    }
                }
                AUTH_NO_ACCEPTABLE => {
                    return Err(DnsError::Proxy("no acceptable auth method".into()))
                }
                other => {
                    return Err(DnsError::Proxy(format!(
                        "unsupported auth method: {other:#x}"
                    )))
                }
            }
            Ok(stream)
        })
        .await
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial_stream(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<BoxStream, DnsError> {
        if !network.is_stream() {
            return Err(DnsError::UnsupportedNetwork(
                "socks5 dial supports only tcp/tcp4/tcp6".into(),
            ));
        }
        let deadline = deadline.min(Instant::now() + self.timeout);
        let mut stream = self.connect_proxy(deadline).await?;

        let (host, port) = split_host_port(address)?;
        with_deadline(deadline, async {
            write_request(&mut stream, CMD_CONNECT, &host, port).await?;
            let bound = read_reply(&mut stream).await?;
            debug!("socks5 connect to {address} via {bound}");
            Ok(())
        })
        .await?;

        // The TCP stream is both the control and data channel; dropping it
        // tears the proxy session down with it.
        Ok(Box::new(stream))
    }

    async fn dial_packet(
        &self,
        network: Network,
        address: &str,
        deadline: Instant,
    ) -> Result<Box<dyn PacketConn>, DnsError> {
        if !network.is_packet() {
            return Err(DnsError::UnsupportedNetwork(
                "socks5 UDP supports only udp/udp4/udp6".into(),
            ));
        }
        let deadline = deadline.min(Instant::now() + self.timeout);
        let mut control = self.connect_proxy(deadline).await?;

        let relay = with_deadline(deadline, async {
            // Advertise an unspecified source; the proxy replies with the
            // relay address to send encapsulated datagrams to.
            let local = control.local_addr()?;
            let host = match local.ip() {
                IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.to_string(),
                IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.to_string(),
            };
            write_request(&mut control, CMD_UDP_ASSOCIATE, &host, 0).await?;
            read_reply(&mut control).await
        })
        .await?;

        // Some proxies answer with an unspecified relay IP; substitute the
        // proxy's own address.
        let relay = if relay.ip().is_unspecified() {
            let proxy_ip = control.peer_addr().map_err(DnsError::Io)?.ip();
            SocketAddr::new(proxy_ip, relay.port())
        } else {
            relay
        };

        let bind_addr = if relay.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(DnsError::Io)?;
        let remote = with_deadline(deadline, resolve(network, address)).await?;
        debug!("socks5 udp associate: relay {relay}, remote {remote}");

        Ok(Box::new(Socks5PacketConn {
            socket,
            relay,
            remote,
            _control: control,
        }))
    }

    fn proxied(&self) -> bool {
        true
    }
}

async fn write_request(
    stream: &mut TcpStream,
    cmd: u8,
    host: &str,
    port: u16,
) -> Result<(), DnsError> {
    let mut req = Vec::with_capacity(32);
    req.extend_from_slice(&[SOCKS5_VERSION, cmd, 0x00]);
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(DnsError::Proxy("target host too long".into()));
            }
            req.push(ATYP_DOMAIN);
            req.push(host.len() as u8);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;
    Ok(())
}

async fn read_reply(stream: &mut TcpStream) -> Result<SocketAddr, DnsError> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(DnsError::Proxy(format!(
            "bad reply version: {:#x}",
            head[0]
        )));
    }
    if head[1] != 0x00 {
        return Err(DnsError::Proxy(format!(
            "request failed, REP={:#x}",
            head[1]
        )));
    }
    let ip = match head[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        ATYP_DOMAIN => {
            // A bound domain is useless for the relay path; reject it.
            return Err(DnsError::Proxy("domain in reply address".into()));
        }
        other => {
            return Err(DnsError::Proxy(format!(
                "unsupported reply address type: {other:#x}"
            )))
        }
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(SocketAddr::new(ip, u16::from_be_bytes(port)))
}

fn split_host_port(address: &str) -> Result<(String, u16), DnsError> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| DnsError::Proxy(format!("invalid address: {address}")))?;
        let port = rest
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| DnsError::Proxy(format!("invalid port in: {address}")))?;
        return Ok((host.to_string(), port));
    }
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| DnsError::Proxy(format!("missing port in: {address}")))?;
    let port = port
        .parse()
        .map_err(|_| DnsError::Proxy(format!("invalid port in: {address}")))?;
    Ok((host.to_string(), port))
}

/// UDP ASSOCIATE conn locked to one remote address.
struct Socks5PacketConn {
    socket: UdpSocket,
    relay: SocketAddr,
    remote: SocketAddr,
    // Keeps the proxy's UDP mapping alive for the conn's lifetime.
    _control: TcpStream,
}

#[async_trait]
impl PacketConn for Socks5PacketConn {
    async fn send_to(&self, buf: &[u8], addr: Option<SocketAddr>) -> Result<usize, DnsError> {
        if let Some(addr) = addr {
            if addr != self.remote {
                return Err(DnsError::ProxyUdpAddrLocked);
            }
        }
        let datagram = encode_udp_datagram(self.remote, buf);
        self.socket.send_to(&datagram, self.relay).await?;
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DnsError> {
        // Relay header adds at most 22 bytes on top of the payload.
        let mut raw = vec![0u8; buf.len() + 22];
        let (n, _) = self.socket.recv_from(&mut raw).await?;
        let offset = decode_udp_header(&raw[..n])?;
        let payload = &raw[offset..n];
        if payload.len() > buf.len() {
            return Err(DnsError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "relay datagram larger than buffer",
            )));
        }
        buf[..payload.len()].copy_from_slice(payload);
        Ok((payload.len(), self.remote))
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// Wrap a payload in the UDP relay header: RSV(2) FRAG(1) ATYP ADDR PORT.
fn encode_udp_datagram(target: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(payload.len() + 22);
    datagram.extend_from_slice(&[0x00, 0x00, 0x00]);
    match target.ip() {
        IpAddr::V4(v4) => {
            datagram.push(ATYP_IPV4);
            datagram.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            datagram.push(ATYP_IPV6);
            datagram.extend_from_slice(&v6.octets());
        }
    }
    datagram.extend_from_slice(&target.port().to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

/// Validate the relay header and return the payload offset.
fn decode_udp_header(data: &[u8]) -> Result<usize, DnsError> {
    if data.len() < 4 {
        return Err(DnsError::Proxy("relay datagram too short".into()));
    }
    if data[2] != 0 {
        return Err(DnsError::Proxy("fragmented relay datagram".into()));
    }
    let offset = match data[3] {
        ATYP_IPV4 => 4 + 4 + 2,
        ATYP_IPV6 => 4 + 16 + 2,
        ATYP_DOMAIN => {
            let len = *data
                .get(4)
                .ok_or_else(|| DnsError::Proxy("relay datagram too short".into()))?
                as usize;
            4 + 1 + len + 2
        }
        other => {
            return Err(DnsError::Proxy(format!(
                "bad relay address type: {other:#x}"
            )))
        }
    };
    if data.len() < offset {
        return Err(DnsError::Proxy("relay datagram too short".into()));
    }
    Ok(offset)
}
