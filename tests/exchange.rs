//! End-to-end exchange tests against in-process mock resolvers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;

use dnsprobe::client::{execute, QueryRequest};
use dnsprobe::dialer::{DialOptions, DirectDialer};
use dnsprobe::message::{Message, Rdata, Record, CLASS_IN, TYPE_A, TYPE_AAAA};
use dnsprobe::transport::{create_transport, Transport, TransportOptions};
use dnsprobe::DnsError;

/// Canned answer for a query: echoes the id and question, QR/RA set.
fn answer_for(query: &Message) -> Message {
    let mut response = query.clone();
    response.header.response = true;
    response.header.recursion_available = true;
    let question = &query.questions[0];
    let rdata = match question.qtype {
        TYPE_AAAA => Rdata::Aaaa(Ipv6Addr::new(0x2606, 0x2800, 0x220, 0x1, 0, 0, 0, 0x1946)),
        _ => Rdata::A(Ipv4Addr::new(93, 184, 216, 34)),
    };
    response.answers.push(Record {
        name: question.name.clone(),
        rtype: question.qtype,
        rclass: question.qclass,
        ttl: 300,
        rdata,
    });
    response
}

/// One-shot UDP resolver; sends the parsed query back over the channel.
async fn spawn_udp_resolver(captured: Option<oneshot::Sender<Message>>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
        let query = Message::unpack(&buf[..n]).unwrap();
        let response = answer_for(&query).pack().unwrap();
        socket.send_to(&response, peer).await.unwrap();
        if let Some(tx) = captured {
            let _ = tx.send(query);
        }
    });
    addr
}

async fn read_tcp_query(stream: &mut (impl AsyncReadExt + Unpin)) -> Message {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut payload = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    Message::unpack(&payload).unwrap()
}

async fn write_tcp_response(stream: &mut (impl AsyncWriteExt + Unpin), response: &Message) {
    let payload = response.pack().unwrap();
    stream
        .write_all(&(payload.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&payload).await.unwrap();
}

/// One-shot TCP resolver with RFC 1035 framing.
async fn spawn_tcp_resolver() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let query = read_tcp_query(&mut stream).await;
        write_tcp_response(&mut stream, &answer_for(&query)).await;
    });
    addr
}

#[tokio::test]
async fn udp_exchange_returns_a_record() {
    let addr = spawn_udp_resolver(None).await;
    let request = QueryRequest::new(addr.to_string(), "example.com");
    let outcome = execute(&request).await.unwrap();

    assert!(outcome.message.header.response);
    assert_eq!(outcome.message.header.rcode, 0);
    let answer = &outcome.message.answers[0];
    assert_eq!(answer.rtype, TYPE_A);
    assert!(answer.result_text().parse::<Ipv4Addr>().is_ok());
    assert!(outcome.rtt > Duration::ZERO);
}

#[tokio::test]
async fn tcp_exchange_returns_aaaa_record() {
    let addr = spawn_tcp_resolver().await;
    let mut request = QueryRequest::new(format!("tcp://{addr}"), "example.com");
    request.qtype = "AAAA".into();
    let outcome = execute(&request).await.unwrap();

    assert_eq!(outcome.message.header.rcode, 0);
    let answer = &outcome.message.answers[0];
    assert_eq!(answer.rtype, TYPE_AAAA);
    assert!(answer.result_text().parse::<Ipv6Addr>().is_ok());
}

#[tokio::test]
async fn response_id_matches_query_id() {
    let (tx, rx) = oneshot::channel();
    let addr = spawn_udp_resolver(Some(tx)).await;
    let request = QueryRequest::new(addr.to_string(), "example.com");
    let outcome = execute(&request).await.unwrap();
    let seen = rx.await.unwrap();
    assert_eq!(outcome.message.header.id, seen.header.id);
}

#[tokio::test]
async fn ecs_request_carries_exactly_one_subnet_option() {
    use dnsprobe::message::EDNS_OPTION_SUBNET;

    let (tx, rx) = oneshot::channel();
    let addr = spawn_udp_resolver(Some(tx)).await;
    let mut request = QueryRequest::new(addr.to_string(), "example.com");
    request.client_subnet = Some("1.2.3.0/24".into());
    execute(&request).await.unwrap();

    let seen = rx.await.unwrap();
    let opt = seen.edns().expect("query carries an OPT record");
    let Rdata::Opt(options) = &opt.rdata else {
        panic!("opt rdata");
    };
    let subnet: Vec<_> = options
        .iter()
        .filter(|o| o.code == EDNS_OPTION_SUBNET)
        .collect();
    assert_eq!(subnet.len(), 1);
    // family=1, netmask=24, scope=0, address 1.2.3.0
    assert_eq!(subnet[0].data, vec![0, 1, 24, 0, 1, 2, 3, 0]);
}

#[tokio::test]
async fn zero_length_tcp_frame_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_tcp_query(&mut stream).await;
        stream.write_all(&[0, 0]).await.unwrap();
    });

    let request = QueryRequest::new(format!("tcp://{addr}"), "example.com");
    let err = execute(&request).await.unwrap_err();
    assert!(matches!(err, DnsError::ZeroLengthFrame));
}

#[tokio::test]
async fn deadline_elapses_as_timeout() {
    // Accepts and then goes silent; the exchange must give up at the
    // deadline, not at the TCP layer's leisure.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = [0u8; 1024];
        loop {
            if stream.read(&mut sink).await.unwrap_or(0) == 0 {
                break;
            }
        }
    });

    let dialer = Arc::new(DirectDialer::new(DialOptions {
        timeout: Duration::from_secs(5),
    }));
    let transport = create_transport(TransportOptions::new(format!("tcp://{addr}"), dialer)).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let started = std::time::Instant::now();
    let err = transport
        .exchange(deadline, Message::query("example.com", "A", "IN").unwrap())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, DnsError::Timeout), "got {err:?}");
    assert!(
        elapsed < Duration::from_millis(400),
        "timeout took {elapsed:?}"
    );
}

#[tokio::test]
async fn dot_exchange_with_ip_host_uses_insecure_handshake() {
    // Self-signed server; the client dials an IP literal with no SNI
    // override, which switches verification off and must still succeed.
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_chain = vec![rustls::pki_types::CertificateDer::from(
        cert.cert.der().to_vec(),
    )];
    let key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der()).unwrap();
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(stream).await.unwrap();
        let query = read_tcp_query(&mut tls).await;
        write_tcp_response(&mut tls, &answer_for(&query)).await;
        tls.shutdown().await.ok();
    });

    let request = QueryRequest::new(format!("tls://{addr}"), "example.com");
    let outcome = execute(&request).await.unwrap();
    assert_eq!(outcome.message.header.rcode, 0);
    assert_eq!(outcome.message.answers[0].rtype, TYPE_A);
}

/// Minimal SOCKS5 server: no auth, CONNECT and single-round-trip UDP
/// ASSOCIATE, enough to drive the dialer end to end.
async fn spawn_socks5_proxy() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = serve_socks5(stream).await;
            });
        }
    });
    addr
}

async fn serve_socks5(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[5, 0]).await?;

    let mut req = [0u8; 4];
    stream.read_exact(&mut req).await?;
    let target = match req[3] {
        1 => {
            let mut b = [0u8; 6];
            stream.read_exact(&mut b).await?;
            SocketAddr::from((
                [b[0], b[1], b[2], b[3]],
                u16::from_be_bytes([b[4], b[5]]),
            ))
        }
        _ => {
            // The tests only dial IPv4 literals.
            return Ok(());
        }
    };

    match req[1] {
        // CONNECT
        1 => {
            let mut upstream = TcpStream::connect(target).await?;
            stream
                .write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
                .await?;
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        }
        // UDP ASSOCIATE
        3 => {
            let relay = UdpSocket::bind("127.0.0.1:0").await?;
            let relay_addr = relay.local_addr().unwrap();
            let [p0, p1] = relay_addr.port().to_be_bytes();
            stream
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, p0, p1])
                .await?;

            // Relay one request/response pair.
            let mut buf = [0u8; 2048];
            let (n, client) = relay.recv_from(&mut buf).await?;
            // RSV(2) FRAG(1) ATYP(1) ADDR(4) PORT(2), IPv4 only
            let target = SocketAddr::from((
                [buf[4], buf[5], buf[6], buf[7]],
                u16::from_be_bytes([buf[8], buf[9]]),
            ));
            let upstream = UdpSocket::bind("127.0.0.1:0").await?;
            upstream.send_to(&buf[10..n], target).await?;
            let mut resp = [0u8; 2048];
            let (m, _) = upstream.recv_from(&mut resp).await?;
            let mut packet = buf[..10].to_vec();
            packet.extend_from_slice(&resp[..m]);
            relay.send_to(&packet, client).await?;

            // Hold the control connection until the client drops it.
            let mut sink = [0u8; 16];
            let _ = stream.read(&mut sink).await;
        }
        _ => {}
    }
    Ok(())
}

#[tokio::test]
async fn tcp_exchange_through_socks5_connect() {
    let dns_addr = spawn_tcp_resolver().await;
    let proxy_addr = spawn_socks5_proxy().await;

    let mut request = QueryRequest::new(format!("tcp://{dns_addr}"), "example.com");
    request.socks5 = Some(format!("socks5://{proxy_addr}"));
    let outcome = execute(&request).await.unwrap();
    assert_eq!(outcome.message.header.rcode, 0);
    assert_eq!(outcome.message.answers[0].rtype, TYPE_A);
}

#[tokio::test]
async fn udp_exchange_through_socks5_associate() {
    let dns_addr = spawn_udp_resolver(None).await;
    let proxy_addr = spawn_socks5_proxy().await;

    let mut request = QueryRequest::new(format!("udp://{dns_addr}"), "example.com");
    request.socks5 = Some(proxy_addr.to_string());
    let outcome = execute(&request).await.unwrap();
    assert_eq!(outcome.message.header.rcode, 0);
    assert_eq!(outcome.message.answers[0].rtype, TYPE_A);
}

#[tokio::test]
async fn quic_schemes_refuse_socks5() {
    let mut request = QueryRequest::new("quic://127.0.0.1:8853", "example.com");
    request.socks5 = Some("127.0.0.1:1080".into());
    let err = execute(&request).await.unwrap_err();
    assert!(matches!(err, DnsError::UnsupportedNetwork(_)));
}
