//! Transport layer
//!
//! One transport per server scheme, all implementing the same `Transport`
//! trait. The factory maps a scheme-qualified address onto a constructor from
//! the process-wide registry and optionally wraps the result in the EDNS(0)
//! client-subnet decorator. Transports live for a single exchange; they hold
//! configuration, not connections.

pub mod h3;
pub mod https;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use ipnet::IpNet;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::time::Instant;
use url::Url;

use crate::dialer::Dialer;
use crate::error::DnsError;
use crate::message::Message;

/// Client certificate chain plus key for mutual TLS.
#[derive(Debug)]
pub struct ClientCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// TLS parameterisation shared by DoT, DoH, DoQ and DoH3.
#[derive(Debug, Default)]
pub struct TlsOptions {
    /// Explicit SNI / certificate name. When unset it is derived from the
    /// server address; an IP-literal host then disables verification.
    pub server_name: Option<String>,
    /// Skip certificate verification even for hostname servers.
    pub insecure_skip_verify: bool,
    /// ALPN protocols; empty means the transport's default.
    pub alpn: Vec<Vec<u8>>,
    /// Extra trust anchors on top of the platform roots.
    pub extra_roots: Vec<CertificateDer<'static>>,
    pub client_cert: Option<ClientCert>,
}

/// RFC 8484 request encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DohMethod {
    #[default]
    Post,
    Get,
}

/// Everything a transport constructor needs for one exchange.
pub struct TransportOptions {
    /// Scheme-qualified server address (`udp://host:port`, DoH URL, ...).
    pub address: String,
    pub dialer: Arc<dyn Dialer>,
    /// Valid prefix enables the ECS decorator.
    pub client_subnet: Option<IpNet>,
    pub tls: TlsOptions,
    pub method: DohMethod,
    /// Extra HTTP headers merged verbatim into DoH/DoH3 requests.
    pub headers: Vec<(String, String)>,
}

impl TransportOptions {
    pub fn new(address: impl Into<String>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            address: address.into(),
            dialer,
            client_subnet: None,
            tls: TlsOptions::default(),
            method: DohMethod::default(),
            headers: Vec::new(),
        }
    }
}

/// One DNS exchange over a particular wire format.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn start(&self) -> Result<(), DnsError> {
        Ok(())
    }

    fn reset(&self) {}

    fn close(&self) -> Result<(), DnsError> {
        Ok(())
    }

    /// Whether the transport carries raw DNS messages.
    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, deadline: Instant, message: Message) -> Result<Message, DnsError>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type Constructor = fn(TransportOptions) -> Result<Box<dyn Transport>, DnsError>;

/// Registry populated once at first use; read-only afterwards.
fn registry() -> &'static HashMap<&'static str, Constructor> {
    static REGISTRY: OnceLock<HashMap<&'static str, Constructor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, Constructor> = HashMap::new();
        map.insert("udp", udp::new_transport);
        map.insert("tcp", tcp::new_transport);
        map.insert("tls", tls::new_transport);
        map.insert("https", https::new_transport);
        map.insert("quic", quic::new_transport);
        map.insert("doq", quic::new_transport);
        map.insert("https3", h3::new_transport);
        map.insert("http3", h3::new_transport);
        map.insert("h3", h3::new_transport);
        map
    })
}

/// Instantiate the transport matching `options.address`.
///
/// Lookup order: exact address key, URL scheme, then a `<key>://` prefix
/// probe over the registry. A valid client-subnet prefix wraps the transport
/// in the ECS decorator.
pub fn create_transport(options: TransportOptions) -> Result<Box<dyn Transport>, DnsError> {
    let reg = registry();
    let mut ctor = reg.get(options.address.as_str()).copied();
    if ctor.is_none() {
        if let Ok(url) = Url::parse(&options.address) {
            ctor = reg.get(url.scheme()).copied();
        }
    }
    if ctor.is_none() {
        ctor = reg
            .iter()
            .find(|(key, _)| {
                options.address.len() > key.len() + 2
                    && options.address.starts_with(*key)
                    && options.address[key.len()..].starts_with("://")
            })
            .map(|(_, c)| *c);
    }
    let Some(ctor) = ctor else {
        return Err(DnsError::UnknownFormat(options.address));
    };

    let subnet = options.client_subnet;
    let transport = ctor(options)?;
    Ok(match subnet {
        Some(subnet) => Box::new(EcsTransport {
            inner: transport,
            subnet,
        }),
        None => transport,
    })
}

/// Decorator guaranteeing every outgoing query carries the client subnet.
struct EcsTransport {
    inner: Box<dyn Transport>,
    subnet: IpNet,
}

#[async_trait]
impl Transport for EcsTransport {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn start(&self) -> Result<(), DnsError> {
        self.inner.start()
    }

    fn reset(&self) {
        self.inner.reset()
    }

    fn close(&self) -> Result<(), DnsError> {
        self.inner.close()
    }

    fn raw(&self) -> bool {
        self.inner.raw()
    }

    async fn exchange(&self, deadline: Instant, mut message: Message) -> Result<Message, DnsError> {
        message.ensure_ecs(&self.subnet);
        self.inner.exchange(deadline, message).await
    }
}

/// Host portion of a `host:port` / `[v6]:port` address.
pub(crate) fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    }
}

/// SNI and verification policy for a transport's TLS client.
///
/// An explicit server name wins and keeps verification on; otherwise the
/// host decides: hostnames verify against platform roots, IP literals (and a
/// missing host) fall back to an unverified handshake, as an IP rarely
/// matches a certificate name.
pub(crate) fn derive_tls_identity(opts: &TlsOptions, host: &str) -> (String, bool) {
    if let Some(name) = opts.server_name.as_deref().filter(|s| !s.is_empty()) {
        return (name.to_string(), opts.insecure_skip_verify);
    }
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        let sni = if host.is_empty() { "0.0.0.0" } else { host };
        return (sni.to_string(), true);
    }
    (host.to_string(), opts.insecure_skip_verify)
}

/// Build the rustls client config plus the `ServerName` to connect with.
pub(crate) fn build_client_config(
    opts: &TlsOptions,
    host: &str,
    default_alpn: &[&[u8]],
) -> Result<(rustls::ClientConfig, ServerName<'static>), DnsError> {
    let (sni, insecure) = derive_tls_identity(opts, host);
    let server_name = ServerName::try_from(sni.clone()).map_err(|e| DnsError::Handshake {
        address: host.to_string(),
        source: Box::new(e),
    })?;

    let builder = rustls::ClientConfig::builder();
    let builder = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify::new()))
    } else {
        let mut roots = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            roots.add(cert).ok();
        }
        for cert in &opts.extra_roots {
            roots.add(cert.clone()).ok();
        }
        builder.with_root_certificates(roots)
    };

    let mut config = match &opts.client_cert {
        Some(cert) => builder.with_client_auth_cert(cert.chain.clone(), cert.key.clone_key())?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = if opts.alpn.is_empty() {
        default_alpn.iter().map(|p| p.to_vec()).collect()
    } else {
        opts.alpn.clone()
    };
    Ok((config, server_name))
}

/// Certificate verifier that accepts any peer; signatures are still checked.
#[derive(Debug)]
struct NoVerify(rustls::crypto::CryptoProvider);

impl NoVerify {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider())
    }
}

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
