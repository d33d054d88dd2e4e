//! The two network endpoints: plaintext HTTP for the pairing bootstrap
//! and mutual-TLS HTTPS for the full catalog.
//!
//! Both listeners run their own accept loop so each connection's local and
//! remote addresses (and, on HTTPS, the TLS peer certificate) can be
//! attached to requests as an `Extension` before axum sees them. The TLS
//! layer accepts any presented client certificate; authorization is
//! decided here, after the handshake, against the client store, so
//! known-but-unauthorized clients receive an XML 401 document instead of
//! a dropped connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::api;
use crate::clients::NamedCertificate;
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Which endpoint a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Https,
}

/// Per-connection context attached to every request.
#[derive(Clone)]
pub struct ConnInfo {
    pub transport: Transport,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    /// The store entry matched during the TLS handshake, when any.
    pub client: Option<Arc<NamedCertificate>>,
}

/// Run the plaintext listener. Returns only on a fatal bind error.
pub async fn run_http(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.bind_address, state.config.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(format!("couldn't bind HTTP on {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "HTTP listener started");

    let router = api::http_router(state.clone());

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP accept failed");
                continue;
            }
        };

        let conn = ConnInfo {
            transport: Transport::Http,
            local_addr: stream.local_addr().unwrap_or(local_addr),
            remote_addr,
            client: None,
        };
        let svc = router.clone().layer(Extension(conn));

        tokio::spawn(async move {
            serve_connection(stream, svc).await;
        });
    }
}

/// Run the mutual-TLS listener. Returns only on a fatal bind or TLS
/// configuration error.
pub async fn run_https(state: Arc<AppState>) -> Result<()> {
    let tls_config = build_tls_config(&state)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let addr = format!("{}:{}", state.config.bind_address, state.config.https_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(format!("couldn't bind HTTPS on {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "HTTPS listener started");

    let router = api::https_router(state.clone());
    let handshake_timeout = Duration::from_secs(state.config.tls_handshake_timeout_secs);

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "HTTPS accept failed");
                continue;
            }
        };

        let state = state.clone();
        let router = router.clone();
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let local_addr = stream.local_addr().unwrap_or(local_addr);

            let tls_stream =
                match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => tls_stream,
                    Ok(Err(e)) => {
                        tracing::debug!(peer = %remote_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(peer = %remote_addr, "TLS handshake timed out");
                        return;
                    }
                };

            let client = match peer_certificate(&tls_stream) {
                Some(der) => {
                    let matched = state.verify_peer(&der).await;
                    match &matched {
                        Some(cert) => {
                            tracing::info!(device = %cert.name, peer = %remote_addr, "client verified")
                        }
                        None => {
                            let subject =
                                beamcast_core::crypto::x509::subject_string(&der)
                                    .unwrap_or_else(|_| "unknown".to_string());
                            tracing::info!(%subject, peer = %remote_addr, "client denied");
                        }
                    }
                    matched
                }
                None => {
                    tracing::info!(peer = %remote_addr, "no peer certificate presented");
                    None
                }
            };

            let conn = ConnInfo {
                transport: Transport::Https,
                local_addr,
                remote_addr,
                client,
            };
            serve_connection(tls_stream, router.layer(Extension(conn))).await;
        });
    }
}

fn peer_certificate(
    tls_stream: &tokio_rustls::server::TlsStream<TcpStream>,
) -> Option<Vec<u8>> {
    tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
}

async fn serve_connection<I>(io: I, router: axum::Router)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(router);
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        tracing::debug!(error = %e, "error serving connection");
    }
}

fn build_tls_config(state: &AppState) -> Result<rustls::ServerConfig> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut state.identity.cert_pem.as_bytes())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ServerError::Tls(format!("invalid server certificate: {e}")))?;

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut state.identity.key_pem.as_bytes())
            .map_err(|e| ServerError::Tls(format!("invalid server key: {e}")))?
            .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

    let verifier = Arc::new(DeferredClientVerifier::new());
    let mut config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

/// Requires a client certificate but accepts whatever is presented.
///
/// The authorization decision happens after the handshake so the server
/// can answer unknown clients with an XML 401 document on an established
/// connection rather than aborting the TCP stream mid-handshake.
#[derive(Debug)]
struct DeferredClientVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl DeferredClientVerifier {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider().into(),
        }
    }
}

impl ClientCertVerifier for DeferredClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
