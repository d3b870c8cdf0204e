// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    },
    crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature},
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
    time::timeout,
};
use tokio_rustls::{TlsConnector, client::TlsStream};

use crate::{
    client::RouterEndpoint,
    error::{CollectorError, Result},
};

/// One socket to a router, plaintext (8728) or TLS (8729).
#[derive(Debug)]
pub enum RouterStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Dials the endpoint and, for TLS ports, completes the handshake. Routers
/// ship self-signed certificates, so verification is off unless
/// `tls_verify` is set.
pub async fn connect(
    endpoint: &RouterEndpoint,
    connect_timeout: Duration,
    tls_verify: bool,
) -> Result<RouterStream> {
    let addr = endpoint.addr();
    let stream = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| CollectorError::Timeout(connect_timeout))?
        .map_err(|e| CollectorError::wire(format!("connect {addr}: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| CollectorError::wire(format!("set_nodelay {addr}: {e}")))?;

    if !endpoint.use_tls {
        return Ok(RouterStream::Plain(stream));
    }

    let connector = TlsConnector::from(Arc::new(tls_client_config(tls_verify)?));
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| CollectorError::bad_request(format!("invalid host name: {e}")))?;
    let tls = timeout(connect_timeout, connector.connect(server_name, stream))
        .await
        .map_err(|_| CollectorError::Timeout(connect_timeout))?
        .map_err(|e| CollectorError::wire(format!("tls handshake {addr}: {e}")))?;
    Ok(RouterStream::Tls(Box::new(tls)))
}

fn tls_client_config(tls_verify: bool) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| CollectorError::Internal(e.into()))?;

    let cfg = if tls_verify {
        builder
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptDeviceCert {
                provider,
            }))
            .with_no_client_auth()
    };
    Ok(cfg)
}

/// Trust anchors for verified mode, taken from the platform store. Refuses
/// to build a verifier that could never accept any certificate.
fn native_roots() -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    roots.add_parsable_certificates(native.certs);
    if roots.is_empty() {
        return Err(CollectorError::Internal(anyhow::anyhow!(
            "tls_verify is set but no usable native root certificates were found"
        )));
    }
    Ok(roots)
}

/// Accepts the device's self-signed certificate while still checking the
/// handshake signatures against the negotiated scheme.
#[derive(Debug)]
struct AcceptDeviceCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptDeviceCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
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

impl AsyncRead for RouterStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RouterStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
