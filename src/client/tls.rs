// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus/TCP Security client connections
//!
//! The wire format is a bare PDU per TLS record, protected by TLSv1.2 or
//! newer. Following common field practice, server certificate
//! verification is disabled by default; supply a CA certificate via
//! [`TlsOptions`] to enable it.

use std::{
    fmt,
    fs::File,
    io::{self, BufReader},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{
        self,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
        DigitallySignedStruct,
    },
    TlsConnector,
};

use super::*;

/// TLS connection options.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Path to the PEM encoded CA certificate(s) used to verify the
    /// server. Without one, server certificate verification is disabled.
    pub ca_cert: Option<PathBuf>,
    /// Paths to the PEM encoded client certificate chain and private
    /// key for mutual TLS.
    pub client_cert: Option<(PathBuf, PathBuf)>,
}

fn load_certs(path: &std::path::Path) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &std::path::Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found"))
}

fn invalid_input(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn client_config(options: &TlsOptions) -> io::Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(invalid_input)?;
    let builder = match &options.ca_cert {
        Some(ca_path) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert).map_err(invalid_input)?;
            }
            builder.with_root_certificates(roots)
        }
        None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider))),
    };
    match &options.client_cert {
        Some((cert_path, key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_key(key_path)?)
            .map_err(invalid_input),
        None => Ok(builder.with_no_client_auth()),
    }
}

/// Establish a secured connection to a Modbus/TCP Security server.
pub async fn connect(socket_addr: SocketAddr, domain: &str) -> io::Result<Context> {
    connect_device(
        socket_addr,
        domain,
        &TlsOptions::default(),
        Device::tcp_device(),
        ClientParams::default(),
    )
    .await
}

/// Like [`connect`] with explicit options, device and transaction
/// parameters.
pub async fn connect_device(
    socket_addr: SocketAddr,
    domain: &str,
    options: &TlsOptions,
    device: Device,
    params: ClientParams,
) -> io::Result<Context> {
    let config = client_config(options)?;
    let connector = TlsConnector::from(Arc::new(config));
    let stream = TcpStream::connect(socket_addr).await?;
    let domain = ServerName::try_from(domain.to_owned())
        .map_err(|_| invalid_input("invalid DNS name"))?;
    let transport = connector.connect(domain, stream).await?;
    Ok(attach_device_with(transport, device, params))
}

/// Attach a new client context to an established secured transport.
pub fn attach_device_with<T>(transport: T, device: Device, params: ClientParams) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let client = crate::service::tls::Client::new(transport, device, params);
    Context {
        client: Box::new(client),
    }
}
