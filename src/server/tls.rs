// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus/TCP Security server
//!
//! Accepts TLS connections and exchanges bare PDUs, one per record.
//! Since the secured wire format carries no device id, every request is
//! dispatched to the reserved direct device id 0xFF and broadcasts do
//! not exist.

use std::{
    fs::File,
    future::Future,
    io::{self, BufReader},
    net::SocketAddr,
    path::Path,
    sync::Arc,
};

use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{
    rustls::{
        self,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
    TlsAcceptor,
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    frame::{tls::*, DeviceRequest, ExceptionResponse, OptionalResponsePdu},
};

use super::Service;

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found"))
}

/// Build a TLS acceptor from PEM encoded server certificate chain and
/// private key files.
pub fn acceptor_from_pem(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A Modbus/TCP Security server.
pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Attach the Modbus server to a TCP socket server and TLS acceptor.
    #[must_use]
    pub fn new(listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { listener, acceptor }
    }

    /// Listen for incoming connections and serve each of them with a
    /// service created by `new_service`; returning `Ok(None)` rejects
    /// the connection.
    pub async fn serve<S, NewService, OnProcessError>(
        &self,
        new_service: &NewService,
        on_process_error: OnProcessError,
    ) -> io::Result<()>
    where
        S: Service + Send + Sync + 'static,
        NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        loop {
            let (stream, socket_addr) = self.listener.accept().await?;
            log::debug!("Accepted connection from {socket_addr}");

            let Some(service) = new_service(socket_addr)? else {
                log::debug!("Connection from {socket_addr} rejected");
                continue;
            };
            let acceptor = self.acceptor.clone();
            let on_process_error = on_process_error.clone();

            tokio::spawn(async move {
                let result = match acceptor.accept(stream).await {
                    Ok(transport) => {
                        let framed =
                            Framed::new(transport, codec::tls::ServerCodec::default());
                        process(framed, service).await
                    }
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    on_process_error(err);
                }
            });
        }
    }

    /// Serve incoming connections until the shutdown signal completes.
    pub async fn serve_until<S, X, NewService, OnProcessError>(
        self,
        new_service: &NewService,
        on_process_error: OnProcessError,
        shutdown_signal: X,
    ) -> io::Result<()>
    where
        S: Service + Send + Sync + 'static,
        X: Future<Output = ()> + Sync + Send + Unpin + 'static,
        NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve(new_service, on_process_error) => res,
            () = &mut shutdown_signal => {
                log::trace!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

/// The request-response loop spawned for each accepted connection.
async fn process<S>(
    mut framed: Framed<tokio_rustls::server::TlsStream<TcpStream>, codec::tls::ServerCodec>,
    service: S,
) -> io::Result<()>
where
    S: Service,
{
    loop {
        let Some(request) = framed.next().await else {
            log::debug!("Connection closed");
            break;
        };
        let request = request?;

        let hdr = request.hdr;
        let function = request.pdu.0.function_code();
        let device_request: DeviceRequest<'static> = request.into();

        let response: OptionalResponsePdu = match service.call(device_request.into()).await {
            Ok(response) => response.into(),
            Err(exception) => ExceptionResponse {
                function,
                exception: exception.into(),
            }
            .into(),
        };

        match response.0 {
            Some(pdu) => framed.send(ResponseAdu { hdr, pdu }).await?,
            None => log::debug!("No response for request"),
        }
    }
    Ok(())
}
