// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server

use std::{future::Future, io, net::SocketAddr};

use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    frame::{tcp::*, DeviceRequest, ExceptionResponse, OptionalResponsePdu},
};

use super::Service;

/// Accept an incoming connection unconditionally, creating the service
/// instance with the given factory.
///
/// Convenience helper for the common case where neither the peer address
/// nor the transport need any special treatment. The factory may return
/// `Ok(None)` to reject the connection.
pub fn accept_tcp_connection<S, NewService>(
    stream: TcpStream,
    socket_addr: SocketAddr,
    new_service: NewService,
) -> io::Result<Option<(S, TcpStream)>>
where
    S: Service,
    NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
{
    let service = new_service(socket_addr)?;
    Ok(service.map(|service| (service, stream)))
}

/// A Modbus TCP server accepting connections on a bound listener.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Attach the Modbus server to a TCP socket server.
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Create a server bound to the given address with a configured
    /// socket (address reuse, moderate backlog).
    pub fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::new(listener(socket_addr, 1024)?))
    }

    /// Listen for incoming connections and serve each of them with its
    /// own service instance. `on_connected` decides per connection
    /// whether it is accepted and which service handles it;
    /// `on_process_error` observes connection processing failures.
    pub async fn serve<S, T, F, OnConnected, OnProcessError>(
        &self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
    ) -> io::Result<()>
    where
        S: Service + Send + Sync + 'static,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        loop {
            let (stream, socket_addr) = self.listener.accept().await?;
            log::debug!("Accepted connection from {socket_addr}");

            let Some((service, transport)) = on_connected(stream, socket_addr).await? else {
                log::debug!("Connection from {socket_addr} rejected");
                continue;
            };
            let on_process_error = on_process_error.clone();

            tokio::spawn(async move {
                let framed = Framed::new(transport, codec::tcp::ServerCodec::default());
                if let Err(err) = process(framed, service).await {
                    on_process_error(err);
                }
            });
        }
    }

    /// Serve incoming connections until the shutdown signal completes.
    pub async fn serve_until<S, T, F, X, OnConnected, OnProcessError>(
        self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
        shutdown_signal: X,
    ) -> io::Result<()>
    where
        S: Service + Send + Sync + 'static,
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        X: Future<Output = ()> + Sync + Send + Unpin + 'static,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(io::Error) + Clone + Send + 'static,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve(on_connected, on_process_error) => res,
            () = &mut shutdown_signal => {
                log::trace!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

/// The request-response loop spawned for each accepted connection.
async fn process<S, T>(
    mut framed: Framed<T, codec::tcp::ServerCodec>,
    service: S,
) -> io::Result<()>
where
    S: Service,
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(request) = framed.next().await else {
            log::debug!("Connection closed");
            break;
        };
        let request = request?;

        let hdr = request.hdr;
        let function = request.pdu.0.function_code();
        let broadcast = hdr.device_id == 0;
        let device_request: DeviceRequest<'static> = request.into();

        let response: OptionalResponsePdu = match service.call(device_request.into()).await {
            Ok(response) => response.into(),
            Err(exception) => ExceptionResponse {
                function,
                exception: exception.into(),
            }
            .into(),
        };

        if broadcast {
            log::debug!("Suppressing response to broadcast request {hdr:?}");
            continue;
        }
        match response.0 {
            Some(pdu) => framed.send(ResponseAdu { hdr, pdu }).await?,
            None => log::debug!("No response for request {hdr:?}"),
        }
    }
    Ok(())
}

/// Start TCP listener - configure and open TCP socket
fn listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let listener = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    listener.set_reuse_address(true)?;
    listener.set_nonblocking(true)?;
    listener.bind(&addr.into())?;
    listener.listen(backlog)?;
    TcpListener::from_std(listener.into())
}
