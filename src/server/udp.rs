// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus UDP server

use std::{future::Future, io, net::SocketAddr};

use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

use crate::{
    codec,
    frame::{tcp::*, DeviceRequest, ExceptionResponse, OptionalResponsePdu},
};

use super::Service;

/// A Modbus UDP server answering one datagram per request, directed at
/// the sender address. The wire format is the same MBAP framing as
/// Modbus TCP.
#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
}

impl Server {
    /// Attach the Modbus server to a bound UDP socket.
    #[must_use]
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Create a server bound to the given address.
    pub async fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::new(UdpSocket::bind(socket_addr).await?))
    }

    /// Serve requests until the socket fails.
    pub async fn serve<S>(self, service: S) -> io::Result<()>
    where
        S: Service,
    {
        let mut framed = UdpFramed::new(self.socket, codec::tcp::ServerCodec::default());
        loop {
            let Some(request) = framed.next().await else {
                break;
            };
            let (request, peer_addr) = match request {
                Ok(request) => request,
                Err(err) => {
                    // A malformed datagram must not take the server down.
                    log::warn!("Failed to decode datagram: {err}");
                    continue;
                }
            };

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
                Some(pdu) => framed.send((ResponseAdu { hdr, pdu }, peer_addr)).await?,
                None => log::debug!("No response for request {hdr:?}"),
            }
        }
        Ok(())
    }

    /// Serve requests until the shutdown signal completes.
    pub async fn serve_until<S, X>(self, service: S, shutdown_signal: X) -> io::Result<()>
    where
        S: Service,
        X: Future<Output = ()> + Sync + Send + Unpin + 'static,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve(service) => res,
            () = &mut shutdown_signal => {
                log::trace!("Shutdown signal received");
                Ok(())
            }
        }
    }
}
