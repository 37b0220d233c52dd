// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server

use std::{future::Future, io};

use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec::{self, PduLengths},
    frame::{rtu::*, DeviceRequest, ExceptionResponse, OptionalResponsePdu},
};

use super::Service;

/// A Modbus RTU server answering requests on a single serial line.
#[derive(Debug)]
pub struct Server<T> {
    transport: T,
    pdu_lengths: PduLengths,
}

impl<T> Server<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Attach the Modbus server to a serial transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pdu_lengths: PduLengths::default(),
        }
    }

    /// Extend the frame length tables for custom function codes.
    #[must_use]
    pub fn with_pdu_lengths(mut self, pdu_lengths: PduLengths) -> Self {
        self.pdu_lengths = pdu_lengths;
        self
    }

    /// Serve requests until the transport is closed or fails.
    pub async fn serve<S>(self, service: S) -> io::Result<()>
    where
        S: Service,
    {
        let framed = Framed::new(
            self.transport,
            codec::rtu::ServerCodec::with_pdu_lengths(self.pdu_lengths),
        );
        process(framed, service).await
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

/// Open a serial port and attach an RTU server to it.
#[cfg(feature = "serial")]
pub fn new_from_builder(
    builder: &tokio_serial::SerialPortBuilder,
) -> io::Result<Server<tokio_serial::SerialStream>> {
    Ok(Server::new(tokio_serial::SerialStream::open(builder)?))
}

/// The request-response loop of the serial line.
async fn process<S, T>(
    mut framed: Framed<T, codec::rtu::ServerCodec>,
    service: S,
) -> io::Result<()>
where
    S: Service,
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(request) = framed.next().await else {
            log::debug!("Serial line closed");
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
