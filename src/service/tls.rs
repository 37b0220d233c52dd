// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, io};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    client::ClientParams,
    codec,
    device::{Device, DeviceContext},
    frame::{tls::*, *},
    Result,
};

use super::no_response_expected;

/// Modbus/TCP Security client
///
/// A TLS record carries a bare PDU without transaction or device id;
/// requests are strictly serialized and responses are correlated by
/// arrival order. The secured channel itself authenticates the peer.
pub(crate) struct Client<T> {
    framed: Option<Framed<T, codec::tls::ClientCodec>>,
    device: Device,
    params: ClientParams,
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.framed.is_some())
            .field("device", &self.device)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, device: Device, params: ClientParams) -> Self {
        let framed = Framed::new(transport, codec::tls::ClientCodec::default());
        Self {
            framed: Some(framed),
            device,
            params,
        }
    }

    pub(crate) async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        log::debug!("Call {request:?}");
        let no_response = no_response_expected(&request, self.device.into());
        let request_adu = RequestAdu {
            hdr: Header,
            pdu: request.into_owned().into(),
        };

        let result = self.transact(request_adu, no_response).await;
        if result.is_err() {
            self.framed = None;
        }
        result
    }

    async fn transact(
        &mut self,
        request_adu: RequestAdu<'static>,
        no_response: bool,
    ) -> Result<Response> {
        let ClientParams { timeout, retries } = self.params;
        for attempt in 0..=retries {
            if attempt > 0 {
                log::warn!("Request timed out, retry {attempt}/{retries}");
            }
            let framed = self
                .framed
                .as_mut()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
            framed.read_buffer_mut().clear();
            framed.send(request_adu.clone()).await?;
            if no_response {
                return Ok(Ok(Response::NoResponseExpected));
            }
            match tokio::time::timeout(timeout, Self::recv_response(framed)).await {
                Ok(result) => return result,
                Err(_elapsed) => continue,
            }
        }
        log::warn!("Request unanswered after {retries} retries");
        Ok(Err(ExceptionCode::GatewayTargetDevice))
    }

    async fn recv_response(framed: &mut Framed<T, codec::tls::ClientCodec>) -> Result<Response> {
        let response_adu = framed
            .next()
            .await
            .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::BrokenPipe)))?;
        Ok(response_adu.pdu.0.map_err(|response| response.exception()))
    }

    pub(crate) async fn disconnect(&mut self) -> io::Result<()> {
        match self.framed.take() {
            Some(framed) => codec::disconnect_framed(framed).await,
            None => Ok(()),
        }
    }
}

impl<T> DeviceContext for Client<T> {
    fn set_device(&mut self, device: Device) {
        self.device = device;
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        Client::call(self, request).await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        Client::disconnect(self).await
    }
}
