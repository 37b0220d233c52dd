// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, io};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    client::ClientParams,
    codec,
    device::{Device, DeviceContext, DeviceId},
    frame::{tcp::*, *},
    transport::reconnect::Connect,
    Result,
};

use super::{no_response_expected, TransactionIds};

/// Modbus TCP client
pub(crate) struct Client<T> {
    framed: Option<Framed<T, codec::tcp::ClientCodec>>,
    connector: Option<Box<dyn Connect<T>>>,
    device_id: DeviceId,
    params: ClientParams,
    transaction_ids: TransactionIds,
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.framed.is_some())
            .field("device_id", &self.device_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, device: Device, params: ClientParams) -> Self {
        let framed = Framed::new(transport, codec::tcp::ClientCodec::default());
        Self {
            framed: Some(framed),
            connector: None,
            device_id: device.into(),
            params,
            transaction_ids: TransactionIds::default(),
        }
    }

    /// Install a connector used to re-establish the connection after it
    /// has been lost. Without one, a lost connection makes all further
    /// calls fail.
    pub(crate) fn with_connector(mut self, connector: Box<dyn Connect<T>>) -> Self {
        self.connector = Some(connector);
        self
    }

    async fn ensure_connected(&mut self) -> io::Result<()> {
        if self.framed.is_some() {
            return Ok(());
        }
        let Some(connector) = self.connector.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection lost",
            ));
        };
        log::debug!("Reconnecting");
        let transport = connector.connect().await?;
        self.framed = Some(Framed::new(transport, codec::tcp::ClientCodec::default()));
        Ok(())
    }

    pub(crate) async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        log::debug!("Call {request:?}");
        self.ensure_connected().await?;

        let no_response = no_response_expected(&request, self.device_id);
        let transaction_id = self.transaction_ids.acquire();
        let request_adu = RequestAdu {
            hdr: Header {
                transaction_id,
                device_id: self.device_id,
            },
            pdu: request.into_owned().into(),
        };

        let result = self.transact(request_adu, no_response).await;
        self.transaction_ids.release(transaction_id);
        if result.is_err() {
            // In-flight state of a broken connection is meaningless;
            // reconnect on the next call.
            self.framed = None;
        }
        result
    }

    async fn transact(
        &mut self,
        request_adu: RequestAdu<'static>,
        no_response: bool,
    ) -> Result<Response> {
        let request_hdr = request_adu.hdr;
        let ClientParams { timeout, retries } = self.params;
        for attempt in 0..=retries {
            if attempt > 0 {
                log::warn!("Request {request_hdr:?} timed out, retry {attempt}/{retries}");
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
            match tokio::time::timeout(timeout, Self::recv_matching(framed, request_hdr)).await {
                Ok(result) => return result,
                Err(_elapsed) => continue,
            }
        }
        log::warn!("Request {request_hdr:?} unanswered after {retries} retries");
        Ok(Err(ExceptionCode::GatewayTargetDevice))
    }

    async fn recv_matching(
        framed: &mut Framed<T, codec::tcp::ClientCodec>,
        request_hdr: Header,
    ) -> Result<Response> {
        loop {
            let response_adu = framed
                .next()
                .await
                .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::BrokenPipe)))?;
            if response_adu.hdr.transaction_id != request_hdr.transaction_id
                || (request_hdr.device_id != 0
                    && response_adu.hdr.device_id != request_hdr.device_id)
            {
                log::warn!(
                    "Discarding response with mismatched header: expected/request = {request_hdr:?}, actual/response = {:?}",
                    response_adu.hdr
                );
                continue;
            }
            return Ok(response_adu.pdu.0.map_err(|response| response.exception()));
        }
    }

    pub(crate) async fn disconnect(&mut self) -> io::Result<()> {
        self.connector = None;
        match self.framed.take() {
            Some(framed) => codec::disconnect_framed(framed).await,
            None => Ok(()),
        }
    }
}

impl<T> DeviceContext for Client<T> {
    fn set_device(&mut self, device: Device) {
        self.device_id = device.into();
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
