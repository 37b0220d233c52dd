// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt, io,
    net::SocketAddr,
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

use crate::{
    client::ClientParams,
    codec,
    device::{Device, DeviceContext, DeviceId},
    frame::{tcp::*, *},
    Result,
};

use super::{no_response_expected, TransactionIds};

/// Modbus UDP client
///
/// Connectionless: a single socket carries all requests to the server
/// and responses are multiplexed by transaction id. The wire format is
/// the same MBAP framing as Modbus TCP, one ADU per datagram.
pub(crate) struct Client {
    framed: UdpFramed<codec::tcp::ClientCodec>,
    server_addr: SocketAddr,
    device_id: DeviceId,
    params: ClientParams,
    transaction_ids: TransactionIds,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server_addr", &self.server_addr)
            .field("device_id", &self.device_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) async fn connect(
        server_addr: SocketAddr,
        device: Device,
        params: ClientParams,
    ) -> io::Result<Self> {
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        let framed = UdpFramed::new(socket, codec::tcp::ClientCodec::default());
        Ok(Self {
            framed,
            server_addr,
            device_id: device.into(),
            params,
            transaction_ids: TransactionIds::default(),
        })
    }

    pub(crate) async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        log::debug!("Call {request:?}");
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
            self.framed
                .send((request_adu.clone(), self.server_addr))
                .await?;
            if no_response {
                return Ok(Ok(Response::NoResponseExpected));
            }
            let recv = Self::recv_matching(&mut self.framed, self.server_addr, request_hdr);
            match tokio::time::timeout(timeout, recv).await {
                Ok(result) => return result,
                Err(_elapsed) => continue,
            }
        }
        log::warn!("Request {request_hdr:?} unanswered after {retries} retries");
        Ok(Err(ExceptionCode::GatewayTargetDevice))
    }

    async fn recv_matching(
        framed: &mut UdpFramed<codec::tcp::ClientCodec>,
        server_addr: SocketAddr,
        request_hdr: Header,
    ) -> Result<Response> {
        loop {
            let (response_adu, peer_addr) = framed
                .next()
                .await
                .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::BrokenPipe)))?;
            if peer_addr != server_addr {
                log::warn!("Discarding datagram from unexpected peer {peer_addr}");
                continue;
            }
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
}

impl DeviceContext for Client {
    fn set_device(&mut self, device: Device) {
        self.device_id = device.into();
    }
}

#[async_trait::async_trait]
impl crate::client::Client for Client {
    async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        Client::call(self, request).await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        // Connectionless; dropping the socket is all there is to do.
        Ok(())
    }
}
