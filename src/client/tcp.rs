// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::{fmt, io, net::SocketAddr};

use futures_util::FutureExt as _;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::transport::reconnect::Connect;

use super::*;

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_device(socket_addr, Device::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// probably through a Modbus TCP gateway that is forwarding
/// messages to/from the corresponding device.
pub async fn connect_device(socket_addr: SocketAddr, device: Device) -> io::Result<Context> {
    connect_device_with(socket_addr, device, ClientParams::default()).await
}

/// Like [`connect_device`] with explicit transaction parameters.
///
/// The returned context remembers the socket address: if the connection
/// is lost, the next call transparently reconnects.
pub async fn connect_device_with(
    socket_addr: SocketAddr,
    device: Device,
    params: ClientParams,
) -> io::Result<Context> {
    let transport = TcpStream::connect(socket_addr).await?;
    let connector: Box<dyn Connect<TcpStream>> =
        Box::new(move || TcpStream::connect(socket_addr).boxed());
    let client = crate::service::tcp::Client::new(transport, device, params)
        .with_connector(connector);
    Ok(Context {
        client: Box::new(client),
    })
}

/// Like [`connect_device_with`], binding the local end of the
/// connection to a specific source address.
pub async fn connect_device_from(
    socket_addr: SocketAddr,
    source_address: SocketAddr,
    device: Device,
    params: ClientParams,
) -> io::Result<Context> {
    let connect_from = move || async move {
        let socket = if socket_addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.bind(source_address)?;
        socket.connect(socket_addr).await
    };
    let transport = connect_from().await?;
    let connector: Box<dyn Connect<TcpStream>> = Box::new(move || connect_from().boxed());
    let client =
        crate::service::tcp::Client::new(transport, device, params).with_connector(connector);
    Ok(Context {
        client: Box::new(client),
    })
}

/// Attach a new client context to a direct transport connection.
///
/// The connection could either be an ordinary [`TcpStream`] or a TLS
/// connection.
pub fn attach<T>(transport: T) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_device(transport, Device::tcp_device())
}

/// Attach a new client context to a transport connection.
///
/// The connection could either be an ordinary [`TcpStream`] or a TLS
/// connection.
pub fn attach_device<T>(transport: T, device: Device) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_device_with(transport, device, ClientParams::default())
}

/// Like [`attach_device`] with explicit transaction parameters.
pub fn attach_device_with<T>(transport: T, device: Device, params: ClientParams) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let client = crate::service::tcp::Client::new(transport, device, params);
    Context {
        client: Box::new(client),
    }
}
