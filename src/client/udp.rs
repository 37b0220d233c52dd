// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! UDP client connections

use std::{io, net::SocketAddr};

use super::*;

/// Create a connectionless context exchanging datagrams with a Modbus
/// UDP server.
pub async fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_device(socket_addr, Device::tcp_device()).await
}

/// Like [`connect`] for a specific device id.
pub async fn connect_device(socket_addr: SocketAddr, device: Device) -> io::Result<Context> {
    connect_device_with(socket_addr, device, ClientParams::default()).await
}

/// Like [`connect_device`] with explicit transaction parameters.
pub async fn connect_device_with(
    socket_addr: SocketAddr,
    device: Device,
    params: ClientParams,
) -> io::Result<Context> {
    let client = crate::service::udp::Client::connect(socket_addr, device, params).await?;
    Ok(Context {
        client: Box::new(client),
    })
}
