// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Datagram based reads and writes against a UDP server.

use std::time::Duration;

use tokio::net::UdpSocket;

use modbus_stack::{
    client::{self, Reader as _, Writer as _},
    datastore::{DeviceData, DeviceStore, Sequential},
    server::{udp::Server, ContextService, ServerContext},
};

fn device_data() -> Box<dyn DeviceStore> {
    Box::new(
        DeviceData::new(
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::new(0, vec![17; 8])),
            Box::new(Sequential::filled(0, 100, 0)),
        )
        .with_zero_mode(true),
    )
}

#[tokio::test]
async fn read_and_write_over_datagrams() -> anyhow::Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let socket_addr = socket.local_addr()?;
    let service = ContextService::from(ServerContext::single(device_data()));
    tokio::spawn(async move {
        let server = Server::new(socket);
        if let Err(err) = server.serve(service).await {
            eprintln!("{err}");
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ctx = client::udp::connect(socket_addr).await?;
    let data = ctx.read_holding_registers(1, 2).await??;
    assert_eq!(data, vec![17, 17]);

    ctx.write_multiple_registers(4, &[0x0102, 0x0304]).await??;
    let data = ctx.read_holding_registers(4, 2).await??;
    assert_eq!(data, vec![0x0102, 0x0304]);

    ctx.write_single_coil(8, true).await??;
    let coils = ctx.read_coils(8, 1).await??;
    assert_eq!(coils, vec![true]);

    Ok(())
}
