// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reads and writes against a datastore backed TCP server, including
//! broadcast fan-out.

use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpListener;

use modbus_stack::{
    client::{self, Reader as _, Writer as _},
    datastore::{DeviceData, DeviceStore, Sequential},
    device::Device,
    server::{
        tcp::{accept_tcp_connection, Server},
        ContextService, ServerContext,
    },
    Request, Response,
};

fn seeded_device_data() -> Box<dyn DeviceStore> {
    Box::new(
        DeviceData::new(
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::new(0, vec![17; 8])),
            Box::new(Sequential::new(0, (0u16..100).collect())),
        )
        .with_zero_mode(true),
    )
}

async fn spawn_server(service: ContextService) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;
    tokio::spawn(async move {
        let server = Server::new(listener);
        let on_connected = move |stream, socket_addr| {
            let service = service.clone();
            async move {
                accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone())))
            }
        };
        let on_process_error = |err| {
            eprintln!("{err}");
        };
        server.serve(&on_connected, on_process_error).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(socket_addr)
}

#[tokio::test]
async fn read_seeded_holding_registers() -> anyhow::Result<()> {
    let service = ContextService::from(ServerContext::single(seeded_device_data()));
    let socket_addr = spawn_server(service).await?;

    let mut ctx = client::tcp::connect(socket_addr).await?;
    let data = ctx.read_holding_registers(1, 2).await??;
    assert_eq!(data, vec![17, 17]);

    let data = ctx.read_input_registers(10, 3).await??;
    assert_eq!(data, vec![10, 11, 12]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn write_then_read_back() -> anyhow::Result<()> {
    let service = ContextService::from(ServerContext::single(seeded_device_data()));
    let socket_addr = spawn_server(service).await?;

    let mut ctx = client::tcp::connect(socket_addr).await?;

    ctx.write_single_register(3, 0xABCD).await??;
    let data = ctx.read_holding_registers(3, 1).await??;
    assert_eq!(data, vec![0xABCD]);

    ctx.write_multiple_coils(10, &[true, false, true]).await??;
    let coils = ctx.read_coils(10, 3).await??;
    assert_eq!(coils, vec![true, false, true]);

    ctx.masked_write_register(4, 0x00F2, 0x0025).await??;
    let data = ctx.read_holding_registers(4, 1).await??;
    // (17 & 0xF2) | (0x25 & !0xF2) = 0x15
    assert_eq!(data, vec![0x0015]);

    let data = ctx
        .read_write_multiple_registers(6, 2, 6, &[0x0102, 0x0304])
        .await??;
    assert_eq!(data, vec![0x0102, 0x0304]);

    Ok(())
}

#[tokio::test]
async fn repeated_register_writes_are_idempotent() -> anyhow::Result<()> {
    let service = ContextService::from(ServerContext::single(seeded_device_data()));
    let socket_addr = spawn_server(service).await?;

    let mut ctx = client::tcp::connect(socket_addr).await?;
    for value in [1u16, 2, 3, 3, 3] {
        ctx.write_single_register(7, value).await??;
        let data = ctx.read_holding_registers(7, 1).await??;
        assert_eq!(data, vec![value]);
    }
    Ok(())
}

#[tokio::test]
async fn broadcast_updates_context_without_response() -> anyhow::Result<()> {
    let context = ServerContext::single(seeded_device_data()).with_broadcast_enable(true);
    let service = ContextService::from(context);
    let socket_addr = spawn_server(service).await?;

    // The broadcast write completes immediately with a synthesized
    // result; the server never answers.
    let mut broadcast_ctx =
        client::tcp::connect_device(socket_addr, Device::broadcast()).await?;
    let response = broadcast_ctx
        .call(Request::WriteSingleRegister(5, 0x5555))
        .await?;
    assert_eq!(response, Ok(Response::NoResponseExpected));
    broadcast_ctx.write_single_register(6, 0x6666).await??;

    // The broadcast client never waits for the server; give it time to
    // apply the writes before reading them back.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The write is observable through a regular connection.
    let mut ctx = client::tcp::connect(socket_addr).await?;
    let data = ctx.read_holding_registers(5, 2).await??;
    assert_eq!(data, vec![0x5555, 0x6666]);

    Ok(())
}
