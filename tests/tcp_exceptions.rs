// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Every exception code travels unchanged from the server service to the
//! client, and requests for unconfigured devices are answered with a
//! gateway exception.

mod exception;

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use tokio::net::TcpListener;

use modbus_stack::{
    client::{self, Reader as _},
    datastore::{DeviceData, DeviceStore, Sequential},
    device::{Device, DeviceId},
    server::{
        tcp::{accept_tcp_connection, Server},
        ContextService, ServerContext,
    },
    ExceptionCode,
};

use crate::exception::{check_client_context, TestService};

#[tokio::test]
async fn all_exceptions() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    tokio::select! {
        _ = server_context(listener) => unreachable!(),
        () = client_context(socket_addr) => (),
    }

    Ok(())
}

async fn server_context(listener: TcpListener) -> anyhow::Result<()> {
    let server = Server::new(listener);
    let new_service = |_socket_addr| Ok(Some(TestService {}));
    let on_connected =
        |stream, socket_addr| async move { accept_tcp_connection(stream, socket_addr, new_service) };
    let on_process_error = |err| {
        eprintln!("{err}");
    };
    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}

async fn client_context(socket_addr: SocketAddr) {
    // Give the server some time for starting up
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ctx = client::tcp::connect(socket_addr).await.unwrap();

    check_client_context(ctx).await;
}

fn small_device_data() -> Box<dyn DeviceStore> {
    Box::new(
        DeviceData::new(
            Box::new(Sequential::filled(0, 16, false)),
            Box::new(Sequential::filled(0, 16, false)),
            Box::new(Sequential::filled(0, 16, 0)),
            Box::new(Sequential::filled(0, 16, 0)),
        )
        .with_zero_mode(true),
    )
}

#[tokio::test]
async fn missing_device_answers_gateway_exception() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    let mut devices: HashMap<DeviceId, Box<dyn DeviceStore>> = HashMap::new();
    devices.insert(1, small_device_data());
    let service = ContextService::from(ServerContext::with_devices(devices));

    let client = async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut ctx = client::tcp::connect_device(socket_addr, Device(5)).await.unwrap();
        let response = ctx.read_coils(1, 1).await.unwrap();
        assert_eq!(response, Err(ExceptionCode::GatewayTargetDevice));

        // The configured device answers normally.
        let mut ctx = client::tcp::connect_device(socket_addr, Device(1)).await.unwrap();
        let response = ctx.read_coils(1, 1).await.unwrap();
        assert_eq!(response, Ok(vec![false]));
    };

    tokio::select! {
        _ = serve_context(listener, service) => unreachable!(),
        () = client => (),
    }

    Ok(())
}

async fn serve_context(listener: TcpListener, service: ContextService) -> anyhow::Result<()> {
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
    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}
