// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The data-driven simulator served over the ASCII framer: reads run the
//! configured value-generating actions.

use modbus_stack::{
    client::{self, Reader as _},
    datastore::simulator::SimulatorContext,
    device::Device,
    server::{ascii::Server, ContextService, ServerContext},
    transport::NullModem,
    ExceptionCode,
};

fn simulator() -> SimulatorContext {
    let config = serde_json::json!({
        "setup": {
            "co size": 50, "di size": 50, "hr size": 50, "ir size": 50,
            "shared blocks": true,
            "type exception": false,
            "defaults": {
                "value": {
                    "bits": 0, "uint16": 0, "uint32": 0,
                    "float32": 0.0, "string": " "
                },
                "action": {
                    "bits": null, "uint16": null, "uint32": null,
                    "float32": null, "string": null
                }
            }
        },
        "bits": [[0, 4]],
        "uint16": [
            {"addr": 19, "value": 14661, "action": "increment"},
            {"addr": [20, 29], "value": 100}
        ],
        "invalid": [[40, 49]],
        "write": [[20, 29]]
    });
    SimulatorContext::from_json(&config.to_string(), Vec::new()).unwrap()
}

fn spawn_server(service: ContextService) -> NullModem {
    let (server_side, client_side) = NullModem::pair();
    tokio::spawn(async move {
        let server = Server::new(server_side);
        if let Err(err) = server.serve(service).await {
            eprintln!("{err}");
        }
    });
    client_side
}

#[tokio::test]
async fn increment_action_runs_on_each_read() -> anyhow::Result<()> {
    let service = ContextService::from(ServerContext::single(Box::new(simulator())));
    let transport = spawn_server(service);

    let mut ctx = client::ascii::attach_device(transport, Device(1));
    let data = ctx.read_holding_registers(19, 1).await??;
    assert_eq!(data, vec![14662]);
    let data = ctx.read_holding_registers(19, 1).await??;
    assert_eq!(data, vec![14663]);

    Ok(())
}

#[tokio::test]
async fn invalid_and_read_only_cells_raise_exceptions() -> anyhow::Result<()> {
    let service = ContextService::from(ServerContext::single(Box::new(simulator())));
    let transport = spawn_server(service);

    let mut ctx = client::ascii::attach_device(transport, Device(1));

    // Invalid cells answer with an illegal address exception.
    let response = ctx.read_holding_registers(40, 1).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    // Cells without write access reject writes.
    let response = ctx
        .call(modbus_stack::Request::WriteSingleRegister(19, 0))
        .await?;
    assert_eq!(
        response,
        Err(ExceptionCode::IllegalDataAddress)
    );

    // Cells with write access accept them.
    let response = ctx
        .call(modbus_stack::Request::WriteSingleRegister(20, 42))
        .await?;
    assert!(response.is_ok());
    let data = ctx.read_holding_registers(20, 1).await??;
    assert_eq!(data, vec![42]);

    Ok(())
}
