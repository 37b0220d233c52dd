// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use super::*;

/// Attach a new client context to a serial transport, addressing the
/// given device.
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
    let client = crate::service::ascii::Client::new(transport, device, params);
    Context {
        client: Box::new(client),
    }
}

/// Open a serial port and attach a client context to it.
///
/// With `handle_local_echo` enabled the transport is wrapped in
/// [`LocalEcho`](crate::transport::LocalEcho) to strip the echo of
/// transmitted bytes produced by some RS-485 converters.
#[cfg(feature = "serial")]
pub fn connect_device(
    builder: &tokio_serial::SerialPortBuilder,
    device: Device,
    params: ClientParams,
    handle_local_echo: bool,
) -> std::io::Result<Context> {
    let transport = tokio_serial::SerialStream::open(builder)?;
    if handle_local_echo {
        Ok(attach_device_with(
            crate::transport::LocalEcho::new(transport),
            device,
            params,
        ))
    } else {
        Ok(attach_device_with(transport, device, params))
    }
}
