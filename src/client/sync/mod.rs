// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous Modbus client
//!
//! A thin facade wrapping the asynchronous client behind a dedicated
//! current-thread runtime, with an optional overall timeout per
//! operation.

use std::{io, time::Duration};

use crate::{
    device::{Device, DeviceContext},
    frame::*,
    Error, Result,
};

use super::{Context as AsyncContext, Reader as _, Writer as _};

fn block_on_with_timeout<T>(
    runtime: &tokio::runtime::Runtime,
    timeout: Option<Duration>,
    task: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(duration) => runtime.block_on(async move {
            tokio::time::timeout(duration, task)
                .await
                .unwrap_or_else(|elapsed| {
                    Err(Error::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        elapsed,
                    )))
                })
        }),
        None => runtime.block_on(task),
    }
}

fn new_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// A transport independent synchronous client trait.
pub trait Client: DeviceContext {
    /// Invoke a _Modbus_ function.
    fn call(&mut self, request: Request<'_>) -> Result<Response>;
}

/// A transport independent synchronous reader trait.
///
/// The synchronous counterpart of the asynchronous
/// [`Reader`](crate::client::Reader) trait.
pub trait Reader: Client {
    /// Read multiple coils (0x01)
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    /// Read multiple discrete inputs (0x02)
    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    /// Read multiple holding registers (0x03)
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    /// Read multiple input registers (0x04)
    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    /// Read and write multiple holding registers (0x17)
    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// A transport independent synchronous writer trait.
///
/// The synchronous counterpart of the asynchronous
/// [`Writer`](crate::client::Writer) trait.
pub trait Writer: Client {
    /// Write a single coil (0x05)
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    /// Write a single holding register (0x06)
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    /// Write multiple coils (0x0F)
    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    /// Write multiple holding registers (0x10)
    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// A synchronous Modbus client context.
#[derive(Debug)]
pub struct Context {
    runtime: tokio::runtime::Runtime,
    async_ctx: AsyncContext,
    timeout: Option<Duration>,
}

/// Establish a direct connection to a Modbus TCP coupler.
#[cfg(feature = "tcp")]
pub fn connect_tcp(socket_addr: std::net::SocketAddr) -> io::Result<Context> {
    connect_tcp_device(socket_addr, Device::tcp_device())
}

/// Connect to a Modbus TCP device, blocking the current thread.
#[cfg(feature = "tcp")]
pub fn connect_tcp_device(
    socket_addr: std::net::SocketAddr,
    device: Device,
) -> io::Result<Context> {
    let runtime = new_runtime()?;
    let async_ctx = runtime.block_on(crate::client::tcp::connect_device(socket_addr, device))?;
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}

/// Open a serial port and attach an RTU client context to it, blocking
/// the current thread.
#[cfg(all(feature = "rtu", feature = "serial"))]
pub fn connect_rtu_device(
    builder: &tokio_serial::SerialPortBuilder,
    device: Device,
) -> io::Result<Context> {
    let runtime = new_runtime()?;
    let async_ctx = {
        let _guard = runtime.enter();
        crate::client::rtu::connect_device(
            builder,
            device,
            crate::client::ClientParams::default(),
            false,
        )?
    };
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}

impl Context {
    /// Returns the current timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets a timeout duration for all subsequent operations.
    ///
    /// The timeout is disabled by passing `None`.
    pub fn set_timeout(&mut self, duration: impl Into<Option<Duration>>) {
        self.timeout = duration.into();
    }

    /// Disables the timeout for all subsequent operations.
    pub fn reset_timeout(&mut self) {
        self.timeout = None;
    }

    /// Disconnect and release the underlying transport.
    pub fn disconnect(&mut self) -> io::Result<()> {
        self.runtime.block_on(self.async_ctx.disconnect())
    }
}

impl Client for Context {
    fn call(&mut self, request: Request<'_>) -> Result<Response> {
        block_on_with_timeout(&self.runtime, self.timeout, self.async_ctx.call(request))
    }
}

impl DeviceContext for Context {
    fn set_device(&mut self, device: Device) {
        self.async_ctx.set_device(device);
    }
}

impl Reader for Context {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_coils(addr, cnt),
        )
    }

    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_discrete_inputs(addr, cnt),
        )
    }

    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_holding_registers(addr, cnt),
        )
    }

    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_input_registers(addr, cnt),
        )
    }

    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx
                .read_write_multiple_registers(read_addr, read_count, write_addr, write_data),
        )
    }
}

impl Writer for Context {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_single_coil(addr, coil),
        )
    }

    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_single_register(addr, word),
        )
    }

    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_multiple_coils(addr, coils),
        )
    }

    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_multiple_registers(addr, words),
        )
    }
}
