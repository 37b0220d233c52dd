// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous Modbus clients

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "tls")]
pub mod tls;

#[cfg(feature = "udp")]
pub mod udp;

use std::{borrow::Cow, fmt, io, time::Duration};

use crate::{
    codec::{
        MAX_READ_BITS, MAX_READ_REGISTERS, MAX_READ_WRITE_READ_REGISTERS,
        MAX_READ_WRITE_WRITE_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
    },
    device::{Device, DeviceContext},
    frame::*,
    Error, Result,
};

/// Per-request transaction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientParams {
    /// Time to wait for a matching response before the request is
    /// retransmitted or given up.
    pub timeout: Duration,
    /// Number of retransmissions after a timeout. After the last retry
    /// the request completes with
    /// [`ExceptionCode::GatewayTargetDevice`].
    pub retries: u32,
}

impl Default for ClientParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 3,
        }
    }
}

/// A transport independent asynchronous client trait.
#[async_trait::async_trait]
pub trait Client: DeviceContext + fmt::Debug + Send {
    /// Invoke a _Modbus_ function.
    async fn call(&mut self, request: Request<'_>) -> Result<Response>;

    /// Disconnect and release the underlying transport.
    async fn disconnect(&mut self) -> io::Result<()>;
}

/// An asynchronous Modbus reader.
#[async_trait::async_trait]
pub trait Reader: Client {
    /// Read multiple coils (0x01)
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple discrete inputs (0x02)
    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read multiple input registers (0x04)
    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read and write multiple holding registers (0x17)
    ///
    /// The write operation is performed before the read unlike
    /// the name of the operation might suggest!
    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// An asynchronous Modbus writer.
#[async_trait::async_trait]
pub trait Writer: Client {
    /// Write a single coil (0x05)
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;

    /// Write a single holding register (0x06)
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    /// Write multiple coils (0x0F)
    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;

    /// Modify a holding register with AND and OR masks (0x16)
    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()>;
}

/// An asynchronous Modbus client context.
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
}

impl Context {
    /// Invoke a _Modbus_ function.
    pub async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        self.client.call(request).await
    }

    /// Disconnect and release the underlying transport.
    pub async fn disconnect(&mut self) -> io::Result<()> {
        self.client.disconnect().await
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(from: Context) -> Self {
        from.client
    }
}

impl DeviceContext for Context {
    fn set_device(&mut self, device: Device) {
        self.client.set_device(device);
    }
}

#[async_trait::async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        Context::call(self, request).await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        Context::disconnect(self).await
    }
}

fn check_quantity(cnt: Quantity, max: Quantity, what: &'static str) -> std::result::Result<(), Error> {
    if cnt < 1 || cnt > max {
        return Err(Error::Parameter(what));
    }
    Ok(())
}

fn unexpected_response(response: &Response) -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected response: {response:?}"),
    ))
}

#[async_trait::async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, MAX_READ_BITS, "coil count")?;
        let rsp = self.client.call(Request::ReadCoils(addr, cnt)).await?;
        match rsp {
            Ok(Response::ReadCoils(mut coils)) => {
                // The length of the response is always a multiple of 8;
                // only the requested quantity is meaningful.
                coils.truncate(cnt.into());
                Ok(Ok(coils))
            }
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, MAX_READ_BITS, "discrete input count")?;
        let rsp = self
            .client
            .call(Request::ReadDiscreteInputs(addr, cnt))
            .await?;
        match rsp {
            Ok(Response::ReadDiscreteInputs(mut inputs)) => {
                inputs.truncate(cnt.into());
                Ok(Ok(inputs))
            }
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, MAX_READ_REGISTERS, "holding register count")?;
        let rsp = self
            .client
            .call(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        match rsp {
            Ok(Response::ReadHoldingRegisters(words)) => Ok(Ok(words)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, MAX_READ_REGISTERS, "input register count")?;
        let rsp = self
            .client
            .call(Request::ReadInputRegisters(addr, cnt))
            .await?;
        match rsp {
            Ok(Response::ReadInputRegisters(words)) => Ok(Ok(words)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        check_quantity(read_count, MAX_READ_WRITE_READ_REGISTERS, "read count")?;
        check_quantity(
            Quantity::try_from(write_data.len()).map_err(|_| Error::Parameter("write count"))?,
            MAX_READ_WRITE_WRITE_REGISTERS,
            "write count",
        )?;
        let rsp = self
            .client
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_count,
                write_addr,
                Cow::Borrowed(write_data),
            ))
            .await?;
        match rsp {
            Ok(Response::ReadWriteMultipleRegisters(words)) => Ok(Ok(words)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }
}

#[async_trait::async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        let rsp = self
            .client
            .call(Request::WriteSingleCoil(addr, coil))
            .await?;
        match rsp {
            Ok(Response::WriteSingleCoil(_, _) | Response::NoResponseExpected) => Ok(Ok(())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        let rsp = self
            .client
            .call(Request::WriteSingleRegister(addr, word))
            .await?;
        match rsp {
            Ok(Response::WriteSingleRegister(_, _) | Response::NoResponseExpected) => Ok(Ok(())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        check_quantity(
            Quantity::try_from(coils.len()).map_err(|_| Error::Parameter("coil count"))?,
            MAX_WRITE_COILS,
            "coil count",
        )?;
        let rsp = self
            .client
            .call(Request::WriteMultipleCoils(addr, Cow::Borrowed(coils)))
            .await?;
        match rsp {
            Ok(Response::WriteMultipleCoils(_, _) | Response::NoResponseExpected) => Ok(Ok(())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        check_quantity(
            Quantity::try_from(words.len()).map_err(|_| Error::Parameter("register count"))?,
            MAX_WRITE_REGISTERS,
            "register count",
        )?;
        let rsp = self
            .client
            .call(Request::WriteMultipleRegisters(addr, Cow::Borrowed(words)))
            .await?;
        match rsp {
            Ok(Response::WriteMultipleRegisters(_, _) | Response::NoResponseExpected) => {
                Ok(Ok(()))
            }
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        let rsp = self
            .client
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?;
        match rsp {
            Ok(Response::MaskWriteRegister(_, _, _) | Response::NoResponseExpected) => Ok(Ok(())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }
}

/// Serial line and encapsulated transport function codes.
impl Context {
    /// Read the eight exception status outputs (0x07, serial line only).
    pub async fn read_exception_status(&mut self) -> Result<u8> {
        let rsp = self.client.call(Request::ReadExceptionStatus).await?;
        match rsp {
            Ok(Response::ReadExceptionStatus(status)) => Ok(Ok(status)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Issue a diagnostics sub-function (0x08, serial line only) and
    /// return the data field of the response.
    pub async fn diagnostics(
        &mut self,
        sub_function: DiagnosticsSubFunction,
        data: &[Word],
    ) -> Result<Vec<Word>> {
        let rsp = self
            .client
            .call(Request::Diagnostics(sub_function, Cow::Borrowed(data)))
            .await?;
        match rsp {
            Ok(Response::Diagnostics(_, data)) => Ok(Ok(data)),
            Ok(Response::NoResponseExpected) => Ok(Ok(Vec::new())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Get the status word and comm event count (0x0B, serial line only).
    pub async fn get_comm_event_counter(&mut self) -> Result<(u16, u16)> {
        let rsp = self.client.call(Request::GetCommEventCounter).await?;
        match rsp {
            Ok(Response::GetCommEventCounter(status, event_count)) => {
                Ok(Ok((status, event_count)))
            }
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Get the communication event log (0x0C, serial line only).
    pub async fn get_comm_event_log(&mut self) -> Result<CommEventLog> {
        let rsp = self.client.call(Request::GetCommEventLog).await?;
        match rsp {
            Ok(Response::GetCommEventLog(log)) => Ok(Ok(log)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Read the server id and run status (0x11, serial line only).
    pub async fn report_server_id(&mut self) -> Result<ServerId> {
        let rsp = self.client.call(Request::ReportServerId).await?;
        match rsp {
            Ok(Response::ReportServerId(server_id)) => Ok(Ok(server_id)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Read record groups from files (0x14). The record data is returned
    /// per requested group, in request order.
    pub async fn read_file_record(&mut self, refs: Vec<FileRecordRef>) -> Result<Vec<Vec<Word>>> {
        if refs.is_empty() {
            return Err(Error::Parameter("file record references"));
        }
        let rsp = self.client.call(Request::ReadFileRecord(refs)).await?;
        match rsp {
            Ok(Response::ReadFileRecord(groups)) => Ok(Ok(groups)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Write record groups to files (0x15).
    pub async fn write_file_record(&mut self, records: Vec<FileRecord>) -> Result<()> {
        if records.is_empty() {
            return Err(Error::Parameter("file records"));
        }
        let rsp = self.client.call(Request::WriteFileRecord(records)).await?;
        match rsp {
            Ok(Response::WriteFileRecord(_) | Response::NoResponseExpected) => Ok(Ok(())),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Read the FIFO queue of registers at the given pointer address
    /// (0x18), oldest entry first.
    pub async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>> {
        let rsp = self.client.call(Request::ReadFifoQueue(addr)).await?;
        match rsp {
            Ok(Response::ReadFifoQueue(words)) => Ok(Ok(words)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }

    /// Read the identification objects of the device (0x2B/0x0E).
    pub async fn read_device_identification(
        &mut self,
        read_code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<DeviceIdentification> {
        let rsp = self
            .client
            .call(Request::ReadDeviceIdentification(read_code, object_id))
            .await?;
        match rsp {
            Ok(Response::ReadDeviceIdentification(identification)) => Ok(Ok(identification)),
            Ok(response) => Err(unexpected_response(&response)),
            Err(exception) => Ok(Err(exception)),
        }
    }
}
