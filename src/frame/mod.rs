// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(feature = "tls")]
pub(crate) mod tls;

use std::{borrow::Cow, error, fmt};

use crate::device::DeviceId;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address*
/// or *register address* is often specified as a number with 1-based
/// indexing. Please consult the specification of your devices if 1-based
/// coil/register addresses need to be converted to 0-based protocol
/// addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// A Modbus function code.
///
/// It is represented by an unsigned 8 bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils
    ReadCoils,
    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,
    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,
    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,
    /// 05 (0x05) Write Single Coil
    WriteSingleCoil,
    /// 06 (0x06) Write Single Register
    WriteSingleRegister,
    /// 07 (0x07) Read Exception Status (serial line only)
    ReadExceptionStatus,
    /// 08 (0x08) Diagnostics (serial line only)
    Diagnostics,
    /// 11 (0x0B) Get Comm Event Counter (serial line only)
    GetCommEventCounter,
    /// 12 (0x0C) Get Comm Event Log (serial line only)
    GetCommEventLog,
    /// 15 (0x0F) Write Multiple Coils
    WriteMultipleCoils,
    /// 16 (0x10) Write Multiple Registers
    WriteMultipleRegisters,
    /// 17 (0x11) Report Server ID (serial line only)
    ReportServerId,
    /// 20 (0x14) Read File Record
    ReadFileRecord,
    /// 21 (0x15) Write File Record
    WriteFileRecord,
    /// 22 (0x16) Mask Write Register
    MaskWriteRegister,
    /// 23 (0x17) Read/Write Multiple Registers
    ReadWriteMultipleRegisters,
    /// 24 (0x18) Read FIFO Queue
    ReadFifoQueue,
    /// 43 (0x2B) Encapsulated Interface Transport, MEI type 14 (0x0E)
    /// Read Device Identification
    ReadDeviceIdentification,
    /// Custom Modbus Function Code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] from an unsigned 8 bit integer.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x07 => Self::ReadExceptionStatus,
            0x08 => Self::Diagnostics,
            0x0B => Self::GetCommEventCounter,
            0x0C => Self::GetCommEventLog,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportServerId,
            0x14 => Self::ReadFileRecord,
            0x15 => Self::WriteFileRecord,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            0x18 => Self::ReadFifoQueue,
            0x2B => Self::ReadDeviceIdentification,
            code => Self::Custom(code),
        }
    }

    /// Get the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::Diagnostics => 0x08,
            Self::GetCommEventCounter => 0x0B,
            Self::GetCommEventLog => 0x0C,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::ReadFileRecord => 0x14,
            Self::WriteFileRecord => 0x15,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::ReadFifoQueue => 0x18,
            Self::ReadDeviceIdentification => 0x2B,
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Sub-function of a [`FunctionCode::Diagnostics`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticsSubFunction {
    /// 00 (0x00) Return Query Data
    ReturnQueryData,
    /// 01 (0x01) Restart Communications Option
    RestartCommunications,
    /// 02 (0x02) Return Diagnostic Register
    ReturnDiagnosticRegister,
    /// 03 (0x03) Change ASCII Input Delimiter
    ChangeAsciiInputDelimiter,
    /// 04 (0x04) Force Listen Only Mode (no response)
    ForceListenOnlyMode,
    /// 10 (0x0A) Clear Counters and Diagnostic Register
    ClearCounters,
    /// 11 (0x0B) Return Bus Message Count
    ReturnBusMessageCount,
    /// 12 (0x0C) Return Bus Communication Error Count
    ReturnBusCommunicationErrorCount,
    /// 13 (0x0D) Return Bus Exception Error Count
    ReturnBusExceptionErrorCount,
    /// 14 (0x0E) Return Server Message Count
    ReturnServerMessageCount,
    /// 15 (0x0F) Return Server No Response Count
    ReturnServerNoResponseCount,
    /// 16 (0x10) Return Server NAK Count
    ReturnServerNakCount,
    /// 17 (0x11) Return Server Busy Count
    ReturnServerBusyCount,
    /// 18 (0x12) Return Bus Character Overrun Count
    ReturnBusCharacterOverrunCount,
    /// 19 (0x13) Return IOP Overrun Count
    ReturnIopOverrunCount,
    /// 20 (0x14) Clear Overrun Counter and Flag
    ClearOverrunCounter,
    /// Any other sub-function, including 21 (0x15) Get/Clear Modbus Plus
    /// statistics which this library does not implement.
    Other(u16),
}

impl DiagnosticsSubFunction {
    /// Create a new [`DiagnosticsSubFunction`] from its wire value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        match value {
            0x00 => Self::ReturnQueryData,
            0x01 => Self::RestartCommunications,
            0x02 => Self::ReturnDiagnosticRegister,
            0x03 => Self::ChangeAsciiInputDelimiter,
            0x04 => Self::ForceListenOnlyMode,
            0x0A => Self::ClearCounters,
            0x0B => Self::ReturnBusMessageCount,
            0x0C => Self::ReturnBusCommunicationErrorCount,
            0x0D => Self::ReturnBusExceptionErrorCount,
            0x0E => Self::ReturnServerMessageCount,
            0x0F => Self::ReturnServerNoResponseCount,
            0x10 => Self::ReturnServerNakCount,
            0x11 => Self::ReturnServerBusyCount,
            0x12 => Self::ReturnBusCharacterOverrunCount,
            0x13 => Self::ReturnIopOverrunCount,
            0x14 => Self::ClearOverrunCounter,
            value => Self::Other(value),
        }
    }

    /// Get the wire value of the current [`DiagnosticsSubFunction`].
    #[must_use]
    pub const fn value(self) -> u16 {
        match self {
            Self::ReturnQueryData => 0x00,
            Self::RestartCommunications => 0x01,
            Self::ReturnDiagnosticRegister => 0x02,
            Self::ChangeAsciiInputDelimiter => 0x03,
            Self::ForceListenOnlyMode => 0x04,
            Self::ClearCounters => 0x0A,
            Self::ReturnBusMessageCount => 0x0B,
            Self::ReturnBusCommunicationErrorCount => 0x0C,
            Self::ReturnBusExceptionErrorCount => 0x0D,
            Self::ReturnServerMessageCount => 0x0E,
            Self::ReturnServerNoResponseCount => 0x0F,
            Self::ReturnServerNakCount => 0x10,
            Self::ReturnServerBusyCount => 0x11,
            Self::ReturnBusCharacterOverrunCount => 0x12,
            Self::ReturnIopOverrunCount => 0x13,
            Self::ClearOverrunCounter => 0x14,
            Self::Other(value) => value,
        }
    }
}

/// Read access category for Read Device Identification requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDeviceIdCode {
    /// Basic device identification (objects 0x00 - 0x02, mandatory)
    Basic,
    /// Regular device identification (objects 0x03 - 0x06)
    Regular,
    /// Extended device identification (objects 0x80 - 0xFF)
    Extended,
    /// One specific identification object
    Specific,
}

impl ReadDeviceIdCode {
    pub(crate) const fn new(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Basic),
            0x02 => Some(Self::Regular),
            0x03 => Some(Self::Extended),
            0x04 => Some(Self::Specific),
            _ => None,
        }
    }

    /// Get the wire value of the current [`ReadDeviceIdCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Basic => 0x01,
            Self::Regular => 0x02,
            Self::Extended => 0x03,
            Self::Specific => 0x04,
        }
    }
}

/// A single device identification object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdObject {
    /// Object id, e.g. 0x00 = VendorName.
    pub id: u8,
    /// Raw object value, ASCII for the standard objects.
    pub value: Vec<u8>,
}

/// Payload of a Read Device Identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    /// The read access category that was requested.
    pub read_code: ReadDeviceIdCode,
    /// Identification conformity level of the device.
    pub conformity_level: u8,
    /// `true` if further objects are available and a follow-up request
    /// starting at [`Self::next_object_id`] is required.
    pub more_follows: bool,
    /// Object id to continue with if [`Self::more_follows`] is set.
    pub next_object_id: u8,
    /// The identification objects carried by this response.
    pub objects: Vec<DeviceIdObject>,
}

/// Payload of a Get Comm Event Log response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommEventLog {
    /// Device status word, `0xFFFF` while a long-running program command
    /// is in progress.
    pub status: u16,
    /// Comm event counter.
    pub event_count: u16,
    /// Bus message counter.
    pub message_count: u16,
    /// Most recent communication events, newest first, at most 64.
    pub events: Vec<u8>,
}

/// Payload of a Report Server ID response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId {
    /// Device specific server id byte.
    pub server_id: u8,
    /// `true` = run, `false` = stop.
    pub run_indicator: bool,
    /// Additional device specific data.
    pub additional_data: Vec<u8>,
}

/// Reference to one record group in a Read File Record request.
///
/// The reference type is always 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecordRef {
    /// File number, 1 to 65535.
    pub file_number: u16,
    /// Starting record number within the file, 0 to 9999.
    pub record_number: u16,
    /// Number of registers to access.
    pub record_length: u16,
}

/// One record group carrying data, as used by Write File Record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File number, 1 to 65535.
    pub file_number: u16,
    /// Starting record number within the file, 0 to 9999.
    pub record_number: u16,
    /// The record data.
    pub record_data: Vec<Word>,
}

/// A request represents a message from the client (master) to the server (slave).
///
/// Read and write requests borrow their bulk payload to avoid
/// unnecessary copies when encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// A request to read multiple coils.
    /// The first parameter is the address of the first coil to read.
    /// The second parameter is the number of coils to read.
    ReadCoils(Address, Quantity),

    /// A request to read multiple discrete inputs
    /// The first parameter is the address of the first discrete input to read.
    /// The second parameter is the number of discrete inputs to read.
    ReadDiscreteInputs(Address, Quantity),

    /// A request to read multiple holding registers.
    /// The first parameter is the address of the first register to read.
    /// The second parameter is the number of registers to read.
    ReadHoldingRegisters(Address, Quantity),

    /// A request to read multiple input registers.
    /// The first parameter is the address of the first register to read.
    /// The second parameter is the number of registers to read.
    ReadInputRegisters(Address, Quantity),

    /// A request to write a single coil.
    /// The first parameter is the address of the coil.
    /// The second parameter is the value to write to the coil.
    WriteSingleCoil(Address, Coil),

    /// A request to write a single register.
    /// The first parameter is the address of the register.
    /// The second parameter is the value to write to the register.
    WriteSingleRegister(Address, Word),

    /// A request to read the eight exception status outputs
    /// (serial line only).
    ReadExceptionStatus,

    /// A serial line diagnostics request.
    /// The first parameter selects the sub-function.
    /// The second parameter is the sub-function specific data field.
    Diagnostics(DiagnosticsSubFunction, Cow<'a, [Word]>),

    /// A request for the status word and comm event count
    /// (serial line only).
    GetCommEventCounter,

    /// A request for the communication event log (serial line only).
    GetCommEventLog,

    /// A request to write multiple coils.
    /// The first parameter is the address of the first coil to write.
    /// The second parameter is the vector of values to write to the coils.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),

    /// A request to write multiple registers.
    /// The first parameter is the address of the first register to write.
    /// The second parameter is the vector of values to write to the registers.
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),

    /// A request for the server id, run indicator status and additional
    /// device specific data (serial line only).
    ReportServerId,

    /// A request to read record groups from files.
    ReadFileRecord(Vec<FileRecordRef>),

    /// A request to write record groups to files.
    WriteFileRecord(Vec<FileRecord>),

    /// A request to modify a holding register using a combination of an
    /// AND mask and an OR mask.
    /// The first parameter is the address of the holding register.
    /// The second parameter is the AND mask.
    /// The third parameter is the OR mask.
    MaskWriteRegister(Address, Word, Word),

    /// A request to simultaneously read multiple registers and write
    /// multiple registers. The write operation is performed before the
    /// read.
    /// The first parameter is the address of the first register to read.
    /// The second parameter is the number of registers to read.
    /// The third parameter is the address of the first register to write.
    /// The fourth parameter is the vector of values to write to the registers.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),

    /// A request to read the contents of a first-in-first-out queue of
    /// registers. The parameter is the address of the FIFO pointer
    /// register.
    ReadFifoQueue(Address),

    /// A request to read the identification objects of the device
    /// (MEI type 0x0E).
    /// The first parameter selects the read access category.
    /// The second parameter is the object id to start at.
    ReadDeviceIdentification(ReadDeviceIdCode, u8),

    /// A raw Modbus request.
    /// The first parameter is the Modbus function code.
    /// The second parameter is the raw bytes of the request.
    Custom(u8, Cow<'a, [u8]>),
}

impl Request<'_> {
    /// Converts the request into an owned instance with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;
        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            ReadExceptionStatus => ReadExceptionStatus,
            Diagnostics(sub, data) => Diagnostics(sub, Cow::Owned(data.into_owned())),
            GetCommEventCounter => GetCommEventCounter,
            GetCommEventLog => GetCommEventLog,
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            ReportServerId => ReportServerId,
            ReadFileRecord(refs) => ReadFileRecord(refs),
            WriteFileRecord(records) => WriteFileRecord(records),
            MaskWriteRegister(addr, and_mask, or_mask) => {
                MaskWriteRegister(addr, and_mask, or_mask)
            }
            ReadWriteMultipleRegisters(read_addr, read_count, write_addr, words) => {
                ReadWriteMultipleRegisters(
                    read_addr,
                    read_count,
                    write_addr,
                    Cow::Owned(words.into_owned()),
                )
            }
            ReadFifoQueue(addr) => ReadFifoQueue(addr),
            ReadDeviceIdentification(code, object_id) => ReadDeviceIdentification(code, object_id),
            Custom(code, bytes) => Custom(code, Cow::Owned(bytes.into_owned())),
        }
    }

    /// Get the [`FunctionCode`] of the [`Request`].
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter => FunctionCode::GetCommEventCounter,
            GetCommEventLog => FunctionCode::GetCommEventLog,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId => FunctionCode::ReportServerId,
            ReadFileRecord(_) => FunctionCode::ReadFileRecord,
            WriteFileRecord(_) => FunctionCode::WriteFileRecord,
            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(_, _, _, _) => FunctionCode::ReadWriteMultipleRegisters,
            ReadFifoQueue(_) => FunctionCode::ReadFifoQueue,
            ReadDeviceIdentification(_, _) => FunctionCode::ReadDeviceIdentification,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }

    /// Build the [`ExceptionResponse`] that answers this request with the
    /// given exception code.
    #[must_use]
    pub fn to_exception(&self, exception: ExceptionCode) -> ExceptionResponse {
        ExceptionResponse {
            function: self.function_code(),
            exception,
        }
    }
}

/// The data of a successful request.
///
/// ReadCoils/ReadDiscreteInputs: The length of the result Vec is always a
/// multiple of 8. Only the values of the first bits/coils that have actually
/// been requested are defined. The value of the remaining bits depend on the
/// server implementation and those coils should be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Response to a ReadCoils request
    /// The parameter contains the coil values that have been read
    /// See also the note above regarding the vector length
    ReadCoils(Vec<Coil>),

    /// Response to a ReadDiscreteInputs request
    /// The parameter contains the discrete input values that have been read
    /// See also the note above regarding the vector length
    ReadDiscreteInputs(Vec<Coil>),

    /// Response to a ReadHoldingRegisters request
    /// The parameter contains the register values that have been read
    ReadHoldingRegisters(Vec<Word>),

    /// Response to a ReadInputRegisters request
    /// The parameter contains the register values that have been read
    ReadInputRegisters(Vec<Word>),

    /// Response to a WriteSingleCoil request
    /// The first parameter contains the address of the coil that has been written to
    /// The second parameter contains the value that has been written to the coil the given address
    WriteSingleCoil(Address, Coil),

    /// Response to a WriteSingleRegister request
    /// The first parameter contains the address of the register that has been written to
    /// The second parameter contains the value that has been written to the register at the given address
    WriteSingleRegister(Address, Word),

    /// Response to a ReadExceptionStatus request.
    /// The parameter contains the eight exception status outputs.
    ReadExceptionStatus(u8),

    /// Response to a Diagnostics request, echoing the sub-function and
    /// carrying the sub-function specific data field.
    Diagnostics(DiagnosticsSubFunction, Vec<Word>),

    /// Response to a GetCommEventCounter request.
    /// The first parameter is the device status word.
    /// The second parameter is the comm event count.
    GetCommEventCounter(u16, u16),

    /// Response to a GetCommEventLog request.
    GetCommEventLog(CommEventLog),

    /// Response to a WriteMultipleCoils request
    /// The first parameter contains the address at the start of the range that has been written to
    /// The second parameter contains the amount of values that have been written
    WriteMultipleCoils(Address, Quantity),

    /// Response to a WriteMultipleRegisters request
    /// The first parameter contains the address at the start of the register range that has been written to
    /// The second parameter contains the amount of register that have been written
    WriteMultipleRegisters(Address, Quantity),

    /// Response to a ReportServerId request.
    ReportServerId(ServerId),

    /// Response to a ReadFileRecord request.
    /// The parameter contains the record data of each requested group,
    /// in request order.
    ReadFileRecord(Vec<Vec<Word>>),

    /// Response to a WriteFileRecord request, echoing the written records.
    WriteFileRecord(Vec<FileRecord>),

    /// Response to a MaskWriteRegister request
    /// The first parameter is the address of the holding register.
    /// The second parameter is the AND mask.
    /// The third parameter is the OR mask.
    MaskWriteRegister(Address, Word, Word),

    /// Response to a ReadWriteMultipleRegisters request
    /// The parameter contains the register values that have been read as part of the read instruction
    ReadWriteMultipleRegisters(Vec<Word>),

    /// Response to a ReadFifoQueue request.
    /// The parameter contains the queued register values, oldest first.
    ReadFifoQueue(Vec<Word>),

    /// Response to a ReadDeviceIdentification request.
    ReadDeviceIdentification(DeviceIdentification),

    /// Response to a raw Modbus request
    /// The first parameter contains the returned Modbus function code
    /// The second parameter contains the bytes of the response
    Custom(u8, Vec<u8>),

    /// No response is expected for the issued request, i.e. for a
    /// broadcast request or after forcing listen only mode. Synthesized
    /// locally, never appears on the wire.
    NoResponseExpected,
}

impl Response {
    /// Get the [`FunctionCode`] of the [`Response`].
    ///
    /// [`Response::NoResponseExpected`] is a local sentinel without a wire
    /// representation and maps to `FunctionCode::Custom(0)`.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;
        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            ReadExceptionStatus(_) => FunctionCode::ReadExceptionStatus,
            Diagnostics(_, _) => FunctionCode::Diagnostics,
            GetCommEventCounter(_, _) => FunctionCode::GetCommEventCounter,
            GetCommEventLog(_) => FunctionCode::GetCommEventLog,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,
            ReportServerId(_) => FunctionCode::ReportServerId,
            ReadFileRecord(_) => FunctionCode::ReadFileRecord,
            WriteFileRecord(_) => FunctionCode::WriteFileRecord,
            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
            ReadFifoQueue(_) => FunctionCode::ReadFifoQueue,
            ReadDeviceIdentification(_) => FunctionCode::ReadDeviceIdentification,
            Custom(code, _) => FunctionCode::Custom(*code),
            NoResponseExpected => FunctionCode::Custom(0),
        }
    }
}

/// A server (slave) exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B, also synthesized by the client after exhausting all retries
    /// without receiving a matching response.
    GatewayTargetDevice,
    /// None of the above.
    ///
    /// Although encoding one of the predefined values as this is possible,
    /// the result of such an attempt is undefined.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(from: u8) -> Self {
        use ExceptionCode::*;
        match from {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            code => Custom(code),
        }
    }
}

impl ExceptionCode {
    pub(crate) fn description(&self) -> &str {
        use ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub(crate) function: FunctionCode,
    pub(crate) exception: ExceptionCode,
}

impl ExceptionResponse {
    /// The function code of the request that caused the exception.
    #[must_use]
    pub const fn function(&self) -> FunctionCode {
        self.function
    }

    /// The exception code reported by the server.
    #[must_use]
    pub const fn exception(&self) -> ExceptionCode {
        self.exception
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// A Modbus request with the device id of the addressed device.
///
/// This is the server-side view of an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest<'a> {
    /// Device id of the addressed device, `0` for broadcast requests.
    pub device_id: DeviceId,
    /// The request to process.
    pub request: Request<'a>,
}

impl<'a> From<DeviceRequest<'a>> for Request<'a> {
    fn from(from: DeviceRequest<'a>) -> Self {
        from.request
    }
}

impl DeviceRequest<'_> {
    /// Converts the request into an owned instance with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> DeviceRequest<'static> {
        let Self { device_id, request } = self;
        DeviceRequest {
            device_id,
            request: request.into_owned(),
        }
    }
}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu<'a>(pub(crate) Request<'a>);

impl<'a> From<Request<'a>> for RequestPdu<'a> {
    fn from(from: Request<'a>) -> Self {
        RequestPdu(from)
    }
}

impl<'a> From<RequestPdu<'a>> for Request<'a> {
    fn from(from: RequestPdu<'a>) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

/// A response that may be intentionally suppressed, e.g. for broadcast
/// requests or while in listen only mode.
///
/// Server service implementations do not use this type directly; it is
/// the conversion target for both [`Response`] and `Option<Response>`
/// service responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalResponsePdu(pub(crate) Option<ResponsePdu>);

impl From<Response> for OptionalResponsePdu {
    fn from(from: Response) -> Self {
        match from {
            Response::NoResponseExpected => Self(None),
            response => Self(Some(response.into())),
        }
    }
}

impl From<Option<Response>> for OptionalResponsePdu {
    fn from(from: Option<Response>) -> Self {
        match from {
            Some(response) => response.into(),
            None => Self(None),
        }
    }
}

impl From<ExceptionResponse> for OptionalResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        Self(Some(from.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_values_roundtrip() {
        for code in [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0B, 0x0C, 0x0F, 0x10, 0x11, 0x14,
            0x15, 0x16, 0x17, 0x18, 0x2B, 0x41, 0x66,
        ] {
            assert_eq!(FunctionCode::new(code).value(), code);
        }
    }

    #[test]
    fn diagnostics_sub_function_roundtrip() {
        for value in 0x00..=0x16 {
            assert_eq!(DiagnosticsSubFunction::new(value).value(), value);
        }
        assert_eq!(
            DiagnosticsSubFunction::new(0x15),
            DiagnosticsSubFunction::Other(0x15)
        );
    }

    #[test]
    fn exception_code_roundtrip() {
        for value in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x08, 0x0A, 0x0B, 0x7F] {
            assert_eq!(u8::from(ExceptionCode::from(value)), value);
        }
    }

    #[test]
    fn display_exception_response() {
        let response = ExceptionResponse {
            function: FunctionCode::ReadDiscreteInputs,
            exception: ExceptionCode::IllegalDataValue,
        };
        assert_eq!(format!("{response}"), "Modbus function 2: Illegal data value");
    }

    #[test]
    fn suppressed_response_pdu() {
        let pdu: OptionalResponsePdu = Response::NoResponseExpected.into();
        assert!(pdu.0.is_none());
        let pdu: OptionalResponsePdu = Some(Response::ReadCoils(vec![true])).into();
        assert!(pdu.0.is_some());
        let pdu: OptionalResponsePdu = Option::<Response>::None.into();
        assert!(pdu.0.is_none());
    }
}
