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

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder};

use crate::{
    bytes::{Buf, BufMut, Bytes, BytesMut},
    frame::*,
};

#[cfg(any(feature = "rtu", feature = "ascii", feature = "tcp"))]
use {
    tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _},
    tokio_util::codec::Framed,
};

/// Maximum quantity of coils/discrete inputs in a read request.
pub(crate) const MAX_READ_BITS: u16 = 2000;

/// Maximum quantity of coils in a write multiple request.
pub(crate) const MAX_WRITE_COILS: u16 = 1968;

/// Maximum quantity of registers in a read request.
pub(crate) const MAX_READ_REGISTERS: u16 = 125;

/// Maximum quantity of registers in a write multiple request.
pub(crate) const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum quantity of registers on the read side of a read/write request.
pub(crate) const MAX_READ_WRITE_READ_REGISTERS: u16 = 125;

/// Maximum quantity of registers on the write side of a read/write request.
pub(crate) const MAX_READ_WRITE_WRITE_REGISTERS: u16 = 121;

/// Maximum FIFO queue length.
pub(crate) const MAX_FIFO_COUNT: u16 = 31;

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always succeed for valid PDUs, because
    // the length of a PDU is limited to u16.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always succeed for valid PDUs, because
    // the byte count of a PDU field is limited to u8.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

fn packed_coils_len(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

fn pack_coils(coils: &[Coil], bytes: &mut BytesMut) {
    let packed_size = packed_coils_len(coils.len());
    let mut res = vec![0; packed_size];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b);
        res[i / 8] |= v << (i % 8);
    }
    bytes.put_slice(&res);
}

fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0usize..count.into() {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn coil_to_bool(coil: u16) -> Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid coil value: 0x{other:0>4X}"),
        )),
    }
}

const fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

/// Frame length hint for a PDU with the given function code.
///
/// Stream framers without an external length field (RTU, TLS) use these
/// hints to know when a complete PDU has been buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduLength {
    /// The PDU always occupies the given number of bytes, including the
    /// function code byte.
    Fixed(usize),
    /// The PDU carries a byte count at the given offset (0 = function
    /// code byte); its total length is `offset + 1 + byte_count`.
    ByteCountAt(usize),
}

impl PduLength {
    fn resolve(self, pdu: &[u8]) -> Option<usize> {
        match self {
            Self::Fixed(len) => Some(len),
            Self::ByteCountAt(offset) => pdu
                .get(offset)
                .map(|&byte_count| offset + 1 + usize::from(byte_count)),
        }
    }
}

/// Registry of frame length hints for custom PDUs.
///
/// Custom function codes decode into [`Request::Custom`] and
/// [`Response::Custom`]. On framers that carry an explicit length field
/// (MBAP) this works out of the box; the RTU and TLS framers additionally
/// need to be told how long a custom PDU is before they can delimit it on
/// a byte stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PduLengths {
    requests: Vec<(u8, PduLength)>,
    responses: Vec<(u8, PduLength)>,
}

impl PduLengths {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the request and response frame lengths for a custom
    /// function code. A later registration for the same code wins.
    pub fn register(&mut self, function: u8, request: PduLength, response: PduLength) {
        self.requests.push((function, request));
        self.responses.push((function, response));
    }

    fn request_len(&self, function: u8) -> Option<PduLength> {
        self.requests
            .iter()
            .rev()
            .find_map(|(code, len)| (*code == function).then_some(*len))
    }

    fn response_len(&self, function: u8) -> Option<PduLength> {
        self.responses
            .iter()
            .rev()
            .find_map(|(code, len)| (*code == function).then_some(*len))
    }
}

/// Expected length of the request PDU starting at `pdu[0]` (the function
/// code byte). `Ok(None)` means that more data is needed.
#[cfg(any(feature = "rtu", feature = "tls"))]
pub(crate) fn request_pdu_len(pdu: &[u8], registry: &PduLengths) -> Result<Option<usize>> {
    let Some(&fn_code) = pdu.first() else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x06 | 0x08 => PduLength::Fixed(5),
        0x07 | 0x0B | 0x0C | 0x11 => PduLength::Fixed(1),
        0x0F | 0x10 => PduLength::ByteCountAt(5),
        0x14 | 0x15 => PduLength::ByteCountAt(1),
        0x16 => PduLength::Fixed(7),
        0x17 => PduLength::ByteCountAt(9),
        0x18 => PduLength::Fixed(3),
        0x2B => PduLength::Fixed(4),
        _ => match registry.request_len(fn_code) {
            Some(len) => len,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Invalid function code: 0x{fn_code:0>2X}"),
                ));
            }
        },
    };
    Ok(len.resolve(pdu))
}

/// Expected length of the response PDU starting at `pdu[0]` (the function
/// code byte). `Ok(None)` means that more data is needed.
#[cfg(any(feature = "rtu", feature = "tls"))]
pub(crate) fn response_pdu_len(pdu: &[u8], registry: &PduLengths) -> Result<Option<usize>> {
    let Some(&fn_code) = pdu.first() else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x04 | 0x0C | 0x11 | 0x14 | 0x15 | 0x17 => PduLength::ByteCountAt(1),
        0x05 | 0x06 | 0x08 | 0x0B | 0x0F | 0x10 => PduLength::Fixed(5),
        0x07 => PduLength::Fixed(2),
        0x16 => PduLength::Fixed(7),
        0x18 => {
            if pdu.len() < 3 {
                return Ok(None);
            }
            return Ok(Some(1 + 2 + usize::from(BigEndian::read_u16(&pdu[1..3]))));
        }
        0x2B => return Ok(mei_response_pdu_len(pdu)),
        0x81..=0xAB => PduLength::Fixed(2),
        _ => match registry.response_len(fn_code) {
            Some(len) => len,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Invalid function code: 0x{fn_code:0>2X}"),
                ));
            }
        },
    };
    Ok(len.resolve(pdu))
}

/// A Read Device Identification response has no overall length field and
/// must be walked object by object.
#[cfg(any(feature = "rtu", feature = "tls"))]
fn mei_response_pdu_len(pdu: &[u8]) -> Option<usize> {
    // fc, mei type, read code, conformity, more follows, next object id,
    // number of objects
    const OBJECTS_START: usize = 7;

    if pdu.len() < OBJECTS_START {
        return None;
    }
    let object_count = usize::from(pdu[6]);
    let mut index = OBJECTS_START;
    for _ in 0..object_count {
        let object_len = usize::from(*pdu.get(index + 1)?);
        index += 2 + object_len;
    }
    if pdu.len() < index {
        return None;
    }
    Some(index)
}

impl<'a> TryFrom<RequestPdu<'a>> for Bytes {
    type Error = Error;

    #[allow(clippy::too_many_lines)]
    fn try_from(pdu: RequestPdu<'a>) -> Result<Bytes> {
        use Request::*;

        let RequestPdu(request) = pdu;
        let fn_code = request.function_code().value();
        let mut data = BytesMut::with_capacity(8);
        data.put_u8(fn_code);
        match request {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadHoldingRegisters(address, quantity)
            | ReadInputRegisters(address, quantity) => {
                data.put_u16(address);
                data.put_u16(quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(address);
                data.put_u16(bool_to_coil(state));
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(address);
                data.put_u16(word);
            }
            ReadExceptionStatus | GetCommEventCounter | GetCommEventLog | ReportServerId => (),
            Diagnostics(sub_function, words) => {
                data.put_u16(sub_function.value());
                for w in words.as_ref() {
                    data.put_u16(*w);
                }
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(address);
                data.put_u16(u16_len(coils.len()));
                data.put_u8(u8_len(packed_coils_len(coils.len())));
                pack_coils(&coils, &mut data);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(address);
                data.put_u16(u16_len(words.len()));
                data.put_u8(u8_len(words.len() * 2));
                for w in words.as_ref() {
                    data.put_u16(*w);
                }
            }
            ReadFileRecord(refs) => {
                data.put_u8(u8_len(refs.len() * 7));
                for r in &refs {
                    data.put_u8(FILE_RECORD_REFERENCE_TYPE);
                    data.put_u16(r.file_number);
                    data.put_u16(r.record_number);
                    data.put_u16(r.record_length);
                }
            }
            WriteFileRecord(records) => {
                let byte_count = records
                    .iter()
                    .map(|r| 7 + r.record_data.len() * 2)
                    .sum::<usize>();
                data.put_u8(u8_len(byte_count));
                for r in &records {
                    data.put_u8(FILE_RECORD_REFERENCE_TYPE);
                    data.put_u16(r.file_number);
                    data.put_u16(r.record_number);
                    data.put_u16(u16_len(r.record_data.len()));
                    for w in &r.record_data {
                        data.put_u16(*w);
                    }
                }
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(address);
                data.put_u16(and_mask);
                data.put_u16(or_mask);
            }
            ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                data.put_u16(read_address);
                data.put_u16(quantity);
                data.put_u16(write_address);
                data.put_u16(u16_len(words.len()));
                data.put_u8(u8_len(words.len() * 2));
                for w in words.as_ref() {
                    data.put_u16(*w);
                }
            }
            ReadFifoQueue(address) => {
                data.put_u16(address);
            }
            ReadDeviceIdentification(read_code, object_id) => {
                data.put_u8(MEI_TYPE_DEVICE_IDENTIFICATION);
                data.put_u8(read_code.value());
                data.put_u8(object_id);
            }
            Custom(_, custom_data) => {
                data.put_slice(&custom_data);
            }
        }
        Ok(data.freeze())
    }
}

const FILE_RECORD_REFERENCE_TYPE: u8 = 6;
const MEI_TYPE_DEVICE_IDENTIFICATION: u8 = 0x0E;

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Bytes {
        use Response::*;

        let ResponsePdu(result) = pdu;
        let mut data = BytesMut::with_capacity(8);
        match result {
            Err(ExceptionResponse {
                function,
                exception,
            }) => {
                data.put_u8(function.value() | 0x80);
                data.put_u8(exception.into());
            }
            Ok(response) => {
                data.put_u8(response.function_code().value());
                match response {
                    ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                        data.put_u8(u8_len(packed_coils_len(coils.len())));
                        pack_coils(&coils, &mut data);
                    }
                    ReadHoldingRegisters(words)
                    | ReadInputRegisters(words)
                    | ReadWriteMultipleRegisters(words) => {
                        data.put_u8(u8_len(words.len() * 2));
                        for w in &words {
                            data.put_u16(*w);
                        }
                    }
                    WriteSingleCoil(address, state) => {
                        data.put_u16(address);
                        data.put_u16(bool_to_coil(state));
                    }
                    WriteSingleRegister(address, word) => {
                        data.put_u16(address);
                        data.put_u16(word);
                    }
                    ReadExceptionStatus(status) => {
                        data.put_u8(status);
                    }
                    Diagnostics(sub_function, words) => {
                        data.put_u16(sub_function.value());
                        for w in &words {
                            data.put_u16(*w);
                        }
                    }
                    GetCommEventCounter(status, event_count) => {
                        data.put_u16(status);
                        data.put_u16(event_count);
                    }
                    GetCommEventLog(log) => {
                        data.put_u8(u8_len(6 + log.events.len()));
                        data.put_u16(log.status);
                        data.put_u16(log.event_count);
                        data.put_u16(log.message_count);
                        data.put_slice(&log.events);
                    }
                    WriteMultipleCoils(address, quantity)
                    | WriteMultipleRegisters(address, quantity) => {
                        data.put_u16(address);
                        data.put_u16(quantity);
                    }
                    ReportServerId(server_id) => {
                        data.put_u8(u8_len(2 + server_id.additional_data.len()));
                        data.put_u8(server_id.server_id);
                        data.put_u8(if server_id.run_indicator { 0xFF } else { 0x00 });
                        data.put_slice(&server_id.additional_data);
                    }
                    ReadFileRecord(groups) => {
                        let byte_count = groups
                            .iter()
                            .map(|words| 2 + words.len() * 2)
                            .sum::<usize>();
                        data.put_u8(u8_len(byte_count));
                        for words in &groups {
                            data.put_u8(u8_len(1 + words.len() * 2));
                            data.put_u8(FILE_RECORD_REFERENCE_TYPE);
                            for w in words {
                                data.put_u16(*w);
                            }
                        }
                    }
                    WriteFileRecord(records) => {
                        let byte_count = records
                            .iter()
                            .map(|r| 7 + r.record_data.len() * 2)
                            .sum::<usize>();
                        data.put_u8(u8_len(byte_count));
                        for r in &records {
                            data.put_u8(FILE_RECORD_REFERENCE_TYPE);
                            data.put_u16(r.file_number);
                            data.put_u16(r.record_number);
                            data.put_u16(u16_len(r.record_data.len()));
                            for w in &r.record_data {
                                data.put_u16(*w);
                            }
                        }
                    }
                    MaskWriteRegister(address, and_mask, or_mask) => {
                        data.put_u16(address);
                        data.put_u16(and_mask);
                        data.put_u16(or_mask);
                    }
                    ReadFifoQueue(words) => {
                        data.put_u16(u16_len(2 + words.len() * 2));
                        data.put_u16(u16_len(words.len()));
                        for w in &words {
                            data.put_u16(*w);
                        }
                    }
                    ReadDeviceIdentification(id) => {
                        data.put_u8(MEI_TYPE_DEVICE_IDENTIFICATION);
                        data.put_u8(id.read_code.value());
                        data.put_u8(id.conformity_level);
                        data.put_u8(if id.more_follows { 0xFF } else { 0x00 });
                        data.put_u8(id.next_object_id);
                        data.put_u8(u8_len(id.objects.len()));
                        for object in &id.objects {
                            data.put_u8(object.id);
                            data.put_u8(u8_len(object.value.len()));
                            data.put_slice(&object.value);
                        }
                    }
                    Custom(_, custom_data) => {
                        data.put_slice(&custom_data);
                    }
                    NoResponseExpected => {
                        // A suppressed response must be filtered out before
                        // encoding; emit nothing.
                        debug_assert!(false, "NoResponseExpected must not be encoded");
                        data.clear();
                    }
                }
            }
        }
        data.freeze()
    }
}

impl TryFrom<Bytes> for Request<'static> {
    type Error = Error;

    #[allow(clippy::too_many_lines)]
    fn try_from(bytes: Bytes) -> Result<Self> {
        use Request::*;

        if bytes.is_empty() {
            return Err(Error::new(ErrorKind::InvalidData, "Empty PDU"));
        }
        let fn_code = bytes[0];
        let request = match fn_code {
            0x01..=0x04 => {
                check_pdu_size(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                match fn_code {
                    0x01 => ReadCoils(address, quantity),
                    0x02 => ReadDiscreteInputs(address, quantity),
                    0x03 => ReadHoldingRegisters(address, quantity),
                    _ => ReadInputRegisters(address, quantity),
                }
            }
            0x05 => {
                check_pdu_size(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let state = coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?;
                WriteSingleCoil(address, state)
            }
            0x06 => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x07 => ReadExceptionStatus,
            0x08 => {
                check_pdu_size(&bytes, 3)?;
                let sub_function = DiagnosticsSubFunction::new(BigEndian::read_u16(&bytes[1..3]));
                let words = decode_words(&bytes[3..])?;
                Diagnostics(sub_function, words.into())
            }
            0x0B => GetCommEventCounter,
            0x0C => GetCommEventLog,
            0x0F => {
                check_pdu_size(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = usize::from(bytes[5]);
                if byte_count != packed_coils_len(quantity.into()) || bytes.len() < 6 + byte_count {
                    return Err(byte_count_mismatch());
                }
                WriteMultipleCoils(address, unpack_coils(&bytes[6..], quantity).into())
            }
            0x10 => {
                check_pdu_size(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = usize::from(BigEndian::read_u16(&bytes[3..5]));
                let byte_count = usize::from(bytes[5]);
                if byte_count != quantity * 2 || bytes.len() < 6 + byte_count {
                    return Err(byte_count_mismatch());
                }
                let words = decode_words(&bytes[6..6 + byte_count])?;
                WriteMultipleRegisters(address, words.into())
            }
            0x11 => ReportServerId,
            0x14 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if byte_count % 7 != 0 || bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                let mut refs = Vec::with_capacity(byte_count / 7);
                for group in bytes[2..2 + byte_count].chunks_exact(7) {
                    check_file_record_reference_type(group[0])?;
                    refs.push(FileRecordRef {
                        file_number: BigEndian::read_u16(&group[1..3]),
                        record_number: BigEndian::read_u16(&group[3..5]),
                        record_length: BigEndian::read_u16(&group[5..7]),
                    });
                }
                ReadFileRecord(refs)
            }
            0x15 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                WriteFileRecord(decode_file_records(&bytes[2..2 + byte_count])?)
            }
            0x16 => {
                check_pdu_size(&bytes, 7)?;
                MaskWriteRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                    BigEndian::read_u16(&bytes[5..7]),
                )
            }
            0x17 => {
                check_pdu_size(&bytes, 10)?;
                let read_address = BigEndian::read_u16(&bytes[1..3]);
                let read_quantity = BigEndian::read_u16(&bytes[3..5]);
                let write_address = BigEndian::read_u16(&bytes[5..7]);
                let write_quantity = usize::from(BigEndian::read_u16(&bytes[7..9]));
                let byte_count = usize::from(bytes[9]);
                if byte_count != write_quantity * 2 || bytes.len() < 10 + byte_count {
                    return Err(byte_count_mismatch());
                }
                let words = decode_words(&bytes[10..10 + byte_count])?;
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words.into())
            }
            0x18 => {
                check_pdu_size(&bytes, 3)?;
                ReadFifoQueue(BigEndian::read_u16(&bytes[1..3]))
            }
            0x2B => {
                check_pdu_size(&bytes, 4)?;
                match (bytes[1], ReadDeviceIdCode::new(bytes[2])) {
                    (MEI_TYPE_DEVICE_IDENTIFICATION, Some(read_code)) => {
                        ReadDeviceIdentification(read_code, bytes[3])
                    }
                    // Unknown MEI type or read code: let the server answer
                    // with an exception instead of tearing the connection.
                    _ => Custom(fn_code, bytes[1..].to_vec().into()),
                }
            }
            _ => Custom(fn_code, bytes[1..].to_vec().into()),
        };
        Ok(request)
    }
}

impl TryFrom<Bytes> for RequestPdu<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        Ok(RequestPdu(Request::try_from(bytes)?))
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    #[allow(clippy::too_many_lines)]
    fn try_from(bytes: Bytes) -> Result<Self> {
        use Response::*;

        if bytes.is_empty() {
            return Err(Error::new(ErrorKind::InvalidData, "Empty PDU"));
        }
        let fn_code = bytes[0];
        let response = match fn_code {
            0x01 | 0x02 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                // Return a multiple of 8 bits; only the caller knows the
                // requested quantity.
                let coils = unpack_coils(&bytes[2..], u16_len(byte_count * 8));
                if fn_code == 0x01 {
                    ReadCoils(coils)
                } else {
                    ReadDiscreteInputs(coils)
                }
            }
            0x03 | 0x04 | 0x17 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                let words = decode_words(&bytes[2..2 + byte_count])?;
                match fn_code {
                    0x03 => ReadHoldingRegisters(words),
                    0x04 => ReadInputRegisters(words),
                    _ => ReadWriteMultipleRegisters(words),
                }
            }
            0x05 => {
                check_pdu_size(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let state = coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?;
                WriteSingleCoil(address, state)
            }
            0x06 => {
                check_pdu_size(&bytes, 5)?;
                WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x07 => {
                check_pdu_size(&bytes, 2)?;
                ReadExceptionStatus(bytes[1])
            }
            0x08 => {
                check_pdu_size(&bytes, 3)?;
                let sub_function = DiagnosticsSubFunction::new(BigEndian::read_u16(&bytes[1..3]));
                Diagnostics(sub_function, decode_words(&bytes[3..])?)
            }
            0x0B => {
                check_pdu_size(&bytes, 5)?;
                GetCommEventCounter(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x0C => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if byte_count < 6 || bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                GetCommEventLog(CommEventLog {
                    status: BigEndian::read_u16(&bytes[2..4]),
                    event_count: BigEndian::read_u16(&bytes[4..6]),
                    message_count: BigEndian::read_u16(&bytes[6..8]),
                    events: bytes[8..2 + byte_count].to_vec(),
                })
            }
            0x0F | 0x10 => {
                check_pdu_size(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                if fn_code == 0x0F {
                    WriteMultipleCoils(address, quantity)
                } else {
                    WriteMultipleRegisters(address, quantity)
                }
            }
            0x11 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if byte_count < 2 || bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                ReportServerId(ServerId {
                    server_id: bytes[2],
                    run_indicator: bytes[3] == 0xFF,
                    additional_data: bytes[4..2 + byte_count].to_vec(),
                })
            }
            0x14 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                let mut groups = Vec::new();
                let mut rest = &bytes[2..2 + byte_count];
                while !rest.is_empty() {
                    if rest.len() < 2 {
                        return Err(byte_count_mismatch());
                    }
                    let group_len = usize::from(rest[0]);
                    check_file_record_reference_type(rest[1])?;
                    if group_len < 1 || rest.len() < 1 + group_len {
                        return Err(byte_count_mismatch());
                    }
                    groups.push(decode_words(&rest[2..1 + group_len])?);
                    rest = &rest[1 + group_len..];
                }
                ReadFileRecord(groups)
            }
            0x15 => {
                check_pdu_size(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                if bytes.len() < 2 + byte_count {
                    return Err(byte_count_mismatch());
                }
                WriteFileRecord(decode_file_records(&bytes[2..2 + byte_count])?)
            }
            0x16 => {
                check_pdu_size(&bytes, 7)?;
                MaskWriteRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                    BigEndian::read_u16(&bytes[5..7]),
                )
            }
            0x18 => {
                check_pdu_size(&bytes, 5)?;
                let byte_count = usize::from(BigEndian::read_u16(&bytes[1..3]));
                let fifo_count = BigEndian::read_u16(&bytes[3..5]);
                if fifo_count > MAX_FIFO_COUNT
                    || byte_count != 2 + usize::from(fifo_count) * 2
                    || bytes.len() < 3 + byte_count
                {
                    return Err(byte_count_mismatch());
                }
                ReadFifoQueue(decode_words(&bytes[5..3 + byte_count])?)
            }
            0x2B => {
                check_pdu_size(&bytes, 7)?;
                if bytes[1] != MEI_TYPE_DEVICE_IDENTIFICATION {
                    return Ok(Custom(fn_code, bytes[1..].to_vec()));
                }
                let read_code = ReadDeviceIdCode::new(bytes[2]).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidData, "Invalid device id read code")
                })?;
                let object_count = usize::from(bytes[6]);
                let mut objects = Vec::with_capacity(object_count);
                let mut index = 7;
                for _ in 0..object_count {
                    if bytes.len() < index + 2 {
                        return Err(byte_count_mismatch());
                    }
                    let object_len = usize::from(bytes[index + 1]);
                    if bytes.len() < index + 2 + object_len {
                        return Err(byte_count_mismatch());
                    }
                    objects.push(DeviceIdObject {
                        id: bytes[index],
                        value: bytes[index + 2..index + 2 + object_len].to_vec(),
                    });
                    index += 2 + object_len;
                }
                ReadDeviceIdentification(DeviceIdentification {
                    read_code,
                    conformity_level: bytes[3],
                    more_follows: bytes[4] == 0xFF,
                    next_object_id: bytes[5],
                    objects,
                })
            }
            _ => Custom(fn_code, bytes[1..].to_vec()),
        };
        Ok(response)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::new(ErrorKind::InvalidData, "Empty PDU"));
        }
        let fn_code = bytes[0];
        if fn_code > 0x80 {
            check_pdu_size(&bytes, 2)?;
            let exception = ExceptionCode::from(bytes[1]);
            return Ok(ResponsePdu(Err(ExceptionResponse {
                function: FunctionCode::new(fn_code & 0x7F),
                exception,
            })));
        }
        Ok(ResponsePdu(Ok(Response::try_from(bytes)?)))
    }
}

fn check_pdu_size(bytes: &Bytes, min: usize) -> Result<()> {
    if bytes.len() < min {
        return Err(Error::new(ErrorKind::InvalidData, "Truncated PDU"));
    }
    Ok(())
}

fn byte_count_mismatch() -> Error {
    Error::new(ErrorKind::InvalidData, "Invalid byte count")
}

fn check_file_record_reference_type(reference_type: u8) -> Result<()> {
    if reference_type != FILE_RECORD_REFERENCE_TYPE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid file record reference type: {reference_type}"),
        ));
    }
    Ok(())
}

fn decode_words(bytes: &[u8]) -> Result<Vec<Word>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "Odd number of data bytes",
        ));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| BigEndian::read_u16(chunk))
        .collect())
}

fn decode_file_records(mut rest: &[u8]) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    while !rest.is_empty() {
        if rest.len() < 7 {
            return Err(byte_count_mismatch());
        }
        check_file_record_reference_type(rest[0])?;
        let record_length = usize::from(BigEndian::read_u16(&rest[5..7]));
        if rest.len() < 7 + record_length * 2 {
            return Err(byte_count_mismatch());
        }
        records.push(FileRecord {
            file_number: BigEndian::read_u16(&rest[1..3]),
            record_number: BigEndian::read_u16(&rest[3..5]),
            record_data: decode_words(&rest[7..7 + record_length * 2])?,
        });
        rest = &rest[7 + record_length * 2..];
    }
    Ok(records)
}

/// Gracefully shut down the transport behind a framed connection.
#[cfg(any(feature = "rtu", feature = "ascii", feature = "tcp"))]
pub(crate) async fn disconnect_framed<T, C>(framed: Framed<T, C>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = framed.into_inner();
    transport.shutdown().await.or_else(|err| match err.kind() {
        ErrorKind::NotConnected | ErrorKind::BrokenPipe => Ok(()),
        _ => Err(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_coils() {
        let coils = vec![
            true, false, true, true, false, false, true, false, true, false, true,
        ];
        let mut bytes = BytesMut::new();
        pack_coils(&coils, &mut bytes);
        assert_eq!(bytes.len(), 2);
        let unpacked = unpack_coils(&bytes, u16_len(coils.len()));
        assert_eq!(unpacked, coils);
    }

    #[test]
    fn pack_coils_pads_high_order_bits() {
        let coils = vec![true; 21];
        let mut bytes = BytesMut::new();
        pack_coils(&coils, &mut bytes);
        assert_eq!(&bytes[..], &[0xFF, 0xFF, 0x1F]);
        let unpacked = unpack_coils(&bytes, 24);
        assert_eq!(&unpacked[..21], &[true; 21]);
        assert_eq!(&unpacked[21..], &[false; 3]);
    }

    #[test]
    fn encode_read_request_pdu() {
        let pdu = RequestPdu(Request::ReadHoldingRegisters(0x082B, 2));
        let bytes: Bytes = pdu.try_into().unwrap();
        assert_eq!(&bytes[..], &[0x03, 0x08, 0x2B, 0x00, 0x02]);
    }

    #[test]
    fn encode_write_single_coil_pdu() {
        let pdu = RequestPdu(Request::WriteSingleCoil(0x00AC, true));
        let bytes: Bytes = pdu.try_into().unwrap();
        assert_eq!(&bytes[..], &[0x05, 0x00, 0xAC, 0xFF, 0x00]);
    }

    #[test]
    fn encode_mask_write_register_pdu() {
        let pdu = RequestPdu(Request::MaskWriteRegister(0x0004, 0x00F2, 0x0025));
        let bytes: Bytes = pdu.try_into().unwrap();
        assert_eq!(&bytes[..], &[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]);
    }

    #[test]
    fn encode_diagnostics_pdu() {
        let pdu = RequestPdu(Request::Diagnostics(
            DiagnosticsSubFunction::ReturnQueryData,
            vec![0xA537].into(),
        ));
        let bytes: Bytes = pdu.try_into().unwrap();
        assert_eq!(&bytes[..], &[0x08, 0x00, 0x00, 0xA5, 0x37]);
    }

    #[test]
    fn decode_read_coils_response_keeps_padding() {
        let bytes = Bytes::from_static(&[0x01, 0x01, 0b0000_0101]);
        let rsp = Response::try_from(bytes).unwrap();
        assert_eq!(
            rsp,
            Response::ReadCoils(vec![true, false, true, false, false, false, false, false])
        );
    }

    #[test]
    fn decode_exception_response() {
        let bytes = Bytes::from_static(&[0x81, 0x02]);
        let ResponsePdu(result) = ResponsePdu::try_from(bytes).unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.function(), FunctionCode::ReadCoils);
        assert_eq!(err.exception(), ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn request_roundtrip_all_function_codes() {
        let requests: Vec<Request<'static>> = vec![
            Request::ReadCoils(1, 8),
            Request::ReadDiscreteInputs(2, 9),
            Request::ReadHoldingRegisters(3, 10),
            Request::ReadInputRegisters(4, 11),
            Request::WriteSingleCoil(5, true),
            Request::WriteSingleRegister(6, 0x1234),
            Request::ReadExceptionStatus,
            Request::Diagnostics(
                DiagnosticsSubFunction::ReturnBusMessageCount,
                vec![0x0000].into(),
            ),
            Request::GetCommEventCounter,
            Request::GetCommEventLog,
            Request::WriteMultipleCoils(7, vec![true, false, true].into()),
            Request::WriteMultipleRegisters(8, vec![0x0102, 0x0304].into()),
            Request::ReportServerId,
            Request::ReadFileRecord(vec![FileRecordRef {
                file_number: 4,
                record_number: 1,
                record_length: 2,
            }]),
            Request::WriteFileRecord(vec![FileRecord {
                file_number: 4,
                record_number: 7,
                record_data: vec![0x06AF, 0x04BE],
            }]),
            Request::MaskWriteRegister(9, 0x00F2, 0x0025),
            Request::ReadWriteMultipleRegisters(10, 2, 11, vec![0x0A0B].into()),
            Request::ReadFifoQueue(12),
            Request::ReadDeviceIdentification(ReadDeviceIdCode::Basic, 0),
            Request::Custom(0x41, vec![0x01, 0x02].into()),
        ];
        for request in requests {
            let bytes: Bytes = RequestPdu(request.clone()).try_into().unwrap();
            let decoded = Request::try_from(bytes).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn response_roundtrip_all_function_codes() {
        let responses = vec![
            Response::ReadCoils(vec![true; 8]),
            Response::ReadDiscreteInputs(vec![false; 8]),
            Response::ReadHoldingRegisters(vec![0x1122, 0x3344]),
            Response::ReadInputRegisters(vec![0x5566]),
            Response::WriteSingleCoil(1, false),
            Response::WriteSingleRegister(2, 0x0809),
            Response::ReadExceptionStatus(0x6D),
            Response::Diagnostics(DiagnosticsSubFunction::ReturnQueryData, vec![0xA537]),
            Response::GetCommEventCounter(0x0000, 0x0108),
            Response::GetCommEventLog(CommEventLog {
                status: 0x0000,
                event_count: 0x0108,
                message_count: 0x0121,
                events: vec![0x20, 0x00],
            }),
            Response::WriteMultipleCoils(3, 4),
            Response::WriteMultipleRegisters(5, 6),
            Response::ReportServerId(ServerId {
                server_id: 0x11,
                run_indicator: true,
                additional_data: b"modbus".to_vec(),
            }),
            Response::ReadFileRecord(vec![vec![0x0DFE, 0x0020], vec![0x33CD]]),
            Response::WriteFileRecord(vec![FileRecord {
                file_number: 4,
                record_number: 7,
                record_data: vec![0x06AF],
            }]),
            Response::MaskWriteRegister(7, 0x00F2, 0x0025),
            Response::ReadWriteMultipleRegisters(vec![0x0A0B, 0x0C0D]),
            Response::ReadFifoQueue(vec![0x01B8, 0x1284]),
            Response::ReadDeviceIdentification(DeviceIdentification {
                read_code: ReadDeviceIdCode::Basic,
                conformity_level: 0x81,
                more_follows: false,
                next_object_id: 0,
                objects: vec![DeviceIdObject {
                    id: 0x00,
                    value: b"Company".to_vec(),
                }],
            }),
            Response::Custom(0x41, vec![0x01, 0x02]),
        ];
        for response in responses {
            let bytes: Bytes = ResponsePdu(Ok(response.clone())).into();
            let decoded = Response::try_from(bytes).unwrap();
            assert_eq!(decoded, response);
        }
    }

    #[cfg(feature = "rtu")]
    mod pdu_len {
        use super::*;

        #[test]
        fn request_lengths() {
            let registry = PduLengths::default();
            let mut pdu = [0u8; 12];

            pdu[0] = 0x66;
            assert!(request_pdu_len(&pdu, &registry).is_err());

            for fn_code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x08] {
                pdu[0] = fn_code;
                assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(5));
            }

            for fn_code in [0x07, 0x0B, 0x0C, 0x11] {
                pdu[0] = fn_code;
                assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(1));
            }

            pdu[0] = 0x0F;
            pdu[5] = 99;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(105));

            pdu[0] = 0x10;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(105));

            pdu[0] = 0x14;
            pdu[1] = 14;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(16));

            pdu[0] = 0x16;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(7));

            pdu[0] = 0x17;
            pdu[9] = 4;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(14));

            pdu[0] = 0x18;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(3));

            pdu[0] = 0x2B;
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(4));
        }

        #[test]
        fn response_lengths() {
            let registry = PduLengths::default();
            let mut pdu = [0u8; 12];

            pdu[0] = 0x66;
            assert!(response_pdu_len(&pdu, &registry).is_err());

            for fn_code in [0x01, 0x02, 0x03, 0x04, 0x0C, 0x11, 0x17] {
                pdu[0] = fn_code;
                pdu[1] = 4;
                assert_eq!(response_pdu_len(&pdu, &registry).unwrap(), Some(6));
            }

            for fn_code in [0x05, 0x06, 0x08, 0x0B, 0x0F, 0x10] {
                pdu[0] = fn_code;
                assert_eq!(response_pdu_len(&pdu, &registry).unwrap(), Some(5));
            }

            pdu[0] = 0x18;
            pdu[1] = 0x00;
            pdu[2] = 0x06;
            assert_eq!(response_pdu_len(&pdu, &registry).unwrap(), Some(9));

            for fn_code in 0x81..0xAB {
                pdu[0] = fn_code;
                assert_eq!(response_pdu_len(&pdu, &registry).unwrap(), Some(2));
            }
        }

        #[test]
        fn mei_response_length_walks_objects() {
            // fc, mei, read code, conformity, more, next, count
            let mut pdu = vec![0x2B, 0x0E, 0x01, 0x81, 0x00, 0x00, 0x02];
            pdu.extend_from_slice(&[0x00, 0x03, b'a', b'b', b'c']);
            assert_eq!(
                response_pdu_len(&pdu, &PduLengths::default()).unwrap(),
                None
            );
            pdu.extend_from_slice(&[0x01, 0x01, b'x']);
            assert_eq!(
                response_pdu_len(&pdu, &PduLengths::default()).unwrap(),
                Some(15)
            );
        }

        #[test]
        fn custom_registry_lengths() {
            let mut registry = PduLengths::new();
            registry.register(0x41, PduLength::Fixed(3), PduLength::ByteCountAt(1));

            let pdu = [0x41, 0x00, 0x00];
            assert_eq!(request_pdu_len(&pdu, &registry).unwrap(), Some(3));
            let pdu = [0x41, 0x04, 0, 0, 0, 0];
            assert_eq!(response_pdu_len(&pdu, &registry).unwrap(), Some(6));
        }
    }
}
