// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request dispatch against a device store and control block
//!
//! Validates each request, applies it to the addressed device store (or
//! the control block for the serial line function codes) and produces
//! the response. Validation failures map to exception codes; the server
//! loop turns them into exception responses carrying the request's
//! function code.

use crate::{
    codec::{
        MAX_FIFO_COUNT, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_READ_WRITE_READ_REGISTERS,
        MAX_READ_WRITE_WRITE_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
    },
    datastore::{control::ControlBlock, DeviceStore, StoreError},
    frame::*,
};

// A response PDU must not exceed 253 bytes.
const MAX_RESPONSE_DATA_LEN: usize = 252;

impl From<StoreError> for ExceptionCode {
    fn from(from: StoreError) -> Self {
        match from {
            StoreError::InvalidAddress => ExceptionCode::IllegalDataAddress,
            StoreError::Reset => {
                log::error!("Device store requested a reset");
                ExceptionCode::ServerDeviceFailure
            }
        }
    }
}

fn checked_quantity(len: usize, max: Quantity) -> Result<Quantity, ExceptionCode> {
    let quantity = Quantity::try_from(len).map_err(|_| ExceptionCode::IllegalDataValue)?;
    if quantity < 1 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(quantity)
}

fn check_range(quantity: Quantity, max: Quantity) -> Result<(), ExceptionCode> {
    if quantity < 1 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn validated(
    store: &dyn DeviceStore,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
) -> Result<(), ExceptionCode> {
    if !store.validate(function, address, quantity) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

/// Apply one request to a device store, consulting and maintaining the
/// control block for the serial line function codes. `Ok(None)` means
/// that no response must be sent.
#[allow(clippy::too_many_lines)]
pub(crate) fn dispatch_request(
    request: &Request<'_>,
    store: &mut dyn DeviceStore,
    control: &mut ControlBlock,
) -> Result<Option<Response>, ExceptionCode> {
    use Request::*;

    let function = request.function_code();
    let response = match request {
        ReadCoils(address, quantity) => {
            check_range(*quantity, MAX_READ_BITS)?;
            validated(store, function, *address, *quantity)?;
            Response::ReadCoils(store.get_bits(function, *address, *quantity)?)
        }
        ReadDiscreteInputs(address, quantity) => {
            check_range(*quantity, MAX_READ_BITS)?;
            validated(store, function, *address, *quantity)?;
            Response::ReadDiscreteInputs(store.get_bits(function, *address, *quantity)?)
        }
        ReadHoldingRegisters(address, quantity) => {
            check_range(*quantity, MAX_READ_REGISTERS)?;
            validated(store, function, *address, *quantity)?;
            Response::ReadHoldingRegisters(store.get_registers(function, *address, *quantity)?)
        }
        ReadInputRegisters(address, quantity) => {
            check_range(*quantity, MAX_READ_REGISTERS)?;
            validated(store, function, *address, *quantity)?;
            Response::ReadInputRegisters(store.get_registers(function, *address, *quantity)?)
        }
        WriteSingleCoil(address, coil) => {
            validated(store, function, *address, 1)?;
            store.set_bits(function, *address, &[*coil])?;
            Response::WriteSingleCoil(*address, *coil)
        }
        WriteSingleRegister(address, word) => {
            validated(store, function, *address, 1)?;
            store.set_registers(function, *address, &[*word])?;
            Response::WriteSingleRegister(*address, *word)
        }
        WriteMultipleCoils(address, coils) => {
            let quantity = checked_quantity(coils.len(), MAX_WRITE_COILS)?;
            validated(store, function, *address, quantity)?;
            store.set_bits(function, *address, coils)?;
            Response::WriteMultipleCoils(*address, quantity)
        }
        WriteMultipleRegisters(address, words) => {
            let quantity = checked_quantity(words.len(), MAX_WRITE_REGISTERS)?;
            validated(store, function, *address, quantity)?;
            store.set_registers(function, *address, words)?;
            Response::WriteMultipleRegisters(*address, quantity)
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            validated(store, function, *address, 1)?;
            let current = store.get_registers(function, *address, 1)?[0];
            let value = (current & and_mask) | (or_mask & !and_mask);
            store.set_registers(function, *address, &[value])?;
            Response::MaskWriteRegister(*address, *and_mask, *or_mask)
        }
        ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
            check_range(*read_quantity, MAX_READ_WRITE_READ_REGISTERS)?;
            let write_quantity = checked_quantity(words.len(), MAX_READ_WRITE_WRITE_REGISTERS)?;
            validated(store, function, *write_address, write_quantity)?;
            validated(
                store,
                FunctionCode::ReadHoldingRegisters,
                *read_address,
                *read_quantity,
            )?;
            // The write operation is performed before the read.
            store.set_registers(function, *write_address, words)?;
            Response::ReadWriteMultipleRegisters(store.get_registers(
                FunctionCode::ReadHoldingRegisters,
                *read_address,
                *read_quantity,
            )?)
        }
        ReadExceptionStatus => Response::ReadExceptionStatus(control.exception_status),
        Diagnostics(sub_function, data) => return diagnostics(*sub_function, data, control),
        GetCommEventCounter => {
            Response::GetCommEventCounter(0x0000, control.counters.comm_event)
        }
        GetCommEventLog => {
            let events = control.event_log();
            Response::GetCommEventLog(CommEventLog {
                status: 0x0000,
                event_count: control.counters.comm_event,
                message_count: control.counters.bus_message,
                events,
            })
        }
        ReportServerId => Response::ReportServerId(ServerId {
            server_id: control.server_id,
            run_indicator: control.run_indicator,
            additional_data: control.additional_data.clone(),
        }),
        ReadFileRecord(refs) => {
            if refs.is_empty() {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let mut response_len = 1;
            let mut groups = Vec::with_capacity(refs.len());
            for record_ref in refs {
                check_range(record_ref.record_length, MAX_READ_REGISTERS)?;
                if record_ref.file_number == 0 {
                    return Err(ExceptionCode::IllegalDataAddress);
                }
                response_len += 2 + usize::from(record_ref.record_length) * 2;
                if response_len > MAX_RESPONSE_DATA_LEN {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                validated(
                    store,
                    function,
                    record_ref.record_number,
                    record_ref.record_length,
                )?;
                groups.push(store.get_registers(
                    function,
                    record_ref.record_number,
                    record_ref.record_length,
                )?);
            }
            Response::ReadFileRecord(groups)
        }
        WriteFileRecord(records) => {
            if records.is_empty() {
                return Err(ExceptionCode::IllegalDataValue);
            }
            for record in records {
                let quantity = checked_quantity(record.record_data.len(), MAX_READ_REGISTERS)?;
                if record.file_number == 0 {
                    return Err(ExceptionCode::IllegalDataAddress);
                }
                validated(store, function, record.record_number, quantity)?;
                store.set_registers(function, record.record_number, &record.record_data)?;
            }
            Response::WriteFileRecord(records.clone())
        }
        ReadFifoQueue(address) => {
            validated(store, function, *address, 1)?;
            let fifo_count = store.get_registers(function, *address, 1)?[0];
            if fifo_count > MAX_FIFO_COUNT {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let data = if fifo_count == 0 {
                Vec::new()
            } else {
                let data_address = address
                    .checked_add(1)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                validated(store, function, data_address, fifo_count)?;
                store.get_registers(function, data_address, fifo_count)?
            };
            Response::ReadFifoQueue(data)
        }
        ReadDeviceIdentification(read_code, object_id) => {
            return device_identification(*read_code, *object_id, control).map(Some);
        }
        Custom(_, _) => return Err(ExceptionCode::IllegalFunction),
    };
    Ok(Some(response))
}

#[allow(clippy::cast_possible_truncation)]
fn diagnostics(
    sub_function: DiagnosticsSubFunction,
    data: &[Word],
    control: &mut ControlBlock,
) -> Result<Option<Response>, ExceptionCode> {
    use DiagnosticsSubFunction::*;

    let echo = |data: &[Word]| data.to_vec();
    let counter = |value: u16| vec![value];
    let response_data = match sub_function {
        ReturnQueryData => echo(data),
        RestartCommunications => {
            control.restart_communications();
            echo(data)
        }
        ReturnDiagnosticRegister => counter(control.diagnostic_register),
        ChangeAsciiInputDelimiter => {
            let &[field] = data else {
                return Err(ExceptionCode::IllegalDataValue);
            };
            control.ascii_delimiter = (field >> 8) as u8;
            echo(data)
        }
        ForceListenOnlyMode => {
            control.listen_only = true;
            // No response is returned to this request.
            return Ok(None);
        }
        ClearCounters => {
            control.clear_counters();
            echo(data)
        }
        ReturnBusMessageCount => counter(control.counters.bus_message),
        ReturnBusCommunicationErrorCount => counter(control.counters.bus_communication_error),
        ReturnBusExceptionErrorCount => counter(control.counters.bus_exception_error),
        ReturnServerMessageCount => counter(control.counters.server_message),
        ReturnServerNoResponseCount => counter(control.counters.server_no_response),
        ReturnServerNakCount => counter(control.counters.server_nak),
        ReturnServerBusyCount => counter(control.counters.server_busy),
        ReturnBusCharacterOverrunCount => counter(control.counters.bus_character_overrun),
        ReturnIopOverrunCount => counter(0),
        ClearOverrunCounter => {
            control.counters.bus_character_overrun = 0;
            echo(data)
        }
        Other(_) => return Err(ExceptionCode::IllegalFunction),
    };
    Ok(Some(Response::Diagnostics(sub_function, response_data)))
}

fn device_identification(
    read_code: ReadDeviceIdCode,
    object_id: u8,
    control: &ControlBlock,
) -> Result<Response, ExceptionCode> {
    // Basic and regular objects can be streamed, extended objects live in
    // the private range.
    let range = match read_code {
        ReadDeviceIdCode::Basic => 0x00..=0x02,
        ReadDeviceIdCode::Regular => 0x00..=0x7F,
        ReadDeviceIdCode::Extended => 0x80..=0xFF,
        ReadDeviceIdCode::Specific => {
            let value = control
                .identity
                .get(object_id)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            return Ok(Response::ReadDeviceIdentification(DeviceIdentification {
                read_code,
                conformity_level: CONFORMITY_LEVEL,
                more_follows: false,
                next_object_id: 0,
                objects: vec![DeviceIdObject {
                    id: object_id,
                    value: value.to_vec(),
                }],
            }));
        }
    };

    // An unknown starting object restarts the stream at the beginning of
    // the category.
    let start = if control.identity.get(object_id).is_some() && range.contains(&object_id) {
        object_id
    } else {
        *range.start()
    };

    let mut response_len = 6;
    let mut more_follows = false;
    let mut next_object_id = 0;
    let mut objects = Vec::new();
    for (id, value) in control.identity.objects_in_range(start..=*range.end()) {
        response_len += 2 + value.len();
        if response_len > MAX_RESPONSE_DATA_LEN {
            more_follows = true;
            next_object_id = id;
            break;
        }
        objects.push(DeviceIdObject {
            id,
            value: value.to_vec(),
        });
    }

    Ok(Response::ReadDeviceIdentification(DeviceIdentification {
        read_code,
        conformity_level: CONFORMITY_LEVEL,
        more_follows,
        next_object_id,
        objects,
    }))
}

// Extended identification, both stream and individual access supported.
const CONFORMITY_LEVEL: u8 = 0x83;

#[cfg(test)]
mod tests {
    use super::*;

    use crate::datastore::{DeviceData, Sequential};

    fn store() -> DeviceData {
        DeviceData::new(
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::filled(0, 100, false)),
            Box::new(Sequential::filled(0, 100, 0)),
            Box::new(Sequential::filled(0, 100, 0)),
        )
        .with_zero_mode(true)
    }

    #[test]
    fn write_then_read_registers() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let write = Request::WriteMultipleRegisters(10, vec![1, 2, 3].into());
        let response = dispatch_request(&write, &mut store, &mut control).unwrap();
        assert_eq!(response, Some(Response::WriteMultipleRegisters(10, 3)));

        let read = Request::ReadHoldingRegisters(10, 3);
        let response = dispatch_request(&read, &mut store, &mut control).unwrap();
        assert_eq!(response, Some(Response::ReadHoldingRegisters(vec![1, 2, 3])));
    }

    #[test]
    fn out_of_range_quantity_is_an_illegal_value() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::ReadHoldingRegisters(0, 126);
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataValue);
        let request = Request::ReadCoils(0, 0);
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn out_of_range_address_is_an_illegal_address() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::ReadHoldingRegisters(90, 20);
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn mask_write_register_combines_masks() {
        let mut store = store();
        let mut control = ControlBlock::new();
        dispatch_request(
            &Request::WriteSingleRegister(4, 0x0012),
            &mut store,
            &mut control,
        )
        .unwrap();
        let request = Request::MaskWriteRegister(4, 0x00F2, 0x0025);
        let response = dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(response, Some(Response::MaskWriteRegister(4, 0x00F2, 0x0025)));
        let read = Request::ReadHoldingRegisters(4, 1);
        let response = dispatch_request(&read, &mut store, &mut control).unwrap();
        // (0x12 & 0xF2) | (0x25 & !0xF2) = 0x17
        assert_eq!(response, Some(Response::ReadHoldingRegisters(vec![0x0017])));
    }

    #[test]
    fn read_write_multiple_writes_before_reading() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::ReadWriteMultipleRegisters(5, 2, 5, vec![0xAA, 0xBB].into());
        let response = dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(
            response,
            Some(Response::ReadWriteMultipleRegisters(vec![0xAA, 0xBB]))
        );
    }

    #[test]
    fn force_listen_only_has_no_response() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::Diagnostics(
            DiagnosticsSubFunction::ForceListenOnlyMode,
            vec![0x0000].into(),
        );
        let response = dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(response, None);
        assert!(control.listen_only);
    }

    #[test]
    fn restart_communications_clears_listen_only() {
        let mut store = store();
        let mut control = ControlBlock::new();
        control.listen_only = true;
        control.counters.bus_message = 99;
        let request = Request::Diagnostics(
            DiagnosticsSubFunction::RestartCommunications,
            vec![0x0000].into(),
        );
        let response = dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(
            response,
            Some(Response::Diagnostics(
                DiagnosticsSubFunction::RestartCommunications,
                vec![0x0000]
            ))
        );
        assert!(!control.listen_only);
        assert_eq!(control.counters.bus_message, 0);
    }

    #[test]
    fn change_ascii_delimiter_stores_high_byte() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::Diagnostics(
            DiagnosticsSubFunction::ChangeAsciiInputDelimiter,
            vec![0x0A00].into(),
        );
        dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(control.ascii_delimiter, b'\n');
    }

    #[test]
    fn counter_queries_report_counters() {
        let mut store = store();
        let mut control = ControlBlock::new();
        control.counters.bus_message = 7;
        let request = Request::Diagnostics(
            DiagnosticsSubFunction::ReturnBusMessageCount,
            vec![0x0000].into(),
        );
        let response = dispatch_request(&request, &mut store, &mut control).unwrap();
        assert_eq!(
            response,
            Some(Response::Diagnostics(
                DiagnosticsSubFunction::ReturnBusMessageCount,
                vec![7]
            ))
        );
    }

    #[test]
    fn modbus_plus_diagnostics_are_rejected() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request =
            Request::Diagnostics(DiagnosticsSubFunction::Other(0x15), vec![0x0000].into());
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }

    #[test]
    fn fifo_queue_reads_count_then_data() {
        let mut store = store();
        let mut control = ControlBlock::new();
        dispatch_request(
            &Request::WriteMultipleRegisters(20, vec![2, 0x01B8, 0x1284].into()),
            &mut store,
            &mut control,
        )
        .unwrap();
        let response =
            dispatch_request(&Request::ReadFifoQueue(20), &mut store, &mut control).unwrap();
        assert_eq!(
            response,
            Some(Response::ReadFifoQueue(vec![0x01B8, 0x1284]))
        );
    }

    #[test]
    fn file_records_operate_on_holding_registers() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let write = Request::WriteFileRecord(vec![FileRecord {
            file_number: 4,
            record_number: 7,
            record_data: vec![0x06AF, 0x04BE],
        }]);
        dispatch_request(&write, &mut store, &mut control).unwrap();
        let read = Request::ReadFileRecord(vec![FileRecordRef {
            file_number: 4,
            record_number: 7,
            record_length: 2,
        }]);
        let response = dispatch_request(&read, &mut store, &mut control).unwrap();
        assert_eq!(
            response,
            Some(Response::ReadFileRecord(vec![vec![0x06AF, 0x04BE]]))
        );
    }

    #[test]
    fn device_identification_stream_and_specific() {
        let mut store = store();
        let mut control = ControlBlock::new();
        control.identity = crate::datastore::control::DeviceIdentity::basic(
            "Vendor",
            "Product",
            "v1.2.3",
        );
        let request = Request::ReadDeviceIdentification(ReadDeviceIdCode::Basic, 0);
        let response = dispatch_request(&request, &mut store, &mut control)
            .unwrap()
            .unwrap();
        let Response::ReadDeviceIdentification(id) = response else {
            panic!("unexpected response");
        };
        assert_eq!(id.objects.len(), 3);
        assert!(!id.more_follows);
        assert_eq!(id.objects[0].value, b"Vendor");

        let request = Request::ReadDeviceIdentification(ReadDeviceIdCode::Specific, 0x01);
        let response = dispatch_request(&request, &mut store, &mut control)
            .unwrap()
            .unwrap();
        let Response::ReadDeviceIdentification(id) = response else {
            panic!("unexpected response");
        };
        assert_eq!(id.objects.len(), 1);
        assert_eq!(id.objects[0].value, b"Product");

        let request = Request::ReadDeviceIdentification(ReadDeviceIdCode::Specific, 0x42);
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn unknown_function_code_is_illegal() {
        let mut store = store();
        let mut control = ControlBlock::new();
        let request = Request::Custom(0x41, vec![0x01].into());
        let err = dispatch_request(&request, &mut store, &mut control).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }
}
