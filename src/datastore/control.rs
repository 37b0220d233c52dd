// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-server diagnostic and identification state
//!
//! The serial line function codes (Read Exception Status, Diagnostics,
//! Get Comm Event Counter/Log, Report Server ID) and the Read Device
//! Identification MEI operate on this state instead of the register file.
//! Every server owns exactly one [`ControlBlock`]; there are no process
//! globals.

use std::collections::{BTreeMap, VecDeque};

/// The communication event log keeps the 64 most recent events.
const MAX_EVENT_LOG: usize = 64;

/// Diagnostic counters as defined by the serial line specification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages seen on the bus, addressed to anyone.
    pub bus_message: u16,
    /// Corrupt frames seen on the bus.
    pub bus_communication_error: u16,
    /// Exception responses returned by this server.
    pub bus_exception_error: u16,
    /// Messages addressed to this server.
    pub server_message: u16,
    /// Broadcasts and other messages answered without a response.
    pub server_no_response: u16,
    /// Negative acknowledge exceptions returned.
    pub server_nak: u16,
    /// Server busy exceptions returned.
    pub server_busy: u16,
    /// Character overruns on the bus.
    pub bus_character_overrun: u16,
    /// Successfully completed message cycles.
    pub comm_event: u16,
}

/// Identification objects for the Read Device Identification MEI.
///
/// Object ids 0x00 - 0x02 form the mandatory basic category, 0x03 - 0x06
/// the regular category and 0x80 - 0xFF the private extended category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    objects: BTreeMap<u8, Vec<u8>>,
}

impl DeviceIdentity {
    /// Object id of the vendor name.
    pub const VENDOR_NAME: u8 = 0x00;
    /// Object id of the product code.
    pub const PRODUCT_CODE: u8 = 0x01;
    /// Object id of the major/minor revision.
    pub const MAJOR_MINOR_REVISION: u8 = 0x02;
    /// Object id of the vendor URL.
    pub const VENDOR_URL: u8 = 0x03;
    /// Object id of the product name.
    pub const PRODUCT_NAME: u8 = 0x04;
    /// Object id of the model name.
    pub const MODEL_NAME: u8 = 0x05;
    /// Object id of the user application name.
    pub const USER_APPLICATION_NAME: u8 = 0x06;

    /// Create an identity carrying the three mandatory basic objects.
    #[must_use]
    pub fn basic(
        vendor_name: impl Into<Vec<u8>>,
        product_code: impl Into<Vec<u8>>,
        revision: impl Into<Vec<u8>>,
    ) -> Self {
        let mut identity = Self::default();
        identity.insert(Self::VENDOR_NAME, vendor_name);
        identity.insert(Self::PRODUCT_CODE, product_code);
        identity.insert(Self::MAJOR_MINOR_REVISION, revision);
        identity
    }

    /// Insert or replace an identification object.
    pub fn insert(&mut self, id: u8, value: impl Into<Vec<u8>>) {
        self.objects.insert(id, value.into());
    }

    /// Look up an identification object.
    #[must_use]
    pub fn get(&self, id: u8) -> Option<&[u8]> {
        self.objects.get(&id).map(Vec::as_slice)
    }

    /// All objects with an id inside the given range, ordered by id.
    pub(crate) fn objects_in_range(
        &self,
        range: std::ops::RangeInclusive<u8>,
    ) -> impl Iterator<Item = (u8, &[u8])> {
        self.objects
            .range(range)
            .map(|(id, value)| (*id, value.as_slice()))
    }
}

/// Diagnostic and identification state of one server.
#[derive(Debug, Clone)]
pub struct ControlBlock {
    /// Diagnostic counters, maintained by the server loop.
    pub counters: Counters,
    /// The 16 bit diagnostic register returned by sub-function 0x02.
    pub diagnostic_register: u16,
    /// End of frame delimiter used by the ASCII framer, changed by
    /// sub-function 0x03 (high byte of the data field).
    pub ascii_delimiter: u8,
    /// While set, only the Restart Communications diagnostic is answered.
    pub listen_only: bool,
    /// The eight exception status outputs returned by function 0x07.
    pub exception_status: u8,
    /// Server id byte reported by function 0x11.
    pub server_id: u8,
    /// Run indicator reported by function 0x11.
    pub run_indicator: bool,
    /// Additional device specific data reported by function 0x11.
    pub additional_data: Vec<u8>,
    /// Identification objects for the 0x2B/0x0E MEI.
    pub identity: DeviceIdentity,
    event_log: VecDeque<u8>,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self {
            counters: Counters::default(),
            diagnostic_register: 0,
            ascii_delimiter: b'\r',
            listen_only: false,
            exception_status: 0,
            server_id: 0,
            run_indicator: true,
            additional_data: Vec::new(),
            identity: DeviceIdentity::default(),
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG),
        }
    }
}

impl ControlBlock {
    /// Create a control block with default state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all counters and the diagnostic register, as performed by the
    /// Clear Counters and Restart Communications diagnostics.
    pub fn clear_counters(&mut self) {
        self.counters = Counters::default();
        self.diagnostic_register = 0;
    }

    /// Restart the communications option: clears counters, the event log
    /// and leaves listen only mode.
    pub fn restart_communications(&mut self) {
        self.clear_counters();
        self.event_log.clear();
        self.listen_only = false;
    }

    /// Record a communication event, discarding the oldest entry once the
    /// log is full.
    pub fn record_event(&mut self, event: u8) {
        if self.event_log.len() == MAX_EVENT_LOG {
            self.event_log.pop_back();
        }
        self.event_log.push_front(event);
    }

    /// The most recent communication events, newest first.
    #[must_use]
    pub fn event_log(&self) -> Vec<u8> {
        self.event_log.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_is_bounded_and_newest_first() {
        let mut control = ControlBlock::new();
        for i in 0..70u8 {
            control.record_event(i);
        }
        let log = control.event_log();
        assert_eq!(log.len(), MAX_EVENT_LOG);
        assert_eq!(log[0], 69);
        assert_eq!(log[63], 6);
    }

    #[test]
    fn restart_clears_listen_only_and_counters() {
        let mut control = ControlBlock::new();
        control.listen_only = true;
        control.counters.bus_message = 17;
        control.diagnostic_register = 0xAA55;
        control.restart_communications();
        assert!(!control.listen_only);
        assert_eq!(control.counters.bus_message, 0);
        assert_eq!(control.diagnostic_register, 0);
    }

    #[test]
    fn identity_ranges() {
        let mut identity = DeviceIdentity::basic("Vendor", "Product", "v1.0");
        identity.insert(DeviceIdentity::PRODUCT_NAME, "Name");
        identity.insert(0x80, "private");
        let basic: Vec<_> = identity.objects_in_range(0x00..=0x02).collect();
        assert_eq!(basic.len(), 3);
        let extended: Vec<_> = identity.objects_in_range(0x80..=0xFF).collect();
        assert_eq!(extended.len(), 1);
    }
}
