// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus device addressing

use std::{fmt, num::ParseIntError, str::FromStr};

/// Device identifier, also known as *unit id* or *slave id*.
pub type DeviceId = u8;

/// A single byte for addressing Modbus devices on a multi-drop bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Device(pub DeviceId);

impl Device {
    /// The special address for sending a broadcast message to all
    /// connected Modbus devices at once. Broadcast messages are one-way
    /// and sent from the client to all servers, i.e. a request without
    /// a response.
    ///
    /// Some devices may use a custom id from the reserved range 248-255
    /// for broadcasting.
    #[must_use]
    pub const fn broadcast() -> Self {
        Device(0)
    }

    /// The minimum address of a single Modbus device.
    #[must_use]
    pub const fn min_device() -> Self {
        Device(1)
    }

    /// The maximum address of a single Modbus device.
    #[must_use]
    pub const fn max_device() -> Self {
        Device(247)
    }

    /// The reserved address for sending a message to a directly connected
    /// Modbus TCP device, i.e. if not forwarded through a TCP/RTU gateway
    /// according to the unit identifier.
    ///
    /// [Modbus Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
    /// "On TCP/IP, the Modbus server is addressed using its IP address; therefore,
    /// the Modbus Unit Identifier is useless. The value 0xFF has to be used."
    #[must_use]
    pub const fn tcp_device() -> Self {
        Device(255)
    }

    /// Check if the [`DeviceId`] is used for broadcasting
    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self == Self::broadcast()
    }

    /// Check if the [`DeviceId`] addresses a single device
    #[must_use]
    pub fn is_single_device(self) -> bool {
        self >= Self::min_device() && self <= Self::max_device()
    }

    /// Check if the [`DeviceId`] is reserved
    #[must_use]
    pub fn is_reserved(self) -> bool {
        self > Self::max_device()
    }
}

impl From<DeviceId> for Device {
    fn from(from: DeviceId) -> Self {
        Device(from)
    }
}

impl From<Device> for DeviceId {
    fn from(from: Device) -> Self {
        from.0
    }
}

impl FromStr for Device {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let device_id = match s.parse::<u8>() {
            Ok(device_id) => Ok(device_id),
            Err(err) => {
                if let Some(stripped) = s.strip_prefix("0x") {
                    u8::from_str_radix(stripped, 16)
                } else {
                    Err(err)
                }
            }
        }?;
        Ok(Device(device_id))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:0>2X})", self.0, self.0)
    }
}

/// Stateful management of the currently addressed device.
///
/// Serial devices are addressed by their assigned device id. TCP devices
/// are either addressed directly (= implicitly) by using the reserved id
/// `Device::tcp_device() = 0xFF` (default) or indirectly through a
/// TCP/RTU gateway by setting the id to the desired downstream device.
///
/// The names *slave id* and *unit id* are used synonymously depending on
/// the context. This library consistently adopted the term *device*.
pub trait DeviceContext {
    /// Select a device for all subsequent outgoing requests.
    fn set_device(&mut self, device: Device);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dec() {
        assert_eq!(Device(0), Device::from_str("0").unwrap());
        assert_eq!(Device(123), Device::from_str("123").unwrap());
        assert_eq!(Device(255), Device::from_str("255").unwrap());
        assert!(Device::from_str("-1").is_err());
        assert!(Device::from_str("256").is_err());
    }

    #[test]
    fn parse_hex() {
        assert_eq!(Device(0), Device::from_str("0x00").unwrap());
        assert_eq!(Device(123), Device::from_str("0x7b").unwrap());
        assert_eq!(Device(123), Device::from_str("0x7B").unwrap());
        assert_eq!(Device(255), Device::from_str("0xff").unwrap());
        assert!(Device::from_str("0X00").is_err());
        assert!(Device::from_str("0x100").is_err());
    }

    #[test]
    fn format() {
        assert!(format!("{}", Device(123)).contains("123"));
        assert!(format!("{}", Device(0x7B)).contains("0x7B"));
    }

    #[test]
    fn classify() {
        assert!(Device(0).is_broadcast());
        assert!(Device(1).is_single_device());
        assert!(Device(247).is_single_device());
        assert!(Device(248).is_reserved());
        assert!(Device(255).is_reserved());
    }
}
