// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server datastore
//!
//! Each served device owns four independent address spaces: coils,
//! discrete inputs, holding registers and input registers. A space is
//! backed by a *data block* which is either sequential (a base address
//! plus a dense vector of values) or sparse (an explicit mapping from
//! address to value, as many field devices implement it).

pub mod control;

#[cfg(feature = "sim")]
pub mod simulator;

use std::{collections::BTreeMap, fmt};

use crate::frame::{Address, Coil, FunctionCode, Quantity, Word};

/// Errors reported by a [`DeviceStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The accessed range is not backed by the store. Maps to an
    /// `IllegalDataAddress` exception response.
    #[error("invalid data address")]
    InvalidAddress,

    /// A reset action was triggered by the operator configuration. The
    /// server answers with a device failure exception; the operator may
    /// elect to restart the server.
    #[error("reset requested")]
    Reset,
}

/// A contiguous or sparse block of values of one address space.
pub trait DataBlock<T: Copy>: Send {
    /// Check if the addressed range is backed by this block.
    fn validate(&self, address: Address, quantity: Quantity) -> bool;

    /// Read a range of values. Fails with [`StoreError::InvalidAddress`]
    /// if the range is not backed by this block.
    fn get(&self, address: Address, quantity: Quantity) -> Result<Vec<T>, StoreError>;

    /// Overwrite a range of values. Fails with
    /// [`StoreError::InvalidAddress`] if the range is not backed by this
    /// block.
    fn set(&mut self, address: Address, values: &[T]) -> Result<(), StoreError>;
}

/// A dense data block covering `address .. address + values.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequential<T> {
    address: Address,
    values: Vec<T>,
}

impl<T: Copy> Sequential<T> {
    /// Create a block from a base address and the initial values.
    #[must_use]
    pub fn new(address: Address, values: Vec<T>) -> Self {
        Self { address, values }
    }

    /// Create a block of `count` cells initialized to `value`.
    #[must_use]
    pub fn filled(address: Address, count: usize, value: T) -> Self {
        Self {
            address,
            values: vec![value; count],
        }
    }

    fn index(&self, address: Address) -> usize {
        usize::from(address - self.address)
    }
}

impl<T: Copy + Send> DataBlock<T> for Sequential<T> {
    fn validate(&self, address: Address, quantity: Quantity) -> bool {
        self.address <= address
            && u64::from(address) + u64::from(quantity)
                <= u64::from(self.address) + self.values.len() as u64
    }

    fn get(&self, address: Address, quantity: Quantity) -> Result<Vec<T>, StoreError> {
        if !self.validate(address, quantity) {
            return Err(StoreError::InvalidAddress);
        }
        let start = self.index(address);
        Ok(self.values[start..start + usize::from(quantity)].to_vec())
    }

    fn set(&mut self, address: Address, values: &[T]) -> Result<(), StoreError> {
        if self.address > address
            || u64::from(address) + values.len() as u64
                > u64::from(self.address) + self.values.len() as u64
        {
            return Err(StoreError::InvalidAddress);
        }
        let start = self.index(address);
        self.values[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }
}

/// A sparse data block with arbitrary gaps between addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sparse<T> {
    values: BTreeMap<Address, T>,
}

impl<T: Copy> Sparse<T> {
    /// Create a block from an explicit address to value mapping.
    #[must_use]
    pub fn new(values: BTreeMap<Address, T>) -> Self {
        Self { values }
    }

    /// Create a block from a base address and consecutive values, i.e.
    /// promote a dense vector to a sparse mapping. Values beyond the end
    /// of the address range are discarded.
    #[must_use]
    pub fn from_values(address: Address, values: &[T]) -> Self {
        Self {
            values: values
                .iter()
                .zip(address..=u16::MAX)
                .map(|(v, a)| (a, *v))
                .collect(),
        }
    }
}

impl<T: Copy + Send> DataBlock<T> for Sparse<T> {
    fn validate(&self, address: Address, quantity: Quantity) -> bool {
        if u32::from(address) + u32::from(quantity) > u32::from(u16::MAX) + 1 {
            return false;
        }
        (address..=u16::MAX)
            .take(quantity.into())
            .all(|a| self.values.contains_key(&a))
    }

    fn get(&self, address: Address, quantity: Quantity) -> Result<Vec<T>, StoreError> {
        if !self.validate(address, quantity) {
            return Err(StoreError::InvalidAddress);
        }
        Ok((address..=u16::MAX)
            .take(quantity.into())
            .map(|a| self.values[&a])
            .collect())
    }

    fn set(&mut self, address: Address, values: &[T]) -> Result<(), StoreError> {
        if u64::from(address) + values.len() as u64 > u64::from(u16::MAX) + 1 {
            return Err(StoreError::InvalidAddress);
        }
        for (v, a) in values.iter().zip(address..=u16::MAX) {
            self.values.insert(a, *v);
        }
        Ok(())
    }
}

/// The data of one served device, addressed by function code.
///
/// [`get_bits`](Self::get_bits) and friends take `&mut self` because some
/// implementations run value-generating actions on read, see the
/// [`simulator`] module.
pub trait DeviceStore: Send {
    /// Check if the addressed range is valid for the given function code,
    /// including write permission for write function codes.
    fn validate(&self, function: FunctionCode, address: Address, quantity: Quantity) -> bool;

    /// Read coils or discrete inputs.
    fn get_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, StoreError>;

    /// Read holding or input registers.
    fn get_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, StoreError>;

    /// Write coils.
    fn set_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Coil],
    ) -> Result<(), StoreError>;

    /// Write holding registers.
    fn set_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Word],
    ) -> Result<(), StoreError>;
}

/// Address space selected by a function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Space {
    Coils,
    Discretes,
    Holding,
    Input,
}

pub(crate) fn space_of(function: FunctionCode) -> Option<Space> {
    use FunctionCode::*;
    let space = match function {
        ReadCoils | WriteSingleCoil | WriteMultipleCoils => Space::Coils,
        ReadDiscreteInputs => Space::Discretes,
        ReadHoldingRegisters | WriteSingleRegister | WriteMultipleRegisters | MaskWriteRegister
        | ReadWriteMultipleRegisters | ReadFileRecord | WriteFileRecord | ReadFifoQueue => {
            Space::Holding
        }
        ReadInputRegisters => Space::Input,
        _ => return None,
    };
    Some(space)
}

pub(crate) fn is_write(function: FunctionCode) -> bool {
    use FunctionCode::*;
    matches!(
        function,
        WriteSingleCoil
            | WriteSingleRegister
            | WriteMultipleCoils
            | WriteMultipleRegisters
            | MaskWriteRegister
            | ReadWriteMultipleRegisters
            | WriteFileRecord
    )
}

/// Standard device data backed by one [`DataBlock`] per address space.
pub struct DeviceData {
    coils: Box<dyn DataBlock<Coil>>,
    discretes: Box<dyn DataBlock<Coil>>,
    holding: Box<dyn DataBlock<Word>>,
    input: Box<dyn DataBlock<Word>>,
    zero_mode: bool,
}

impl fmt::Debug for DeviceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceData")
            .field("zero_mode", &self.zero_mode)
            .finish_non_exhaustive()
    }
}

impl DeviceData {
    /// Create device data from one block per address space.
    #[must_use]
    pub fn new(
        coils: Box<dyn DataBlock<Coil>>,
        discretes: Box<dyn DataBlock<Coil>>,
        holding: Box<dyn DataBlock<Word>>,
        input: Box<dyn DataBlock<Word>>,
    ) -> Self {
        Self {
            coils,
            discretes,
            holding,
            input,
            zero_mode: false,
        }
    }

    /// Create device data covering the full address range of every space,
    /// initialized to zero.
    #[must_use]
    pub fn new_full() -> Self {
        const FULL: usize = u16::MAX as usize + 1;
        Self::new(
            Box::new(Sequential::filled(0, FULL, false)),
            Box::new(Sequential::filled(0, FULL, false)),
            Box::new(Sequential::filled(0, FULL, 0)),
            Box::new(Sequential::filled(0, FULL, 0)),
        )
        .with_zero_mode(true)
    }

    /// Control the protocol address to block address translation.
    ///
    /// With `zero_mode = false` (the default, following the Modbus
    /// convention) protocol address 0 accesses block address 1. With
    /// `zero_mode = true` protocol addresses map to block addresses
    /// directly.
    #[must_use]
    pub fn with_zero_mode(mut self, zero_mode: bool) -> Self {
        self.zero_mode = zero_mode;
        self
    }

    fn block_address(&self, address: Address) -> Option<Address> {
        if self.zero_mode {
            Some(address)
        } else {
            address.checked_add(1)
        }
    }
}

impl DeviceStore for DeviceData {
    fn validate(&self, function: FunctionCode, address: Address, quantity: Quantity) -> bool {
        let Some(space) = space_of(function) else {
            return false;
        };
        let Some(address) = self.block_address(address) else {
            return false;
        };
        match space {
            Space::Coils => self.coils.validate(address, quantity),
            Space::Discretes => self.discretes.validate(address, quantity),
            Space::Holding => self.holding.validate(address, quantity),
            Space::Input => self.input.validate(address, quantity),
        }
    }

    fn get_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, StoreError> {
        let address = self
            .block_address(address)
            .ok_or(StoreError::InvalidAddress)?;
        match space_of(function) {
            Some(Space::Coils) => self.coils.get(address, quantity),
            Some(Space::Discretes) => self.discretes.get(address, quantity),
            _ => Err(StoreError::InvalidAddress),
        }
    }

    fn get_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, StoreError> {
        let address = self
            .block_address(address)
            .ok_or(StoreError::InvalidAddress)?;
        match space_of(function) {
            Some(Space::Holding) => self.holding.get(address, quantity),
            Some(Space::Input) => self.input.get(address, quantity),
            _ => Err(StoreError::InvalidAddress),
        }
    }

    fn set_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Coil],
    ) -> Result<(), StoreError> {
        let address = self
            .block_address(address)
            .ok_or(StoreError::InvalidAddress)?;
        match space_of(function) {
            Some(Space::Coils) => self.coils.set(address, values),
            _ => Err(StoreError::InvalidAddress),
        }
    }

    fn set_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Word],
    ) -> Result<(), StoreError> {
        let address = self
            .block_address(address)
            .ok_or(StoreError::InvalidAddress)?;
        match space_of(function) {
            Some(Space::Holding) => self.holding.set(address, values),
            _ => Err(StoreError::InvalidAddress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_validate_bounds() {
        let block = Sequential::filled(10, 5, 0u16);
        assert!(block.validate(10, 5));
        assert!(block.validate(12, 3));
        assert!(block.validate(14, 1));
        assert!(!block.validate(9, 1));
        assert!(!block.validate(14, 2));
        assert!(!block.validate(15, 1));
    }

    #[test]
    fn sequential_set_then_get() {
        let mut block = Sequential::filled(0, 8, 0u16);
        block.set(2, &[0x11, 0x22, 0x33]).unwrap();
        assert_eq!(block.get(2, 3).unwrap(), vec![0x11, 0x22, 0x33]);
        assert_eq!(block.get(1, 1).unwrap(), vec![0]);
        assert!(block.set(7, &[1, 2]).is_err());
    }

    #[test]
    fn sequential_full_range() {
        let block = Sequential::filled(0, u16::MAX as usize + 1, 0u16);
        assert!(block.validate(0xFFFF, 1));
        assert!(!block.validate(0xFFFF, 2));
    }

    #[test]
    fn sparse_validate_requires_every_address() {
        let mut values = BTreeMap::new();
        values.insert(1u16, 0xAAu16);
        values.insert(2, 0xBB);
        values.insert(5, 0xCC);
        let block = Sparse::new(values);
        assert!(block.validate(1, 2));
        assert!(!block.validate(1, 3));
        assert!(block.validate(5, 1));
        assert_eq!(block.get(1, 2).unwrap(), vec![0xAA, 0xBB]);
        assert!(block.get(3, 1).is_err());
    }

    #[test]
    fn sparse_from_values() {
        let block = Sparse::from_values(10, &[1u16, 2, 3]);
        assert!(block.validate(10, 3));
        assert_eq!(block.get(11, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn device_data_modbus_addressing() {
        // Block base 1, so protocol address 0 maps to the first value.
        let mut data = DeviceData::new(
            Box::new(Sequential::filled(1, 8, false)),
            Box::new(Sequential::filled(1, 8, false)),
            Box::new(Sequential::new(1, vec![17u16; 8])),
            Box::new(Sequential::filled(1, 8, 0)),
        );
        assert!(data.validate(FunctionCode::ReadHoldingRegisters, 0, 8));
        assert!(!data.validate(FunctionCode::ReadHoldingRegisters, 1, 8));
        assert_eq!(
            data.get_registers(FunctionCode::ReadHoldingRegisters, 0, 2)
                .unwrap(),
            vec![17, 17]
        );
    }

    #[test]
    fn device_data_zero_mode_addressing() {
        let mut data = DeviceData::new(
            Box::new(Sequential::filled(0, 8, false)),
            Box::new(Sequential::filled(0, 8, false)),
            Box::new(Sequential::new(0, (0u16..8).collect())),
            Box::new(Sequential::filled(0, 8, 0)),
        )
        .with_zero_mode(true);
        assert_eq!(
            data.get_registers(FunctionCode::ReadHoldingRegisters, 3, 2)
                .unwrap(),
            vec![3, 4]
        );
    }

    #[test]
    fn device_data_write_permissions() {
        let mut data = DeviceData::new_full();
        data.set_bits(FunctionCode::WriteMultipleCoils, 4, &[true, true])
            .unwrap();
        assert_eq!(
            data.get_bits(FunctionCode::ReadCoils, 4, 2).unwrap(),
            vec![true, true]
        );
        // Read-only spaces reject writes.
        assert!(data
            .set_bits(FunctionCode::ReadDiscreteInputs, 0, &[true])
            .is_err());
        assert!(data
            .set_registers(FunctionCode::ReadInputRegisters, 0, &[1])
            .is_err());
    }
}
