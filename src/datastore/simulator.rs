// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Programmable device simulator
//!
//! Builds and maintains a virtual copy of a device from a declarative
//! JSON configuration: a single flat register file of typed cells with
//! per-cell access control, invalid ranges and value-generating actions
//! that run when a cell is read.
//!
//! ```json
//! {
//!     "setup": {
//!         "co size": 10, "di size": 10, "hr size": 10, "ir size": 10,
//!         "shared blocks": true,
//!         "type exception": false,
//!         "defaults": {
//!             "value": {
//!                 "bits": 0, "uint16": 0, "uint32": 0,
//!                 "float32": 0.0, "string": " "
//!             },
//!             "action": {
//!                 "bits": null, "uint16": null, "uint32": null,
//!                 "float32": null, "string": null
//!             }
//!         }
//!     },
//!     "invalid": [5, [9, 9]],
//!     "write": [[2, 4]],
//!     "bits": [[0, 1]],
//!     "uint16": [{"addr": [2, 4], "value": 123, "action": "increment"}],
//!     "uint32": [{"addr": [6, 7], "value": 67000}],
//!     "string": [{"addr": [8, 8], "value": "ab"}],
//!     "repeat": []
//! }
//! ```
//!
//! Unknown configuration keys are rejected.

use std::{collections::BTreeMap, fmt, time::Instant};

use rand::Rng as _;
use serde::Deserialize;

use crate::frame::{Address, Coil, FunctionCode, Quantity, Word};

use super::{is_write, space_of, DeviceStore, Space, StoreError};

/// One cell occupies 16 bits, bit addresses map onto cells accordingly.
const WORD_BITS: u16 = 16;

/// Errors raised while loading a simulator configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration document is structurally valid but inconsistent.
    #[error("invalid simulator configuration: {0}")]
    Invalid(String),

    /// The configuration document could not be parsed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Type of a single simulator cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CellType {
    /// Untyped. All cells left untyped after setup become [`Self::Invalid`].
    #[default]
    None,
    /// 16 individually addressable bits.
    Bits,
    /// A single 16 bit register.
    Uint16,
    /// First half of a 32 bit integer spanning two cells.
    Uint32,
    /// First half of a 32 bit float spanning two cells.
    Float32,
    /// First cell of a string spanning one or more cells.
    String,
    /// Continuation of a preceding multi-register cell.
    Next,
    /// Accessing this cell fails with an illegal address exception.
    Invalid,
}

/// Optional bounds for the increment and random actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionArgs {
    /// Lower bound, also the wrap-around target of increment.
    #[serde(default)]
    pub minval: Option<f64>,
    /// Upper bound.
    #[serde(default)]
    pub maxval: Option<f64>,
}

/// A single simulator register cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    /// Cell type stamped during setup.
    pub cell_type: CellType,
    /// Write permission. Write function codes on a cell without access
    /// fail validation.
    pub access: bool,
    /// Current raw 16 bit value.
    pub value: Word,
    /// Index into the action table, 0 = no action.
    pub action: usize,
    /// Parameters forwarded to the action.
    pub args: ActionArgs,
    /// Number of reads since setup.
    pub count_read: u64,
    /// Number of writes since setup.
    pub count_write: u64,
}

/// Single address or inclusive `[start, end]` range.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum AddrRange {
    /// A single cell.
    Single(u16),
    /// An inclusive range of cells.
    Range([u16; 2]),
}

impl AddrRange {
    fn bounds(self) -> (u16, u16) {
        match self {
            Self::Single(addr) => (addr, addr),
            Self::Range([start, end]) => (start, end),
        }
    }
}

/// One entry of a per-type section.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    /// Bare address or range using the section defaults.
    Addr(AddrRange),
    /// Address or range with explicit value, action and action arguments.
    Full(EntryDef),
}

/// The explicit form of a section [`Entry`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryDef {
    /// Address or range of cells to stamp.
    pub addr: AddrRange,
    /// Initial value; integer, float or string depending on the section.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Action by name; `null` clears the section default.
    #[serde(default)]
    pub action: Option<String>,
    /// Action parameters.
    #[serde(default)]
    pub args: Option<ActionArgs>,
}

impl Entry {
    fn parts(&self) -> (AddrRange, Option<&serde_json::Value>, Option<&str>, ActionArgs) {
        match self {
            Self::Addr(addr) => (*addr, None, None, ActionArgs::default()),
            Self::Full(def) => (
                def.addr,
                def.value.as_ref(),
                def.action.as_deref(),
                def.args.unwrap_or_default(),
            ),
        }
    }
}

/// Copy one cell range onto another after initial construction, for
/// compact descriptions of devices with repetitive register maps.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Repeat {
    /// Inclusive source range.
    pub addr: [u16; 2],
    /// Inclusive target range; the source is repeated until it is filled.
    pub to: [u16; 2],
}

/// Default values and actions applied when a section entry omits them.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Default initial values per type.
    pub value: DefaultValues,
    /// Default actions per type.
    pub action: DefaultActions,
}

/// Default initial values per type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultValues {
    /// Default for the `bits` section.
    pub bits: u16,
    /// Default for the `uint16` section.
    pub uint16: u16,
    /// Default for the `uint32` section.
    pub uint32: u32,
    /// Default for the `float32` section.
    pub float32: f32,
    /// Default for the `string` section.
    pub string: String,
}

/// Default actions per type, by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultActions {
    /// Default for the `bits` section.
    pub bits: Option<String>,
    /// Default for the `uint16` section.
    pub uint16: Option<String>,
    /// Default for the `uint32` section.
    pub uint32: Option<String>,
    /// Default for the `float32` section.
    pub float32: Option<String>,
    /// Default for the `string` section.
    pub string: Option<String>,
}

/// The `setup` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Setup {
    /// Size of the coils block.
    #[serde(rename = "co size")]
    pub co_size: usize,
    /// Size of the discrete inputs block.
    #[serde(rename = "di size")]
    pub di_size: usize,
    /// Size of the holding registers block.
    #[serde(rename = "hr size")]
    pub hr_size: usize,
    /// Size of the input registers block.
    #[serde(rename = "ir size")]
    pub ir_size: usize,
    /// Share one backing array between all four blocks (largest size
    /// wins); otherwise each block gets its own cell range.
    #[serde(rename = "shared blocks")]
    pub shared_blocks: bool,
    /// Fail reads/writes whose address, count and function-code-implied
    /// type do not line up with the cell typing.
    #[serde(rename = "type exception")]
    pub type_exception: bool,
    /// Defaults for section entries.
    pub defaults: Defaults,
}

/// The declarative simulator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Register file layout and defaults.
    pub setup: Setup,
    /// Cells that answer with an illegal address exception.
    #[serde(default)]
    pub invalid: Vec<AddrRange>,
    /// Cells with write access; everything else is read-only.
    #[serde(default)]
    pub write: Vec<AddrRange>,
    /// Bit cells.
    #[serde(default)]
    pub bits: Vec<Entry>,
    /// 16 bit integer cells.
    #[serde(default)]
    pub uint16: Vec<Entry>,
    /// 32 bit integer cells, two cells each.
    #[serde(default)]
    pub uint32: Vec<Entry>,
    /// 32 bit float cells, two cells each.
    #[serde(default)]
    pub float32: Vec<Entry>,
    /// String cells, one string per entry range.
    #[serde(default)]
    pub string: Vec<Entry>,
    /// Range copies applied after construction.
    #[serde(default)]
    pub repeat: Vec<Repeat>,
}

impl Config {
    /// Parse a configuration from its JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A user supplied action, invoked with the whole register file and the
/// index of the cell being read.
pub type CustomAction = Box<dyn FnMut(&mut [Cell], usize) -> Result<(), StoreError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    None,
    Increment,
    Random,
    Timestamp,
    Uptime,
    Reset,
    Custom(usize),
}

#[derive(Debug, Clone, Copy, Default)]
struct Offsets {
    coils: usize,
    discretes: usize,
    holding: usize,
    input: usize,
}

impl Offsets {
    fn of(self, space: Space) -> usize {
        match space {
            Space::Coils => self.coils,
            Space::Discretes => self.discretes,
            Space::Holding => self.holding,
            Space::Input => self.input,
        }
    }
}

/// Simulator backed device store.
///
/// Replaces the four data blocks of [`super::DeviceData`] with a single
/// flat array of typed [`Cell`]s plus a per-function-code offset table.
pub struct SimulatorContext {
    registers: Vec<Cell>,
    offsets: Offsets,
    type_exception: bool,
    actions: Vec<ActionKind>,
    custom_actions: Vec<CustomAction>,
    start_time: Instant,
}

impl fmt::Debug for SimulatorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorContext")
            .field("registers", &self.registers.len())
            .field("offsets", &self.offsets)
            .field("type_exception", &self.type_exception)
            .field("custom_actions", &self.custom_actions.len())
            .finish_non_exhaustive()
    }
}

struct SetupState {
    registers: Vec<Cell>,
    action_names: BTreeMap<String, usize>,
}

impl SetupState {
    fn resolve_action(&self, name: Option<&str>) -> Result<usize, ConfigError> {
        let Some(name) = name else {
            return Ok(0);
        };
        self.action_names
            .get(name)
            .copied()
            .ok_or_else(|| invalid(format!("unknown action {name:?}")))
    }

    fn claim(&mut self, index: usize, section: &str) -> Result<&mut Cell, ConfigError> {
        let count = self.registers.len();
        let cell = self
            .registers
            .get_mut(index)
            .ok_or_else(|| invalid(format!("section {section:?}: address {index} out of range (size {count})")))?;
        if cell.cell_type != CellType::None {
            return Err(invalid(format!(
                "section {section:?}: register {index} already defined"
            )));
        }
        Ok(cell)
    }
}

impl SimulatorContext {
    /// Build a simulator from a parsed configuration and user supplied
    /// actions. Custom action names are referenced from the configuration
    /// like the builtin ones.
    pub fn new(
        config: Config,
        custom_actions: Vec<(String, CustomAction)>,
    ) -> Result<Self, ConfigError> {
        let Config {
            setup,
            invalid: invalid_section,
            write,
            bits,
            uint16,
            uint32,
            float32,
            string,
            repeat,
        } = config;

        let (offsets, total_size) = if setup.shared_blocks {
            let total = setup
                .co_size
                .max(setup.di_size)
                .max(setup.hr_size)
                .max(setup.ir_size);
            (Offsets::default(), total)
        } else {
            let offsets = Offsets {
                coils: 0,
                discretes: setup.co_size,
                holding: setup.co_size + setup.di_size,
                input: setup.co_size + setup.di_size + setup.hr_size,
            };
            (
                offsets,
                setup.co_size + setup.di_size + setup.hr_size + setup.ir_size,
            )
        };

        let mut actions = vec![
            ActionKind::None,
            ActionKind::Increment,
            ActionKind::Random,
            ActionKind::Timestamp,
            ActionKind::Uptime,
            ActionKind::Reset,
        ];
        let mut action_names: BTreeMap<String, usize> = [
            ("increment", 1),
            ("random", 2),
            ("timestamp", 3),
            ("uptime", 4),
            ("reset", 5),
        ]
        .into_iter()
        .map(|(name, index)| (name.to_owned(), index))
        .collect();
        let mut custom = Vec::with_capacity(custom_actions.len());
        for (name, action) in custom_actions {
            if action_names.contains_key(&name) {
                return Err(invalid(format!("duplicate action name {name:?}")));
            }
            action_names.insert(name, actions.len());
            actions.push(ActionKind::Custom(custom.len()));
            custom.push(action);
        }

        let mut state = SetupState {
            registers: vec![Cell::default(); total_size],
            action_names,
        };

        for range in &invalid_section {
            let (start, end) = range.bounds();
            for index in usize::from(start)..=usize::from(end) {
                state.claim(index, "invalid")?.cell_type = CellType::Invalid;
            }
        }

        let defaults = &setup.defaults;
        Self::stamp_bits(&mut state, &bits, defaults)?;
        Self::stamp_uint16(&mut state, &uint16, defaults)?;
        Self::stamp_uint32(&mut state, &uint32, defaults)?;
        Self::stamp_float32(&mut state, &float32, defaults)?;
        Self::stamp_string(&mut state, &string, defaults)?;

        for range in &write {
            let (start, end) = range.bounds();
            for index in usize::from(start)..=usize::from(end) {
                let count = state.registers.len();
                let cell = state
                    .registers
                    .get_mut(index)
                    .ok_or_else(|| invalid(format!("section \"write\": address {index} out of range (size {count})")))?;
                if matches!(cell.cell_type, CellType::None | CellType::Invalid) {
                    return Err(invalid(format!(
                        "section \"write\": register {index} not defined"
                    )));
                }
                cell.access = true;
            }
        }

        for entry in &repeat {
            let [copy_start, copy_end] = entry.addr.map(usize::from);
            let [to_start, to_end] = entry.to.map(usize::from);
            if copy_end < copy_start || copy_end >= state.registers.len() {
                return Err(invalid(format!("section \"repeat\": invalid source {entry:?}")));
            }
            let mut copy_index = copy_start;
            for index in to_start..=to_end {
                if index >= state.registers.len() {
                    return Err(invalid(format!("section \"repeat\": target {index} out of range")));
                }
                state.registers[index] = state.registers[copy_index].clone();
                copy_index = if copy_index >= copy_end {
                    copy_start
                } else {
                    copy_index + 1
                };
            }
        }

        for cell in &mut state.registers {
            if cell.cell_type == CellType::None {
                cell.cell_type = CellType::Invalid;
            }
        }

        Ok(Self {
            registers: state.registers,
            offsets,
            type_exception: setup.type_exception,
            actions,
            custom_actions: custom,
            start_time: Instant::now(),
        })
    }

    /// Build a simulator directly from a JSON document.
    pub fn from_json(
        json: &str,
        custom_actions: Vec<(String, CustomAction)>,
    ) -> Result<Self, ConfigError> {
        Self::new(Config::from_json(json)?, custom_actions)
    }

    /// Direct access to a cell, mainly for inspection by management
    /// frontends.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.registers.get(index)
    }

    /// Number of cells in the backing array.
    #[must_use]
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    fn stamp_bits(
        state: &mut SetupState,
        entries: &[Entry],
        defaults: &Defaults,
    ) -> Result<(), ConfigError> {
        for entry in entries {
            let (addr, value, action, args) = entry.parts();
            let value = match value {
                Some(value) => json_u16(value, "bits")?,
                None => defaults.value.bits,
            };
            let action = state.resolve_action(action.or(defaults.action.bits.as_deref()))?;
            let (start, end) = addr.bounds();
            for index in usize::from(start)..=usize::from(end) {
                let cell = state.claim(index, "bits")?;
                cell.cell_type = CellType::Bits;
                cell.value = value;
                cell.action = action;
                cell.args = args;
            }
        }
        Ok(())
    }

    fn stamp_uint16(
        state: &mut SetupState,
        entries: &[Entry],
        defaults: &Defaults,
    ) -> Result<(), ConfigError> {
        for entry in entries {
            let (addr, value, action, args) = entry.parts();
            let value = match value {
                Some(value) => json_u16(value, "uint16")?,
                None => defaults.value.uint16,
            };
            let action = state.resolve_action(action.or(defaults.action.uint16.as_deref()))?;
            let (start, end) = addr.bounds();
            for index in usize::from(start)..=usize::from(end) {
                let cell = state.claim(index, "uint16")?;
                cell.cell_type = CellType::Uint16;
                cell.value = value;
                cell.action = action;
                cell.args = args;
            }
        }
        Ok(())
    }

    fn stamp_uint32(
        state: &mut SetupState,
        entries: &[Entry],
        defaults: &Defaults,
    ) -> Result<(), ConfigError> {
        for entry in entries {
            let (addr, value, action, args) = entry.parts();
            let value = match value {
                Some(value) => json_u32(value, "uint32")?,
                None => defaults.value.uint32,
            };
            let action = state.resolve_action(action.or(defaults.action.uint32.as_deref()))?;
            let [hi, lo] = registers_from_u32(value);
            let (start, end) = addr.bounds();
            Self::stamp_pairs(state, "uint32", CellType::Uint32, start, end, hi, lo, action, args)?;
        }
        Ok(())
    }

    fn stamp_float32(
        state: &mut SetupState,
        entries: &[Entry],
        defaults: &Defaults,
    ) -> Result<(), ConfigError> {
        for entry in entries {
            let (addr, value, action, args) = entry.parts();
            let value = match value {
                Some(value) => json_f32(value, "float32")?,
                None => defaults.value.float32,
            };
            let action = state.resolve_action(action.or(defaults.action.float32.as_deref()))?;
            let [hi, lo] = registers_from_u32(value.to_bits());
            let (start, end) = addr.bounds();
            Self::stamp_pairs(state, "float32", CellType::Float32, start, end, hi, lo, action, args)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn stamp_pairs(
        state: &mut SetupState,
        section: &str,
        cell_type: CellType,
        start: u16,
        end: u16,
        hi: Word,
        lo: Word,
        action: usize,
        args: ActionArgs,
    ) -> Result<(), ConfigError> {
        if (usize::from(end) - usize::from(start) + 1) % 2 != 0 {
            return Err(invalid(format!(
                "section {section:?}: range [{start}, {end}] must cover an even number of registers"
            )));
        }
        let mut index = usize::from(start);
        while index < usize::from(end) {
            let head = state.claim(index, section)?;
            head.cell_type = cell_type;
            head.value = hi;
            head.action = action;
            head.args = args;
            let next = state.claim(index + 1, section)?;
            next.cell_type = CellType::Next;
            next.value = lo;
            index += 2;
        }
        Ok(())
    }

    fn stamp_string(
        state: &mut SetupState,
        entries: &[Entry],
        defaults: &Defaults,
    ) -> Result<(), ConfigError> {
        for entry in entries {
            let (addr, value, action, args) = entry.parts();
            let value = match value {
                Some(value) => value
                    .as_str()
                    .ok_or_else(|| invalid("section \"string\": value must be a string"))?
                    .to_owned(),
                None => defaults.value.string.clone(),
            };
            let action = state.resolve_action(action.or(defaults.action.string.as_deref()))?;
            let (start, end) = addr.bounds();
            let register_count = usize::from(end) - usize::from(start) + 1;
            let mut bytes = value.into_bytes();
            bytes.resize(register_count * 2, b' ');
            for (i, chunk) in bytes.chunks_exact(2).enumerate() {
                let index = usize::from(start) + i;
                let cell = state.claim(index, "string")?;
                cell.cell_type = if i == 0 { CellType::String } else { CellType::Next };
                cell.value = Word::from(chunk[0]) << 8 | Word::from(chunk[1]);
                if i == 0 {
                    cell.action = action;
                    cell.args = args;
                }
            }
        }
        Ok(())
    }

    fn bit_cell_range(address: Address, quantity: Quantity) -> Option<(usize, usize)> {
        if quantity == 0 {
            return None;
        }
        let first = usize::from(address / WORD_BITS);
        let last = (usize::from(address) + usize::from(quantity) - 1) / usize::from(WORD_BITS);
        Some((first, last - first + 1))
    }

    fn validate_type(&self, function: FunctionCode, real_address: usize, count: usize) -> bool {
        let (allowed, step): (&[CellType], usize) = if is_bits(function) {
            (&[CellType::Bits], 1)
        } else if count % 2 != 0 {
            (&[CellType::Uint16, CellType::String], 1)
        } else {
            (
                &[CellType::Uint32, CellType::Float32, CellType::String],
                2,
            )
        };
        (real_address..real_address + count)
            .step_by(step)
            .all(|i| allowed.contains(&self.registers[i].cell_type))
    }

    fn apply_action(&mut self, index: usize) -> Result<(), StoreError> {
        let slot = self.registers[index].action;
        if slot == 0 {
            return Ok(());
        }
        let kind = self.actions[slot];
        let Self {
            registers,
            custom_actions,
            start_time,
            ..
        } = self;
        match kind {
            ActionKind::None => Ok(()),
            ActionKind::Increment => {
                action_increment(registers, index);
                Ok(())
            }
            ActionKind::Random => {
                action_random(registers, index);
                Ok(())
            }
            ActionKind::Timestamp => {
                action_timestamp(registers, index);
                Ok(())
            }
            ActionKind::Uptime => {
                action_uptime(registers, index, start_time.elapsed().as_secs());
                Ok(())
            }
            ActionKind::Reset => Err(StoreError::Reset),
            ActionKind::Custom(custom) => (custom_actions[custom])(registers, index),
        }
    }
}

impl DeviceStore for SimulatorContext {
    fn validate(&self, function: FunctionCode, address: Address, quantity: Quantity) -> bool {
        let Some(space) = space_of(function) else {
            return false;
        };
        let offset = self.offsets.of(space);
        let (start, count) = if is_bits(function) {
            let Some((first, count)) = Self::bit_cell_range(address, quantity) else {
                return false;
            };
            (offset + first, count)
        } else {
            if quantity == 0 {
                return false;
            }
            (offset + usize::from(address), usize::from(quantity))
        };
        if start + count > self.registers.len() {
            return false;
        }
        let write = is_write(function);
        for cell in &self.registers[start..start + count] {
            if cell.cell_type == CellType::Invalid {
                return false;
            }
            if write && !cell.access {
                return false;
            }
        }
        if self.type_exception {
            return self.validate_type(function, start, count);
        }
        true
    }

    fn get_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, StoreError> {
        let offset = self
            .offsets
            .of(space_of(function).ok_or(StoreError::InvalidAddress)?);
        let (first, count) =
            Self::bit_cell_range(address, quantity).ok_or(StoreError::InvalidAddress)?;
        if offset + first + count > self.registers.len() {
            return Err(StoreError::InvalidAddress);
        }
        let mut result = Vec::with_capacity(quantity.into());
        let mut bit_index = address % WORD_BITS;
        let mut remaining = quantity;
        for i in 0..count {
            let index = offset + first + i;
            self.apply_action(index)?;
            let cell = &mut self.registers[index];
            cell.count_read += 1;
            let value = cell.value;
            while remaining > 0 && bit_index < WORD_BITS {
                result.push(value & (1 << bit_index) != 0);
                remaining -= 1;
                bit_index += 1;
            }
            bit_index = 0;
        }
        Ok(result)
    }

    fn get_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, StoreError> {
        let offset = self
            .offsets
            .of(space_of(function).ok_or(StoreError::InvalidAddress)?);
        let start = offset + usize::from(address);
        if start + usize::from(quantity) > self.registers.len() {
            return Err(StoreError::InvalidAddress);
        }
        let mut result = Vec::with_capacity(quantity.into());
        for i in 0..usize::from(quantity) {
            let index = start + i;
            self.apply_action(index)?;
            let cell = &mut self.registers[index];
            cell.count_read += 1;
            result.push(cell.value);
        }
        Ok(result)
    }

    fn set_bits(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Coil],
    ) -> Result<(), StoreError> {
        let offset = self
            .offsets
            .of(space_of(function).ok_or(StoreError::InvalidAddress)?);
        let mut index = offset + usize::from(address / WORD_BITS);
        let mut bit_index = address % WORD_BITS;
        for value in values {
            let cell = self
                .registers
                .get_mut(index)
                .ok_or(StoreError::InvalidAddress)?;
            let mask = 1 << bit_index;
            if *value {
                cell.value |= mask;
            } else {
                cell.value &= !mask;
            }
            cell.count_write += 1;
            bit_index += 1;
            if bit_index == WORD_BITS {
                bit_index = 0;
                index += 1;
            }
        }
        Ok(())
    }

    fn set_registers(
        &mut self,
        function: FunctionCode,
        address: Address,
        values: &[Word],
    ) -> Result<(), StoreError> {
        let offset = self
            .offsets
            .of(space_of(function).ok_or(StoreError::InvalidAddress)?);
        let start = offset + usize::from(address);
        for (i, value) in values.iter().enumerate() {
            let cell = self
                .registers
                .get_mut(start + i)
                .ok_or(StoreError::InvalidAddress)?;
            cell.value = *value;
            cell.count_write += 1;
        }
        Ok(())
    }
}

fn is_bits(function: FunctionCode) -> bool {
    use FunctionCode::*;
    matches!(
        function,
        ReadCoils | ReadDiscreteInputs | WriteSingleCoil | WriteMultipleCoils
    )
}

#[allow(clippy::cast_possible_truncation)]
fn registers_from_u32(value: u32) -> [Word; 2] {
    [(value >> 16) as Word, (value & 0xFFFF) as Word]
}

fn u32_from_registers(hi: Word, lo: Word) -> u32 {
    u32::from(hi) << 16 | u32::from(lo)
}

fn json_u16(value: &serde_json::Value, section: &str) -> Result<Word, ConfigError> {
    value
        .as_u64()
        .and_then(|v| Word::try_from(v).ok())
        .ok_or_else(|| invalid(format!("section {section:?}: value must fit into 16 bit")))
}

fn json_u32(value: &serde_json::Value, section: &str) -> Result<u32, ConfigError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(format!("section {section:?}: value must fit into 32 bit")))
}

#[allow(clippy::cast_possible_truncation)]
fn json_f32(value: &serde_json::Value, section: &str) -> Result<f32, ConfigError> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| invalid(format!("section {section:?}: value must be a number")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn action_increment(registers: &mut [Cell], index: usize) {
    let args = registers[index].args;
    match registers[index].cell_type {
        CellType::Bits | CellType::Uint16 => {
            let mut value = registers[index].value.wrapping_add(1);
            if let Some(maxval) = args.maxval {
                if f64::from(value) > maxval {
                    value = args.minval.unwrap_or(0.0) as Word;
                }
            }
            registers[index].value = value;
        }
        CellType::Uint32 => {
            let mut value =
                u32_from_registers(registers[index].value, registers[index + 1].value)
                    .wrapping_add(1);
            if let Some(maxval) = args.maxval {
                if f64::from(value) > maxval {
                    value = args.minval.unwrap_or(0.0) as u32;
                }
            }
            let [hi, lo] = registers_from_u32(value);
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        CellType::Float32 => {
            let mut value = f32::from_bits(u32_from_registers(
                registers[index].value,
                registers[index + 1].value,
            )) + 1.0;
            if let Some(maxval) = args.maxval {
                if f64::from(value) > maxval {
                    value = args.minval.unwrap_or(0.0) as f32;
                }
            }
            let [hi, lo] = registers_from_u32(value.to_bits());
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        _ => (),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn action_random(registers: &mut [Cell], index: usize) {
    let args = registers[index].args;
    let mut rng = rand::thread_rng();
    match registers[index].cell_type {
        CellType::Bits | CellType::Uint16 => {
            let min = args.minval.unwrap_or(0.0) as Word;
            let max = args.maxval.unwrap_or(f64::from(Word::MAX)) as Word;
            registers[index].value = rng.gen_range(min..=max);
        }
        CellType::Uint32 => {
            let min = args.minval.unwrap_or(0.0) as u32;
            let max = args.maxval.unwrap_or(65000.0) as u32;
            let [hi, lo] = registers_from_u32(rng.gen_range(min..=max));
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        CellType::Float32 => {
            let min = args.minval.unwrap_or(0.0);
            let max = args.maxval.unwrap_or(65000.0);
            let value = rng.gen_range(min..=max) as f32;
            let [hi, lo] = registers_from_u32(value.to_bits());
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        _ => (),
    }
}

/// Fill seven consecutive cells with the broken-down local time.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn action_timestamp(registers: &mut [Cell], index: usize) {
    use chrono::{Datelike as _, Timelike as _};

    let now = chrono::Local::now();
    let fields = [
        now.year() as Word,
        now.month0() as Word,
        now.day() as Word,
        now.weekday().number_from_monday() as Word,
        now.hour() as Word,
        now.minute() as Word,
        now.second() as Word,
    ];
    for (i, field) in fields.into_iter().enumerate() {
        if let Some(cell) = registers.get_mut(index + i) {
            cell.value = field;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn action_uptime(registers: &mut [Cell], index: usize, uptime_secs: u64) {
    match registers[index].cell_type {
        CellType::Bits => registers[index].value = 0,
        CellType::Uint16 => registers[index].value = uptime_secs as Word,
        CellType::Uint32 => {
            let [hi, lo] = registers_from_u32(uptime_secs as u32);
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        CellType::Float32 => {
            #[allow(clippy::cast_precision_loss)]
            let [hi, lo] = registers_from_u32((uptime_secs as f32).to_bits());
            registers[index].value = hi;
            registers[index + 1].value = lo;
        }
        _ => (),
    }
}
