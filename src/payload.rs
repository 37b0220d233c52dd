// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed payload conversions
//!
//! Modbus transfers all data as 16 bit registers. This module converts
//! between typed values and register arrays with configurable byte order
//! (within each register) and word order (across registers), covering
//! the layouts found in the field.
//!
//! The conversions are pure and involve no I/O.

use byteorder::{BigEndian, ByteOrder as _};

use crate::frame::Word;

/// Byte or word ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Most significant first (the Modbus default).
    #[default]
    Big,
    /// Least significant first.
    Little,
}

/// Byte and word order of a multi-register value.
///
/// The default `(Big, Big)` matches the Modbus specification; many
/// devices ship with little-endian word order for 32 and 64 bit values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encoding {
    /// Order of the two bytes within each register.
    pub byte_order: Order,
    /// Order of the registers of a multi-register value.
    pub word_order: Order,
}

impl Encoding {
    /// Big-endian bytes and words, the Modbus default.
    #[must_use]
    pub const fn big_endian() -> Self {
        Self {
            byte_order: Order::Big,
            word_order: Order::Big,
        }
    }

    fn words_from_bytes(self, bytes: &[u8]) -> Vec<Word> {
        debug_assert!(bytes.len() % 2 == 0);
        let mut words: Vec<Word> = bytes
            .chunks_exact(2)
            .map(|chunk| match self.byte_order {
                Order::Big => Word::from_be_bytes([chunk[0], chunk[1]]),
                Order::Little => Word::from_le_bytes([chunk[0], chunk[1]]),
            })
            .collect();
        if self.word_order == Order::Little {
            words.reverse();
        }
        words
    }

    fn bytes_from_words(self, words: &[Word]) -> Vec<u8> {
        let mut words = words.to_vec();
        if self.word_order == Order::Little {
            words.reverse();
        }
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for word in words {
            let pair = match self.byte_order {
                Order::Big => word.to_be_bytes(),
                Order::Little => word.to_le_bytes(),
            };
            bytes.extend_from_slice(&pair);
        }
        bytes
    }
}

/// Conversion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The register array has the wrong length for the requested type.
    #[error("invalid register count for the requested type")]
    InvalidLength,
}

macro_rules! int_conversions {
    ($to:ident, $from:ident, $ty:ty, $words:expr) => {
        /// Encode the value into its register representation.
        #[must_use]
        pub fn $to(value: $ty, encoding: Encoding) -> Vec<Word> {
            encoding.words_from_bytes(&value.to_be_bytes())
        }

        /// Decode a value from its register representation.
        pub fn $from(words: &[Word], encoding: Encoding) -> Result<$ty, PayloadError> {
            if words.len() != $words {
                return Err(PayloadError::InvalidLength);
            }
            let bytes = encoding.bytes_from_words(words);
            let mut buf = [0u8; $words * 2];
            buf.copy_from_slice(&bytes);
            Ok(<$ty>::from_be_bytes(buf))
        }
    };
}

int_conversions!(u16_to_registers, u16_from_registers, u16, 1);
int_conversions!(i16_to_registers, i16_from_registers, i16, 1);
int_conversions!(u32_to_registers, u32_from_registers, u32, 2);
int_conversions!(i32_to_registers, i32_from_registers, i32, 2);
int_conversions!(u64_to_registers, u64_from_registers, u64, 4);
int_conversions!(i64_to_registers, i64_from_registers, i64, 4);
int_conversions!(f32_to_registers, f32_from_registers, f32, 2);
int_conversions!(f64_to_registers, f64_from_registers, f64, 4);

/// Encode a string into registers, two bytes per register, padded with
/// spaces to an even length. Strings are laid out byte by byte and are
/// not affected by byte or word order.
#[must_use]
pub fn string_to_registers(value: &str) -> Vec<Word> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 != 0 {
        bytes.push(b' ');
    }
    bytes
        .chunks_exact(2)
        .map(BigEndian::read_u16)
        .collect()
}

/// Decode a string from registers. Fails if the bytes are not valid
/// UTF-8.
pub fn string_from_registers(words: &[Word]) -> Result<String, PayloadError> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    String::from_utf8(bytes).map_err(|_| PayloadError::InvalidLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_reference_value() {
        assert_eq!(
            u32_to_registers(27123, Encoding::default()),
            vec![0x0000, 0x69F3]
        );
    }

    #[test]
    fn f32_reference_value() {
        assert_eq!(
            f32_to_registers(3.141_592, Encoding::default()),
            vec![0x4049, 0x0FD8]
        );
    }

    #[test]
    fn f64_reference_value() {
        assert_eq!(
            f64_to_registers(3.141_592_653_589_79, Encoding::default()),
            vec![0x4009, 0x21FB, 0x5444, 0x2D11]
        );
    }

    #[test]
    fn string_reference_value() {
        assert_eq!(string_to_registers("abcd"), vec![0x6162, 0x6364]);
        assert_eq!(string_from_registers(&[0x6162, 0x6364]).unwrap(), "abcd");
        assert_eq!(string_to_registers("abc"), vec![0x6162, 0x6320]);
    }

    #[test]
    fn word_order_reverses_registers() {
        let encoding = Encoding {
            byte_order: Order::Big,
            word_order: Order::Little,
        };
        assert_eq!(u32_to_registers(27123, encoding), vec![0x69F3, 0x0000]);
        assert_eq!(
            u32_from_registers(&[0x69F3, 0x0000], encoding).unwrap(),
            27123
        );
    }

    #[test]
    fn byte_order_swaps_within_registers() {
        let encoding = Encoding {
            byte_order: Order::Little,
            word_order: Order::Big,
        };
        assert_eq!(u16_to_registers(0x1234, encoding), vec![0x3412]);
        assert_eq!(u16_from_registers(&[0x3412], encoding).unwrap(), 0x1234);
    }

    #[test]
    fn roundtrip_all_types_and_orders() {
        let encodings = [
            Encoding {
                byte_order: Order::Big,
                word_order: Order::Big,
            },
            Encoding {
                byte_order: Order::Big,
                word_order: Order::Little,
            },
            Encoding {
                byte_order: Order::Little,
                word_order: Order::Big,
            },
            Encoding {
                byte_order: Order::Little,
                word_order: Order::Little,
            },
        ];
        for encoding in encodings {
            assert_eq!(
                u16_from_registers(&u16_to_registers(0xBEEF, encoding), encoding).unwrap(),
                0xBEEF
            );
            assert_eq!(
                i16_from_registers(&i16_to_registers(-1234, encoding), encoding).unwrap(),
                -1234
            );
            assert_eq!(
                u32_from_registers(&u32_to_registers(0xDEAD_BEEF, encoding), encoding).unwrap(),
                0xDEAD_BEEF
            );
            assert_eq!(
                i32_from_registers(&i32_to_registers(-7_654_321, encoding), encoding).unwrap(),
                -7_654_321
            );
            assert_eq!(
                u64_from_registers(&u64_to_registers(0x0123_4567_89AB_CDEF, encoding), encoding)
                    .unwrap(),
                0x0123_4567_89AB_CDEF
            );
            assert_eq!(
                i64_from_registers(&i64_to_registers(-987_654_321_012, encoding), encoding)
                    .unwrap(),
                -987_654_321_012
            );
            assert_eq!(
                f32_from_registers(&f32_to_registers(1.5, encoding), encoding).unwrap(),
                1.5
            );
            assert_eq!(
                f64_from_registers(&f64_to_registers(-2.25, encoding), encoding).unwrap(),
                -2.25
            );
        }
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(
            u32_from_registers(&[0x0001], Encoding::default()),
            Err(PayloadError::InvalidLength)
        );
        assert_eq!(
            f64_from_registers(&[0, 0, 0], Encoding::default()),
            Err(PayloadError::InvalidLength)
        );
    }
}
