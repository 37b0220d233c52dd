// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use crate::frame::ExceptionCode;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
///
/// The outer result signals whether the request could be delivered and a
/// response received at all. The inner result carries the outcome reported
/// by the server: either the successful payload or a Modbus
/// [`ExceptionCode`]. Exception responses are valid responses and are never
/// mapped to [`Error`].
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionCode>, Error>;

/// Modbus client errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid request parameters, detected before any I/O took place.
    #[error("invalid request parameter: {0}")]
    Parameter(&'static str),

    /// The underlying transport failed: connecting, sending, receiving or
    /// decoding a frame. The affected connection is no longer usable.
    #[error(transparent)]
    Transport(#[from] std::io::Error),
}
