// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport helpers
//!
//! The clients and servers of this crate operate on anything implementing
//! [`AsyncRead`](tokio::io::AsyncRead) + [`AsyncWrite`](tokio::io::AsyncWrite).
//! This module provides the pieces that sit between a raw transport and
//! the framers: local-echo suppression for serial converters, an
//! in-process null modem for tests and reconnection with exponential
//! backoff.

pub mod echo;

pub mod nullmodem;

#[cfg(any(feature = "rtu", feature = "ascii", feature = "tcp"))]
pub mod reconnect;

pub use self::{echo::LocalEcho, nullmodem::NullModem};

#[cfg(any(feature = "rtu", feature = "ascii", feature = "tcp"))]
pub use self::reconnect::{connect_with_backoff, Connect, ReconnectParams};
