// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process null modem
//!
//! Pairs two endpoints so that whatever is written to one side can be
//! read from the other, preserving byte ordering and close semantics.
//! Used to test clients and servers without real network or serial
//! hardware.

use std::{
    io::Result,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Default buffer capacity of a null modem endpoint, enough for a few
/// maximum sized frames in flight.
const DEFAULT_CAPACITY: usize = 4 * 1024;

/// One endpoint of an in-process serial line.
#[derive(Debug)]
pub struct NullModem {
    inner: DuplexStream,
}

impl NullModem {
    /// Create a connected pair of endpoints with the default capacity.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a connected pair of endpoints buffering at most
    /// `capacity` unread bytes per direction.
    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (Self { inner: a }, Self { inner: b })
    }
}

impl AsyncRead for NullModem {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for NullModem {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    #[tokio::test]
    async fn transfers_bytes_in_order() {
        let (mut a, mut b) = NullModem::pair();
        a.write_all(b"\x01\x02\x03").await.unwrap();
        a.write_all(b"\x04").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x01\x02\x03\x04");
    }

    #[tokio::test]
    async fn close_propagates_as_eof() {
        let (mut a, mut b) = NullModem::pair();
        a.write_all(b"\xFF").await.unwrap();
        a.shutdown().await.unwrap();
        let mut buf = Vec::new();
        b.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0xFF]);
    }

    #[tokio::test]
    async fn drop_fails_the_peer() {
        let (a, mut b) = NullModem::pair();
        drop(a);
        let mut buf = [0u8; 1];
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
