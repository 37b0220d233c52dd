// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local-echo suppression
//!
//! Some serial converters (USB/RS-485) echo every transmitted byte back
//! to the sender. [`LocalEcho`] wraps such a transport, records the
//! transmitted bytes and strips any received prefix that matches the
//! outstanding echo before the framer sees it.

use std::{
    collections::VecDeque,
    io::Result,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Transport wrapper suppressing the local echo of transmitted bytes.
#[derive(Debug)]
pub struct LocalEcho<T> {
    inner: T,
    pending: VecDeque<u8>,
}

impl<T> LocalEcho<T> {
    /// Wrap a transport whose driver echoes transmitted bytes.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    /// Release the wrapped transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn strip_echo(&mut self, data: &[u8]) -> usize {
        let mut stripped = 0;
        while stripped < data.len() {
            let Some(&expected) = self.pending.front() else {
                break;
            };
            if data[stripped] != expected {
                // The received data diverges from what was transmitted,
                // so this is not an echo after all. Deliver everything
                // from here on unmodified.
                log::warn!(
                    "Received data does not match the transmitted bytes, disabling echo suppression for {} pending byte(s)",
                    self.pending.len()
                );
                self.pending.clear();
                break;
            }
            self.pending.pop_front();
            stripped += 1;
        }
        stripped
    }
}

impl<T> AsyncRead for LocalEcho<T>
where
    T: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<()>> {
        let this = self.get_mut();
        loop {
            let mut chunk = [0u8; 4096];
            let max_len = chunk.len().min(buf.remaining());
            let mut chunk_buf = ReadBuf::new(&mut chunk[..max_len]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk_buf))?;
            let filled = chunk_buf.filled();
            if filled.is_empty() {
                // EOF
                return Poll::Ready(Ok(()));
            }
            let stripped = this.strip_echo(filled);
            if stripped < filled.len() {
                buf.put_slice(&filled[stripped..]);
                return Poll::Ready(Ok(()));
            }
            // Everything read so far was echo, poll again.
        }
    }
}

impl<T> AsyncWrite for LocalEcho<T>
where
    T: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize>> {
        let this = self.get_mut();
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.pending.extend(&buf[..written]);
        Poll::Ready(Ok(written))
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
    async fn strips_echoed_bytes_before_response() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut transport = LocalEcho::new(local);

        transport.write_all(b"\x01\x03\x00\x01").await.unwrap();

        // The remote echoes the transmitted bytes, then responds.
        let mut echoed = [0u8; 4];
        remote.read_exact(&mut echoed).await.unwrap();
        remote.write_all(&echoed).await.unwrap();
        remote.write_all(b"\x01\x03\x02").await.unwrap();

        let mut received = [0u8; 3];
        transport.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"\x01\x03\x02");
    }

    #[tokio::test]
    async fn passes_data_through_without_pending_echo() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut transport = LocalEcho::new(local);

        remote.write_all(b"\xAA\xBB").await.unwrap();

        let mut received = [0u8; 2];
        transport.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"\xAA\xBB");
    }

    #[tokio::test]
    async fn echo_split_across_reads() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut transport = LocalEcho::new(local);

        transport.write_all(b"\x11\x22\x33\x44").await.unwrap();

        let mut echoed = [0u8; 4];
        remote.read_exact(&mut echoed).await.unwrap();
        // Echo arrives in two fragments, the response in a third.
        remote.write_all(&echoed[..2]).await.unwrap();
        remote.flush().await.unwrap();
        remote.write_all(&echoed[2..]).await.unwrap();
        remote.write_all(b"\x55").await.unwrap();

        let mut received = [0u8; 1];
        transport.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"\x55");
    }
}
