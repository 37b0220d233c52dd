// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection with exponential backoff

use std::{io, time::Duration};

use futures_util::future::BoxFuture;

/// Backoff schedule for reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectParams {
    /// Delay before the second connection attempt. Doubled after every
    /// further failed attempt.
    pub reconnect_delay: Duration,
    /// Upper bound of the delay between attempts.
    pub reconnect_delay_max: Duration,
}

impl Default for ReconnectParams {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(100),
            reconnect_delay_max: Duration::from_secs(300),
        }
    }
}

/// An asynchronous transport factory.
///
/// Implemented for any `FnMut` closure returning a boxed connect future,
/// e.g.:
///
/// ```no_run
/// use futures_util::future::{BoxFuture, FutureExt as _};
/// use tokio::net::TcpStream;
///
/// let socket_addr: std::net::SocketAddr = "127.0.0.1:502".parse().unwrap();
/// let connector = move || -> BoxFuture<'static, std::io::Result<TcpStream>> {
///     TcpStream::connect(socket_addr).boxed()
/// };
/// # let _ = connector;
/// ```
pub trait Connect<T>: Send {
    /// Start a new connection attempt.
    fn connect(&mut self) -> BoxFuture<'_, io::Result<T>>;
}

impl<T, F> Connect<T> for F
where
    F: FnMut() -> BoxFuture<'static, io::Result<T>> + Send,
{
    fn connect(&mut self) -> BoxFuture<'_, io::Result<T>> {
        self()
    }
}

/// Attempt to connect until it succeeds.
///
/// The first attempt starts immediately. After a failed attempt the task
/// sleeps for the current delay, which starts at
/// [`reconnect_delay`](ReconnectParams::reconnect_delay) and doubles per
/// attempt up to
/// [`reconnect_delay_max`](ReconnectParams::reconnect_delay_max).
///
/// The loop runs until a connection is established; cancel it by
/// dropping the returned future.
pub async fn connect_with_backoff<T>(
    connector: &mut dyn Connect<T>,
    params: &ReconnectParams,
) -> T {
    let mut delay = params.reconnect_delay;
    loop {
        match connector.connect().await {
            Ok(transport) => return transport,
            Err(err) => {
                log::warn!("Failed to connect: {err}, next attempt in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(params.reconnect_delay_max);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures_util::FutureExt as _;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_doubles_up_to_max() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempt_times = Arc::new(std::sync::Mutex::new(Vec::new()));

        let counter = Arc::clone(&attempts);
        let times = Arc::clone(&attempt_times);
        let started_at = Instant::now();
        let mut connector = move || -> BoxFuture<'static, io::Result<()>> {
            counter.fetch_add(1, Ordering::SeqCst);
            times.lock().unwrap().push(started_at.elapsed());
            async { Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable")) }.boxed()
        };

        let params = ReconnectParams {
            reconnect_delay: Duration::from_millis(100),
            reconnect_delay_max: Duration::from_millis(1600),
        };

        let connect = connect_with_backoff(&mut connector, &params);
        // The server stays unreachable; stop trying after 7 seconds.
        tokio::time::timeout(Duration::from_millis(6900), connect)
            .await
            .unwrap_err();

        // Attempts at t = 0, 100, 300, 700, 1500, 3100, 4700, 6300 ms.
        let times = attempt_times.lock().unwrap().clone();
        let millis: Vec<u128> = times.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![0, 100, 300, 700, 1500, 3100, 4700, 6300]);
        assert_eq!(attempts.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_successful_connection() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut connector = move || -> BoxFuture<'static, io::Result<u32>> {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        };

        let params = ReconnectParams::default();
        let transport = connect_with_backoff(&mut connector, &params).await;
        assert_eq!(transport, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
