// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-connection transaction engines
//!
//! One client state machine per wire format. Each engine owns its framed
//! transport, issues requests, correlates responses, honors timeouts and
//! retries and synthesizes the results of requests that expect no
//! response (broadcasts and Force Listen Only Mode).

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(feature = "tls")]
pub(crate) mod tls;

#[cfg(feature = "udp")]
pub(crate) mod udp;

use std::collections::HashSet;

use crate::{
    device::DeviceId,
    frame::{DiagnosticsSubFunction, Request},
};

/// Transaction id allocator of one connection.
///
/// Ids are handed out round-robin, skipping ids that are still in
/// flight. An id is freed exactly once, when its transaction completes
/// or times out.
#[derive(Debug, Default)]
pub(crate) struct TransactionIds {
    next: u16,
    in_flight: HashSet<u16>,
}

impl TransactionIds {
    pub(crate) fn acquire(&mut self) -> u16 {
        loop {
            let transaction_id = self.next;
            self.next = self.next.wrapping_add(1);
            if self.in_flight.insert(transaction_id) {
                return transaction_id;
            }
        }
    }

    pub(crate) fn release(&mut self, transaction_id: u16) {
        let released = self.in_flight.remove(&transaction_id);
        debug_assert!(released);
    }
}

/// A request that completes without waiting for a response: broadcasts
/// and Force Listen Only Mode.
pub(crate) fn no_response_expected(request: &Request<'_>, device_id: DeviceId) -> bool {
    device_id == 0
        || matches!(
            request,
            Request::Diagnostics(DiagnosticsSubFunction::ForceListenOnlyMode, _)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique_while_in_flight() {
        let mut ids = TransactionIds::default();
        let a = ids.acquire();
        let b = ids.acquire();
        let c = ids.acquire();
        assert_ne!(a, b);
        assert_ne!(b, c);
        ids.release(b);
        // The released id may be reused, the others may not.
        let mut seen = HashSet::new();
        for _ in 0..u32::from(u16::MAX) {
            let id = ids.acquire();
            assert_ne!(id, a);
            assert_ne!(id, c);
            assert!(seen.insert(id));
            ids.release(id);
            seen.remove(&id);
        }
    }

    #[test]
    fn allocator_skips_in_flight_ids_on_wrap() {
        let mut ids = TransactionIds::default();
        let first = ids.acquire();
        assert_eq!(first, 0);
        // Exhaust the id space without releasing the first one.
        for _ in 1..=u16::MAX {
            let id = ids.acquire();
            ids.release(id);
        }
        // The counter wrapped around; id 0 is still in flight and must
        // be skipped.
        assert_ne!(ids.acquire(), 0);
    }

    #[test]
    fn broadcast_and_listen_only_expect_no_response() {
        assert!(no_response_expected(&Request::ReadCoils(0, 1), 0));
        assert!(!no_response_expected(&Request::ReadCoils(0, 1), 1));
        assert!(no_response_expected(
            &Request::Diagnostics(DiagnosticsSubFunction::ForceListenOnlyMode, vec![0].into()),
            1
        ));
    }
}
