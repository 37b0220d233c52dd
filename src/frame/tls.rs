// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::*;

/// A TLS frame carries a bare PDU, one per record. There is no header on
/// the wire; the transaction id and device id are synthesized on both
/// sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu<'a> {
    pub(crate) hdr: Header,
    pub(crate) pdu: RequestPdu<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: ResponsePdu,
}

impl<'a> From<RequestAdu<'a>> for Request<'a> {
    fn from(from: RequestAdu<'a>) -> Self {
        from.pdu.into()
    }
}

#[cfg(all(feature = "server", feature = "tls"))]
impl<'a> From<RequestAdu<'a>> for DeviceRequest<'a> {
    fn from(from: RequestAdu<'a>) -> Self {
        Self {
            device_id: crate::device::Device::tcp_device().into(),
            request: from.pdu.into(),
        }
    }
}
