// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, ErrorKind, Result};

use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{BufMut, Bytes, BytesMut},
    frame::tls::*,
};

use super::*;

/// Codecs for the Modbus/TCP Security wire format.
///
/// A TLS record carries a single bare PDU without any envelope. Since the
/// TLS layer is stream oriented towards the application, the PDU length
/// tables are used to delimit PDUs, the same way the RTU framer does but
/// without the device id and CRC.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    pdu_lengths: PduLengths,
}

impl ClientCodec {
    /// Extend the frame length tables for custom function codes.
    pub(crate) fn with_pdu_lengths(pdu_lengths: PduLengths) -> Self {
        Self { pdu_lengths }
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    pdu_lengths: PduLengths,
}

impl ServerCodec {
    /// Extend the frame length tables for custom function codes.
    pub(crate) fn with_pdu_lengths(pdu_lengths: PduLengths) -> Self {
        Self { pdu_lengths }
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some(pdu_len) = response_pdu_len(buf, &self.pdu_lengths)? else {
            return Ok(None);
        };
        if buf.len() < pdu_len {
            return Ok(None);
        }
        let pdu_data = buf.split_to(pdu_len).freeze();
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr: Header, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu<'static>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>> {
        let Some(pdu_len) = request_pdu_len(buf, &self.pdu_lengths)? else {
            return Ok(None);
        };
        if buf.len() < pdu_len {
            return Ok(None);
        }
        let pdu_data = buf.split_to(pdu_len).freeze();
        let pdu = RequestPdu::try_from(pdu_data)?;
        Ok(Some(RequestAdu {
            hdr: Header,
            pdu,
        }))
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { pdu, .. } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        buf.reserve(pdu_data.len());
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { pdu, .. } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len());
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_without_envelope() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header,
            pdu: Request::ReadHoldingRegisters(0x082B, 2).into(),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x03, 0x08, 0x2B, 0x00, 0x02]);
    }

    #[test]
    fn decode_fragmented_response() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x03, 0x04, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x11, 0x00, 0x12]);
        let ResponseAdu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
        if let Ok(Response::ReadHoldingRegisters(words)) = pdu.into() {
            assert_eq!(words, vec![0x11, 0x12]);
        } else {
            panic!("unexpected response")
        }
    }

    #[test]
    fn decode_request() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&[0x01, 0x00, 0x00, 0x00, 0x08][..]);
        let RequestAdu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Request::from(RequestPdu::from(pdu)), Request::ReadCoils(0, 8));
    }
}
