// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{Buf, BufMut, Bytes, BytesMut},
    frame::tcp::*,
};

use super::*;

const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

// MBAP length field covers the unit id byte plus the PDU, which is
// limited to 253 bytes.
const MAX_MBAP_LEN: usize = 254;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduDecoder;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ClientCodec {
    pub(crate) decoder: AduDecoder,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ServerCodec {
    pub(crate) decoder: AduDecoder,
}

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        loop {
            if buf.len() < HEADER_LEN {
                return Ok(None);
            }

            let protocol_id = BigEndian::read_u16(&buf[2..4]);
            let len = usize::from(BigEndian::read_u16(&buf[4..6]));
            if protocol_id != PROTOCOL_ID || len == 0 || len > MAX_MBAP_LEN {
                // An invalid header cannot be trusted; drop it and
                // resynchronize on the following bytes.
                log::warn!(
                    "Invalid MBAP header (protocol id = {protocol_id}, length = {len}), skipping {HEADER_LEN} bytes"
                );
                buf.advance(HEADER_LEN);
                continue;
            }

            // len = bytes of PDU + one byte (unit id)
            let pdu_len = len - 1;
            if buf.len() < HEADER_LEN + pdu_len {
                return Ok(None);
            }

            let header_data = buf.split_to(HEADER_LEN);
            let transaction_id = BigEndian::read_u16(&header_data[0..2]);
            let device_id = header_data[6];

            let header = Header {
                transaction_id,
                device_id,
            };

            let pdu_data = buf.split_to(pdu_len).freeze();

            return Ok(Some((header, pdu_data)));
        }
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        if let Some((hdr, pdu_data)) = self.decoder.decode(buf)? {
            let pdu = ResponsePdu::try_from(pdu_data)?;
            Ok(Some(ResponseAdu { hdr, pdu }))
        } else {
            Ok(None)
        }
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu<'static>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>> {
        if let Some((hdr, pdu_data)) = self.decoder.decode(buf)? {
            let pdu = RequestPdu::try_from(pdu_data)?;
            Ok(Some(RequestAdu {
                hdr,
                pdu,
            }))
        } else {
            Ok(None)
        }
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu, .. } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu_data.len() + 1));
        buf.put_u8(hdr.device_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        buf.reserve(pdu_data.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu_data.len() + 1));
        buf.put_u8(hdr.device_id);
        buf.put_slice(&pdu_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod client {

        use super::*;

        const TRANSACTION_ID: TransactionId = 0x1001;
        const TRANSACTION_ID_HI: u8 = 0x10;
        const TRANSACTION_ID_LO: u8 = 0x01;

        const PROTOCOL_ID_HI: u8 = (PROTOCOL_ID >> 8) as u8;
        const PROTOCOL_ID_LO: u8 = (PROTOCOL_ID & 0xFF) as u8;

        const DEVICE_ID: u8 = 0xFE;

        #[test]
        fn decode_header_fragment() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 6);
        }

        #[test]
        fn decode_partly_received_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    PROTOCOL_ID_HI,
                    PROTOCOL_ID_LO,
                    0x00, // length HI
                    0x03, // length LO
                    DEVICE_ID,
                    0x02, // function code
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 8);
        }

        #[test]
        fn decode_exception_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    PROTOCOL_ID_HI,
                    PROTOCOL_ID_LO,
                    0x00, // length HI
                    0x03, // length LO
                    DEVICE_ID,
                    0x82, // exception = 0x80 + 0x02
                    0x03, //
                    0x00, //
                ][..],
            );

            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, TRANSACTION_ID);
            assert_eq!(hdr.device_id, DEVICE_ID);
            if let ResponsePdu(Err(err)) = pdu {
                assert_eq!(format!("{err}"), "Modbus function 2: Illegal data value");
                assert_eq!(buf.len(), 1);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn decode_with_invalid_protocol_id_skips_header() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    0x33, // protocol id HI
                    0x12, // protocol id LO
                    0x00, // length HI
                    0x03, // length LO
                    DEVICE_ID,
                ][..],
            );
            // Followed by a valid frame.
            buf.extend_from_slice(&[
                TRANSACTION_ID_HI,
                TRANSACTION_ID_LO,
                PROTOCOL_ID_HI,
                PROTOCOL_ID_LO,
                0x00,
                0x04,
                DEVICE_ID,
                0x03, // function code
                0x02, // byte count
                0x00,
                0x11,
            ]);
            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, TRANSACTION_ID);
            if let ResponsePdu(Ok(Response::ReadHoldingRegisters(words))) = pdu {
                assert_eq!(words, vec![0x11]);
            } else {
                panic!("unexpected response")
            }
        }

        #[test]
        fn decode_with_oversized_length_skips_header() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    TRANSACTION_ID_HI,
                    TRANSACTION_ID_LO,
                    PROTOCOL_ID_HI,
                    PROTOCOL_ID_LO,
                    0x12, // length HI
                    0x34, // length LO
                    DEVICE_ID,
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert!(buf.is_empty());
        }

        #[test]
        fn encode_read_request() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let req = Request::ReadInputRegisters(0x23, 5);
            let pdu = req.clone().into();
            let hdr = Header {
                transaction_id: TRANSACTION_ID,
                device_id: DEVICE_ID,
            };
            let adu = RequestAdu {
                hdr,
                pdu,
            };
            codec.encode(adu, &mut buf).unwrap();
            // header
            assert_eq!(buf[0], TRANSACTION_ID_HI);
            assert_eq!(buf[1], TRANSACTION_ID_LO);
            assert_eq!(buf[2], PROTOCOL_ID_HI);
            assert_eq!(buf[3], PROTOCOL_ID_LO);
            assert_eq!(buf[4], 0x0);
            assert_eq!(buf[5], 0x6);
            assert_eq!(buf[6], DEVICE_ID);

            drop(buf.split_to(7));
            let pdu: Bytes = RequestPdu(req).try_into().unwrap();
            assert_eq!(buf, pdu);
        }

        #[test]
        fn encode_read_holding_registers_wire_bytes() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let adu = RequestAdu {
                hdr: Header {
                    transaction_id: 5,
                    device_id: 1,
                },
                pdu: Request::ReadHoldingRegisters(1, 2).into(),
            };
            codec.encode(adu, &mut buf).unwrap();
            assert_eq!(
                &buf[..],
                &[0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x01, 0x00, 0x02]
            );
        }

        #[test]
        fn decode_read_holding_registers_wire_bytes() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x00, 0x05, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x11, 0x00, 0x11,
                ][..],
            );
            let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(hdr.transaction_id, 5);
            assert_eq!(hdr.device_id, 1);
            if let ResponsePdu(Ok(Response::ReadHoldingRegisters(words))) = pdu {
                assert_eq!(words, vec![17, 17]);
            } else {
                panic!("unexpected response")
            }
        }
    }
}
