// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, ErrorKind, Result};

use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{Buf, BufMut, Bytes, BytesMut},
    device::DeviceId,
    frame::ascii::*,
};

use super::*;

const FRAME_START: u8 = b':';
const FRAME_END: &[u8] = b"\r\n";

// ":" + hex(device + function code + lrc) + CRLF
const MIN_FRAME_LEN: usize = 1 + 6 + 2;

// The data field is limited to 2 * 252 chars.
const MAX_FRAME_LEN: usize = 513;

/// Stream decoder for the ASCII framing.
///
/// Unlike RTU there is no need to know the expected PDU size in advance:
/// frames are delimited by the start and end characters. Anything before
/// the start character is garbage and discarded.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct FrameDecoder;

impl FrameDecoder {
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(DeviceId, Bytes)>> {
        loop {
            // Discard any bytes preceding the start of a frame.
            match buf.iter().position(|&b| b == FRAME_START) {
                None => {
                    if !buf.is_empty() {
                        log::debug!("Skipping {} byte(s) of garbage", buf.len());
                        buf.clear();
                    }
                    return Ok(None);
                }
                Some(0) => (),
                Some(start) => {
                    log::debug!("Skipping {start} byte(s) of garbage before frame start");
                    buf.advance(start);
                }
            }

            let Some(end) = buf
                .windows(FRAME_END.len())
                .position(|window| window == FRAME_END)
            else {
                if buf.len() > MAX_FRAME_LEN {
                    // No terminator within the maximum frame length; the
                    // start character was part of garbage.
                    log::warn!("Dropping oversized unterminated frame");
                    buf.advance(1);
                    continue;
                }
                // Incomplete frame
                return Ok(None);
            };

            let frame_len = end + FRAME_END.len();
            let frame = buf.split_to(frame_len);
            if frame_len < MIN_FRAME_LEN {
                log::warn!("Dropping undersized frame: {frame:X?}");
                continue;
            }

            let decoded = match hex::decode(&frame[1..frame_len - FRAME_END.len()]) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::warn!("Dropping frame with invalid hex encoding: {err}");
                    continue;
                }
            };

            let (payload, lrc) = decoded.split_at(decoded.len() - 1);
            if !check_lrc(payload, lrc[0]) {
                log::warn!("Dropping frame with invalid LRC");
                continue;
            }

            let device_id = payload[0];
            let pdu_data = Bytes::copy_from_slice(&payload[1..]);
            return Ok(Some((device_id, pdu_data)));
        }
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    pub(crate) decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    pub(crate) decoder: FrameDecoder,
}

/// LRC is the two's complement of the byte sum, truncated to 8 bit.
pub(crate) fn compute_lrc(data: &[u8]) -> u8 {
    let sum = data
        .iter()
        .fold(0u8, |accu, byte| accu.wrapping_add(*byte));
    sum.wrapping_neg()
}

pub(crate) fn check_lrc(data: &[u8], expected: u8) -> bool {
    compute_lrc(data) == expected
}

fn encode_frame(device_id: DeviceId, pdu_data: &[u8], buf: &mut BytesMut) {
    let mut payload = Vec::with_capacity(1 + pdu_data.len() + 1);
    payload.push(device_id);
    payload.extend_from_slice(pdu_data);
    payload.push(compute_lrc(&payload));

    let encoded = hex::encode_upper(payload);
    buf.reserve(1 + encoded.len() + FRAME_END.len());
    buf.put_u8(FRAME_START);
    buf.put_slice(encoded.as_bytes());
    buf.put_slice(FRAME_END);
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((device_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { device_id };

        // Decoding of the PDU is unlikely to fail due
        // to transmission errors, because the frame's bytes
        // have already been verified with the LRC.
        ResponsePdu::try_from(pdu_data)
            .map(|pdu| Some(ResponseAdu { hdr, pdu }))
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode response PDU: {err}");
                err
            })
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu<'static>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>> {
        let Some((device_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };

        let hdr = Header { device_id };

        RequestPdu::try_from(pdu_data)
            .map(|pdu| {
                Some(RequestAdu {
                    hdr,
                    pdu,
                })
            })
            .map_err(|err| {
                // Unrecoverable error
                log::error!("Failed to decode request PDU: {err}");
                err
            })
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu, .. } = adu;
        let pdu_data: Bytes = pdu.try_into()?;
        encode_frame(hdr.device_id, &pdu_data, buf);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.device_id, &pdu_data, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_lrc() {
        let msg = [0x12, 0x34, 0x23, 0x45, 0x34, 0x56, 0x45, 0x67];
        assert_eq!(compute_lrc(&msg), 0x1C);
        assert!(check_lrc(&msg, 0x1C));
        assert!(!check_lrc(&msg, 0x1D));
    }

    #[test]
    fn encode_read_request() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header { device_id: 0xF7 },
            pdu: Request::ReadHoldingRegisters(0x006B, 3).into(),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], b":F703006B000398\r\n");
    }

    #[test]
    fn decode_response_frame() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":F703041389026BF9\r\n"[..]);
        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(hdr.device_id, 0xF7);
        if let Ok(Response::ReadHoldingRegisters(data)) = pdu.into() {
            assert_eq!(data, vec![0x1389, 0x026B]);
        } else {
            panic!("unexpected response")
        }
    }

    #[test]
    fn decode_skips_garbage_before_frame_start() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b"\x42\x43garbage:F703041389026BF9\r\n"[..]);
        let ResponseAdu { hdr, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.device_id, 0xF7);
    }

    #[test]
    fn decode_incomplete_frame() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":F70313"[..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn decode_drops_frame_with_bad_lrc() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&b":F703041389026BF8\r\n:F703041389026BF9\r\n"[..]);
        let ResponseAdu { hdr, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.device_id, 0xF7);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_request_frame() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::new();
        let mut encoder = ClientCodec::default();
        let adu = RequestAdu {
            hdr: Header { device_id: 0x11 },
            pdu: Request::WriteSingleRegister(0x0001, 0x0003).into(),
        };
        encoder.encode(adu, &mut buf).unwrap();

        let RequestAdu { hdr, pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.device_id, 0x11);
        assert_eq!(
            Request::from(RequestPdu::from(pdu)),
            Request::WriteSingleRegister(0x0001, 0x0003)
        );
    }
}
