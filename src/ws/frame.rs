//! Frame header codec and masking
//!
//! Wire layout of a frame header:
//!
//! ```text
//!  byte 0: FIN | RSV1-3 | opcode
//!  byte 1: MASK | 7-bit length (126 = 16-bit follows, 127 = 64-bit follows)
//!  [2 or 8 bytes extended length, network order]
//!  [4 bytes mask key]
//! ```

use super::Opcode;
use crate::http::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Longest possible frame header
pub const MAX_HEADER_LEN: usize = 14;

/// Largest payload of a control frame
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Header of a final, masked client frame
    pub fn client(opcode: Opcode, payload_len: u64, mask: [u8; 4]) -> Self {
        FrameHeader {
            fin: true,
            opcode,
            mask: Some(mask),
            payload_len,
        }
    }

    /// Bytes the header occupies on the wire
    pub fn encoded_len(&self) -> usize {
        2 + extended_len_bytes(self.payload_len) + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Append the header to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let fin = if self.fin { 0x80 } else { 0x00 };
        buf.put_u8(fin | self.opcode.as_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        match self.payload_len {
            len if len < 126 => buf.put_u8(mask_bit | len as u8),
            len if len <= u16::MAX as u64 => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len);
            }
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }

    /// Bytes of extended length and mask announced by the first two header bytes
    pub fn remaining_header_len(first_two: [u8; 2]) -> usize {
        let ext = match first_two[1] & 0x7f {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        ext + if first_two[1] & 0x80 != 0 { 4 } else { 0 }
    }

    /// Decode a header from the start of `buf`
    ///
    /// Returns `Ok(None)` if `buf` does not hold the whole header yet,
    /// otherwise the header and the number of bytes it used.
    pub fn decode(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let needed = 2 + Self::remaining_header_len([buf[0], buf[1]]);
        if buf.len() < needed {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let opcode = Opcode::from_u8(buf[0]);
        let masked = buf[1] & 0x80 != 0;

        let mut pos = 2;
        let payload_len = match buf[1] & 0x7f {
            126 => {
                let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
                pos += 2;
                len
            }
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                pos += 8;
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(Error::Protocol("frame length has its high bit set".to_string()));
                }
                len
            }
            len => len as u64,
        };

        let mask = if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[pos..pos + 4]);
            pos += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            FrameHeader {
                fin,
                opcode,
                mask,
                payload_len,
            },
            pos,
        )))
    }
}

fn extended_len_bytes(len: u64) -> usize {
    match len {
        len if len < 126 => 0,
        len if len <= u16::MAX as u64 => 2,
        _ => 8,
    }
}

/// XOR `payload` with `key`, starting `offset` bytes into the key stream
pub fn apply_mask(payload: &mut [u8], key: [u8; 4], offset: usize) {
    payload
        .iter_mut()
        .zip(key.iter().cycle().skip(offset % 4))
        .for_each(|(byte, k)| *byte ^= k);
}

/// Encode a complete final, masked frame
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Bytes {
    let header = FrameHeader::client(opcode, payload.len() as u64, mask);
    let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
    header.encode_into(&mut buf);

    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], mask, 0);
    buf.freeze()
}
