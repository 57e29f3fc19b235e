//! JPIP encodes most message header fields as VBAS ("variable-length byte-aligned segments"):
//!  a sequence of bytes, each contributing its low seven bits, most significant group first,
//!  with the high bit set on every byte except the last.
//!
//! NB: This is *not* LEB128 (which starts with the least significant group), so varint crates
//!      cannot be used for it.

use bytes::{Buf, BufMut};
use crate::error::{JpipError, JpipResult};

const CONTINUATION_BIT: u8 = 0x80;
const VALUE_BITS: u8 = 0x7F;

pub trait VbasBufExt: Buf {
    fn try_get_vbas_byte(&mut self) -> JpipResult<u8> {
        if !self.has_remaining() {
            return Err(JpipError::malformed_header("VBAS is truncated"));
        }
        Ok(self.get_u8())
    }

    fn try_get_vbas(&mut self) -> JpipResult<u64> {
        let first = self.try_get_vbas_byte()?;
        let value = (first & VALUE_BITS) as u64;
        if first & CONTINUATION_BIT == 0 {
            return Ok(value);
        }
        self.try_get_vbas_continued(value)
    }

    /// Continues reading a VBAS whose first byte was already consumed and contributed
    ///  `initial` - this is needed for the Bin-ID, whose first byte carries flags in addition
    ///  to value bits.
    fn try_get_vbas_continued(&mut self, initial: u64) -> JpipResult<u64> {
        let mut value = initial;
        loop {
            let byte = self.try_get_vbas_byte()?;
            if value > (u64::MAX >> 7) {
                return Err(JpipError::malformed_header("VBAS value exceeds 64 bits"));
            }
            value = (value << 7) | (byte & VALUE_BITS) as u64;

            if byte & CONTINUATION_BIT == 0 {
                return Ok(value);
            }
        }
    }
}

impl <T: Buf> VbasBufExt for T {
}


pub trait VbasBufMutExt: BufMut {
    fn put_vbas(&mut self, value: u64) {
        self.put_vbas_with_first_byte_bits(value, 7, 0);
    }

    /// Writes a VBAS whose first byte carries only `first_byte_value_bits` value bits, the
    ///  remaining bits (below the continuation bit) being taken from `first_byte_flags`.
    fn put_vbas_with_first_byte_bits(&mut self, value: u64, first_byte_value_bits: u32, first_byte_flags: u8) {
        let mut num_groups = 0;
        while num_groups < 10 && (value >> (7 * num_groups)) >= (1 << first_byte_value_bits) {
            num_groups += 1;
        }

        let first_value = ((value >> (7 * num_groups)) & ((1 << first_byte_value_bits) - 1)) as u8;
        let continuation = if num_groups > 0 { CONTINUATION_BIT } else { 0 };
        self.put_u8(continuation | first_byte_flags | first_value);

        for group in (0..num_groups).rev() {
            let continuation = if group > 0 { CONTINUATION_BIT } else { 0 };
            self.put_u8(continuation | ((value >> (7 * group)) as u8 & VALUE_BITS));
        }
    }
}

impl <T: BufMut> VbasBufMutExt for T {
}
