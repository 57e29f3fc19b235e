use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::trace;
use crate::error::{JpipError, JpipResult};
use crate::util::vbas::VbasBufExt;

/// Message class codes (ISO 15444-9 A.2.2). The odd 'extended' classes carry an additional Aux
///  VBAS after the message length.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum DatabinClass {
    Precinct = 0,
    ExtendedPrecinct = 1,
    TileHeader = 2,
    Tile = 4,
    ExtendedTile = 5,
    MainHeader = 6,
    Metadata = 8,
}
impl DatabinClass {
    pub fn is_extended(&self) -> bool {
        let raw: u8 = (*self).into();
        raw & 1 == 1
    }

    fn from_vbas(raw: u64) -> JpipResult<DatabinClass> {
        u8::try_from(raw).ok()
            .and_then(|raw| DatabinClass::try_from(raw).ok())
            .ok_or_else(|| JpipError::malformed_header(format!("unknown message class {}", raw)))
    }
}

/// A parsed JPIP message header. Offsets refer to the response buffer the header was parsed
///  from, `msg_offset` is the offset of the message body inside its databin.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageHeader {
    pub class: DatabinClass,
    pub codestream_index: u64,
    pub in_class_id: u64,
    pub msg_offset: u64,
    pub body_start: usize,
    pub body_len: usize,
    pub is_last_byte_in_databin: bool,
    pub aux: Option<u64>,
}
impl MessageHeader {
    /// saturating, lengths that would overflow are rejected by the parser
    pub fn body_end(&self) -> usize {
        self.body_start.saturating_add(self.body_len)
    }

    pub fn body<'a>(&self, all_bytes: &'a [u8]) -> JpipResult<&'a [u8]> {
        self.body_start.checked_add(self.body_len)
            .and_then(|body_end| all_bytes.get(self.body_start..body_end))
            .ok_or_else(|| JpipError::protocol_violation(format!(
                "message body of length {} at offset {} exceeds the response length {}", self.body_len, self.body_start, all_bytes.len())))
    }
}

/// Bin-ID first byte layout: continuation bit, two bits telling which of Class / CSn follow,
///  the 'last byte of databin' flag, and the four most significant bits of the in-class id.
const BIN_ID_CONTINUATION: u8 = 0x80;
const BIN_ID_PRESENCE_SHIFT: u8 = 5;
const BIN_ID_PRESENCE_MASK: u8 = 0x03;
const BIN_ID_LAST_BYTE: u8 = 0x10;
const BIN_ID_VALUE_BITS: u8 = 0x0F;

/// Parses JPIP message headers (ISO 15444-9 A.2). This is stateless: class and codestream index
///  may be omitted from a header, meaning they are the same as in the previous header of the same
///  response, so the caller passes that previous header in.
pub struct MessageHeaderParser;

impl MessageHeaderParser {
    pub fn parse(bytes: &[u8], offset: usize, previous: Option<&MessageHeader>) -> JpipResult<MessageHeader> {
        let mut buf = bytes.get(offset..)
            .ok_or_else(|| JpipError::malformed_header(format!("offset {} is beyond the buffer of length {}", offset, bytes.len())))?;

        let first = buf.try_get_vbas_byte()?;
        let presence = (first >> BIN_ID_PRESENCE_SHIFT) & BIN_ID_PRESENCE_MASK;
        let is_last_byte_in_databin = first & BIN_ID_LAST_BYTE != 0;

        let mut in_class_id = (first & BIN_ID_VALUE_BITS) as u64;
        if first & BIN_ID_CONTINUATION != 0 {
            in_class_id = buf.try_get_vbas_continued(in_class_id)?;
        }

        let (class, codestream_index) = match presence {
            0 => return Err(JpipError::malformed_header("Bin-ID with prohibited class / CSn indicator 0")),
            1 => {
                let previous = previous
                    .ok_or_else(|| JpipError::malformed_header("message header omits class and CSn, but there is no previous header"))?;
                (previous.class, previous.codestream_index)
            }
            2 => {
                let class = DatabinClass::from_vbas(buf.try_get_vbas()?)?;
                (class, previous.map(|p| p.codestream_index).unwrap_or(0))
            }
            _ => {
                let class = DatabinClass::from_vbas(buf.try_get_vbas()?)?;
                (class, buf.try_get_vbas()?)
            }
        };

        let msg_offset = buf.try_get_vbas()?;
        let msg_len = buf.try_get_vbas()?;

        let aux = if class.is_extended() {
            Some(buf.try_get_vbas()?)
        }
        else {
            None
        };

        let body_len = usize::try_from(msg_len)
            .map_err(|_| JpipError::malformed_header(format!("message length {} does not fit into memory", msg_len)))?;
        let body_start = bytes.len() - buf.len();
        if body_start.checked_add(body_len).is_none() {
            return Err(JpipError::malformed_header(format!("message length {} at offset {} is out of range", msg_len, body_start)));
        }

        let header = MessageHeader {
            class,
            codestream_index,
            in_class_id,
            msg_offset,
            body_start,
            body_len,
            is_last_byte_in_databin,
            aux,
        };
        trace!("parsed message header at offset {}: {:?}", offset, header);
        Ok(header)
    }
}
