use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::{JpipError, JpipResult};

/// End-of-response reason codes (ISO 15444-9 D.3)
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum EndOfResponseReason {
    ImageDone = 1,
    WindowDone = 2,
    WindowChange = 3,
    ByteLimit = 4,
    QualityLimit = 5,
    SessionLimit = 6,
    ResponseLimit = 7,
    NonSpecified = 0xFF,
}

/// The EOR reason as found on the wire: unknown codes are kept so they can be reported
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EndOfResponse {
    Known(EndOfResponseReason),
    Unknown(u8),
}

/// Expects the EOR marker (a zero byte followed by the reason code) at `offset`, i.e. right after
///  the last complete message of a response.
pub fn parse_end_of_response(bytes: &[u8], offset: usize) -> JpipResult<EndOfResponse> {
    if bytes.len() < 2 || offset > bytes.len() - 2 || bytes[offset] != 0 {
        return Err(JpipError::protocol_violation(format!(
            "could not find End Of Response (EOR) code at offset {} of the response (length {})", offset, bytes.len())));
    }

    let code = bytes[offset + 1];
    Ok(match EndOfResponseReason::try_from(code) {
        Ok(reason) => EndOfResponse::Known(reason),
        Err(_) => EndOfResponse::Unknown(code),
    })
}
