use std::sync::Mutex;
use bytes::{BufMut, BytesMut};
use crate::protocol::end_of_response::EndOfResponseReason;
use crate::protocol::message_header::DatabinClass;
use crate::protocol::transport::{Transport, TransportResponse, TransportToken};
use crate::util::vbas::VbasBufMutExt;

/// Records every request instead of sending it
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(TransportToken, String)>>,
}
impl RecordingTransport {
    pub fn sent(&self) -> Vec<(TransportToken, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.sent().into_iter()
            .map(|(_, url)| url)
            .collect()
    }

    pub fn token(&self, index: usize) -> TransportToken {
        self.sent()[index].0
    }
}

impl Transport for RecordingTransport {
    fn send(&self, token: TransportToken, url: &str) {
        self.sent.lock().unwrap().push((token, url.to_string()));
    }
}

/// Assembles the body of a JPIP response message by message. Every message carries an explicit
///  class and codestream index.
#[derive(Default)]
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    buf: BytesMut,
}
impl ResponseBuilder {
    pub fn new() -> ResponseBuilder {
        Default::default()
    }

    pub fn new_channel(mut self, channel_id: &str) -> ResponseBuilder {
        self.headers.push(("JPIP-cnew".to_string(), format!("cid={},path=jpip,transport=http", channel_id)));
        self
    }

    pub fn target_id(mut self, target_id: &str) -> ResponseBuilder {
        self.headers.push(("JPIP-tid".to_string(), target_id.to_string()));
        self
    }

    pub fn message(mut self, class: DatabinClass, in_class_id: u64, msg_offset: u64, body: &[u8], is_last_byte_in_databin: bool) -> ResponseBuilder {
        let flags = 0x60 | if is_last_byte_in_databin { 0x10 } else { 0 };
        self.buf.put_vbas_with_first_byte_bits(in_class_id, 4, flags);
        self.buf.put_vbas(u8::from(class) as u64);
        self.buf.put_vbas(0);
        self.buf.put_vbas(msg_offset);
        self.buf.put_vbas(body.len() as u64);
        if class.is_extended() {
            self.buf.put_vbas(0);
        }
        self.buf.put_slice(body);
        self
    }

    /// A complete main header databin, which is what a session needs before it becomes ready
    pub fn main_header(self) -> ResponseBuilder {
        self.message(DatabinClass::MainHeader, 0, 0, &[0xFF, 0x4F, 0xFF, 0x51], true)
    }

    pub fn end_of_response(mut self, reason: EndOfResponseReason) -> TransportResponse {
        self.buf.put_u8(0);
        self.buf.put_u8(reason.into());
        self.build()
    }

    /// Drops the last `cut` bytes, and there is no end of response marker
    pub fn truncated(mut self, cut: usize) -> TransportResponse {
        let len = self.buf.len() - cut;
        self.buf.truncate(len);
        self.build()
    }

    pub fn raw(mut self, bytes: &[u8]) -> TransportResponse {
        self.buf.put_slice(bytes);
        self.build()
    }

    fn build(self) -> TransportResponse {
        TransportResponse::ok(self.headers, self.buf.freeze())
    }
}
