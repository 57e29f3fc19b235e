#[cfg(test)] use mockall::automock;
use tracing::{debug, trace};
use crate::error::{JpipError, JpipResult};
use crate::protocol::channel::ChannelIndex;
use crate::protocol::end_of_response::{parse_end_of_response, EndOfResponse, EndOfResponseReason};
use crate::protocol::message_header::{MessageHeader, MessageHeaderParser};
use crate::protocol::session_helper::{PendingSend, SessionHelper};
use crate::protocol::transport::TransportResponse;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RequestHandle(pub u64);

/// Notified about the outcome of a data request
#[cfg_attr(test, automock)]
pub trait RequestListener: Send {
    /// The request's data is in the cache, and so is the data of all requests that were active
    ///  when it completed
    fn on_done(&mut self, handle: RequestHandle);

    /// Not called for requests that were stopped by the user
    fn on_failure(&mut self, _handle: RequestHandle, _error: &JpipError) {}
}

pub enum RequestPurpose {
    /// the first request of a session, creating the session's first channel
    Bootstrap,
    KeepAlive,
    Data(Box<dyn RequestListener>),
}
impl RequestPurpose {
    pub fn is_minimal(&self) -> bool {
        !matches!(self, RequestPurpose::Data(_))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestResult {
    Success,
    Aborted,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestState {
    Idle,
    Active,
    /// re-sent with a bigger response length after the server stopped at a byte or response limit
    Retrying,
    Done(RequestResult),
}

/// What the session has to do after a response was processed
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestOutcome {
    Resent,
    Success,
    Aborted,
}

/// A single logical fetch. The server may end a response before all requested data was sent,
///  in which case the request is sent again with twice the response length. Every send gets a new
///  request id from the channel.
pub struct Request {
    handle: RequestHandle,
    channel: ChannelIndex,
    base_url: String,
    purpose: RequestPurpose,
    state: RequestState,
    response_length: u64,
    last_request_id: Option<u64>,
    is_ended_by_user: bool,
    failure: Option<JpipError>,
}

impl Request {
    pub fn new(handle: RequestHandle, channel: ChannelIndex, base_url: String, purpose: RequestPurpose, min_response_length: u64) -> Request {
        Request {
            handle,
            channel,
            base_url,
            purpose,
            state: RequestState::Idle,
            response_length: min_response_length,
            last_request_id: None,
            is_ended_by_user: false,
            failure: None,
        }
    }

    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    pub fn channel(&self) -> ChannelIndex {
        self.channel
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_ended_by_user(&self) -> bool {
        self.is_ended_by_user
    }

    pub fn into_purpose(self) -> RequestPurpose {
        self.purpose
    }

    /// the `len` the next send will ask for
    pub fn response_length(&self) -> u64 {
        self.response_length
    }

    /// The fault that aborted the request, if any
    pub fn failure(&self) -> Option<&JpipError> {
        self.failure.as_ref()
    }

    pub fn last_request_id(&self) -> JpipResult<u64> {
        match (self.state, self.last_request_id) {
            (RequestState::Active | RequestState::Retrying, Some(id)) => Ok(id),
            _ => Err(JpipError::internal("last request id of an inactive request")),
        }
    }

    pub fn start_request(&mut self, helper: &mut SessionHelper) -> JpipResult<()> {
        if self.state != RequestState::Idle {
            return Err(JpipError::internal("start_request called twice"));
        }
        if self.is_ended_by_user {
            return Err(JpipError::internal("request was already stopped"));
        }

        self.state = RequestState::Active;
        helper.request_started(self.handle);
        self.send_message_of_data_request(helper);
        Ok(())
    }

    /// This does not cancel the request on the network. It prevents retries, suppresses the failure
    ///  notification and accepts the server abandoning the response for a newer request.
    pub fn stop_request_async(&mut self) {
        debug!("request {:?} stopped by user", self.handle);
        self.is_ended_by_user = true;
    }

    pub fn on_transport_failure(&mut self, error: JpipError) {
        self.failure = Some(error);
        self.state = RequestState::Done(RequestResult::Aborted);
    }

    pub fn on_response(&mut self, response: &TransportResponse, helper: &mut SessionHelper) -> RequestOutcome {
        self.check_channel_id(response, helper);

        let outcome = match Self::save_to_databins(&response.body, helper) {
            Err(e) => self.abort(e, helper),
            Ok(end_offset) => match parse_end_of_response(&response.body, end_offset) {
                Err(e) => self.abort(e, helper),
                Ok(end_of_response) => self.on_end_of_response(end_of_response, helper),
            }
        };

        self.state = match outcome {
            RequestOutcome::Resent => RequestState::Retrying,
            RequestOutcome::Success => RequestState::Done(RequestResult::Success),
            RequestOutcome::Aborted => RequestState::Done(RequestResult::Aborted),
        };
        outcome
    }

    fn send_message_of_data_request(&mut self, helper: &mut SessionHelper) {
        let request_id = helper.channel_mut(self.channel).next_request_id();
        self.last_request_id = Some(request_id);

        let mut url = format!("{}&len={}&qid={}", self.base_url, self.response_length, request_id);
        self.response_length = self.response_length.saturating_mul(2);

        match helper.channel(self.channel).channel_id() {
            Some(channel_id) => {
                url.push_str(&format!("&cid={}", channel_id));
            }
            None => {
                url.push_str("&cnew=http");
                let existing_channel_id = helper.first_channel()
                    .and_then(|first| helper.channel(first).channel_id());
                if let Some(existing_channel_id) = existing_channel_id {
                    url.push_str(&format!("&cid={}", existing_channel_id));
                }
            }
        }

        debug!("request {:?}: sending {}", self.handle, url);
        helper.send(&url, PendingSend::Request(self.handle));
    }

    /// The response to a channel's first request must create the channel, any other response
    ///  must not
    fn check_channel_id(&self, response: &TransportResponse, helper: &mut SessionHelper) {
        let created_channel_id = helper.created_channel_id(response);
        let channel = helper.channel_mut(self.channel);
        let has_channel_id = channel.channel_id().is_some();

        let violation = match (created_channel_id, has_channel_id) {
            (Some(_), true) => Some("channel created although it was not requested"),
            (Some(created), false) => {
                channel.set_channel_id(created);
                None
            }
            (None, false) => Some("cannot extract cid from cnew response"),
            (None, true) => None,
        };

        if let Some(violation) = violation {
            helper.on_exception(JpipError::protocol_violation(violation));
        }
    }

    /// Returns the offset after the last complete message
    fn save_to_databins(bytes: &[u8], helper: &mut SessionHelper) -> JpipResult<usize> {
        let mut offset = 0;
        let mut previous_header: Option<MessageHeader> = None;

        while offset < bytes.len() {
            if bytes[offset] == 0 {
                break;
            }

            let header = MessageHeaderParser::parse(bytes, offset, previous_header.as_ref())?;
            if header.body_end() > bytes.len() {
                trace!("response is truncated in the message starting at offset {}", offset);
                return Ok(offset);
            }

            helper.databins_mut().save_data(&header, bytes)?;

            offset = header.body_end();
            previous_header = Some(header);
        }
        Ok(offset)
    }

    fn on_end_of_response(&mut self, end_of_response: EndOfResponse, helper: &mut SessionHelper) -> RequestOutcome {
        use EndOfResponseReason::*;

        trace!("request {:?}: end of response {:?}", self.handle, end_of_response);
        match end_of_response {
            EndOfResponse::Known(ImageDone | WindowDone | QualityLimit) => RequestOutcome::Success,
            EndOfResponse::Known(WindowChange) => {
                if self.is_ended_by_user {
                    RequestOutcome::Success
                }
                else {
                    self.abort(JpipError::internal("server response was terminated due to a newer request issued on the same channel, movable requests are not maintained correctly"), helper)
                }
            }
            EndOfResponse::Known(ByteLimit | ResponseLimit) => {
                if self.is_ended_by_user {
                    RequestOutcome::Aborted
                }
                else {
                    self.send_message_of_data_request(helper);
                    RequestOutcome::Resent
                }
            }
            EndOfResponse::Known(SessionLimit) => {
                self.abort(JpipError::ResourceExhausted("server resources associated with the session are limited, no further requests should be issued to this session".to_string()), helper)
            }
            EndOfResponse::Known(NonSpecified) => {
                self.abort(JpipError::protocol_violation("server terminated the response with no reason specified"), helper)
            }
            EndOfResponse::Unknown(code) => {
                self.abort(JpipError::protocol_violation(format!("illegal End Of Response (EOR) code {}", code)), helper)
            }
        }
    }

    fn abort(&mut self, error: JpipError, helper: &mut SessionHelper) -> RequestOutcome {
        self.failure = Some(error.clone());
        helper.on_exception(error);
        RequestOutcome::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use rstest::rstest;
    use crate::databins::databin::DatabinKind;
    use crate::protocol::message_header::DatabinClass;
    use crate::protocol::session_helper::SessionStatus;
    use crate::test_util::{RecordingTransport, ResponseBuilder};

    const DATA_URL: &str = "http://h/?type=jpp-stream&stream=0";

    struct Fixture {
        transport: Arc<RecordingTransport>,
        helper: SessionHelper,
        statuses: Arc<std::sync::Mutex<Vec<SessionStatus>>>,
    }

    fn fixture(channel_id: Option<&str>) -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        let mut helper = SessionHelper::new(transport.clone(), crate::databins::databins_saver::DatabinsSaver::new(false, 16), None);
        helper.set_data_request_url(DATA_URL.to_string());
        let statuses = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = statuses.clone();
        helper.set_status_listener(Box::new(move |s: &SessionStatus| recorded.lock().unwrap().push(s.clone())));

        let channel = helper.channel_created(5);
        if let Some(id) = channel_id {
            helper.channel_mut(channel).set_channel_id(id.to_string());
        }
        Fixture { transport, helper, statuses }
    }

    fn new_request(f: &mut Fixture) -> Request {
        let url = f.helper.channel(ChannelIndex(0)).minimal_request_url(DATA_URL, "0", false);
        let mut request = Request::new(RequestHandle(1), ChannelIndex(0), url, RequestPurpose::KeepAlive, 10240);
        f.helper.channel_mut(ChannelIndex(0)).enqueue(RequestHandle(1)).unwrap();
        request.start_request(&mut f.helper).unwrap();
        request
    }

    fn exceptions(f: &Fixture) -> Vec<JpipError> {
        f.statuses.lock().unwrap().iter()
            .filter_map(|s| s.exception.clone())
            .collect()
    }

    #[test]
    fn test_start_request_creates_channel() {
        let mut f = fixture(None);
        let request = new_request(&mut f);

        assert_eq!(f.transport.urls(), vec![format!("{}&len=10240&qid=1&cnew=http", DATA_URL)]);
        assert_eq!(request.state(), RequestState::Active);
        assert_eq!(request.last_request_id(), Ok(1));
        assert_eq!(request.response_length(), 20480);
        assert!(f.helper.has_active_requests());
    }

    #[test]
    fn test_start_request_on_existing_channel() {
        let mut f = fixture(Some("C1"));
        new_request(&mut f);
        assert_eq!(f.transport.urls(), vec![format!("{}&wait=yes&len=10240&qid=1&cid=C1", DATA_URL)]);
    }

    #[test]
    fn test_start_request_twice() {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);
        assert!(matches!(request.start_request(&mut f.helper), Err(JpipError::InternalError(_))));
        assert_eq!(f.transport.urls().len(), 1);
    }

    #[test]
    fn test_start_stopped_request() {
        let mut f = fixture(Some("C1"));
        let mut request = Request::new(RequestHandle(1), ChannelIndex(0), DATA_URL.to_string(), RequestPurpose::KeepAlive, 10240);
        request.stop_request_async();
        assert!(matches!(request.start_request(&mut f.helper), Err(JpipError::InternalError(_))));
        assert!(f.transport.urls().is_empty());
    }

    #[test]
    fn test_response_sets_channel_id_and_saves_data() {
        let mut f = fixture(None);
        let mut request = new_request(&mut f);

        let response = ResponseBuilder::new()
            .new_channel("C7")
            .message(DatabinClass::MainHeader, 0, 0, &[1, 2, 3], true)
            .message(DatabinClass::Precinct, 4, 0, &[4, 5], false)
            .end_of_response(EndOfResponseReason::WindowDone);

        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Success);
        assert_eq!(request.state(), RequestState::Done(RequestResult::Success));
        assert_eq!(f.helper.channel(ChannelIndex(0)).channel_id(), Some("C7"));
        assert!(f.helper.databins().main_header_databin().is_complete());
        assert_eq!(f.helper.databins().databin(DatabinKind::Precinct, 4).unwrap().known_length(), 2);
        assert!(exceptions(&f).is_empty());
    }

    #[rstest]
    #[case::image_done(EndOfResponseReason::ImageDone, false, RequestOutcome::Success, None)]
    #[case::window_done(EndOfResponseReason::WindowDone, false, RequestOutcome::Success, None)]
    #[case::quality_limit(EndOfResponseReason::QualityLimit, false, RequestOutcome::Success, None)]
    #[case::window_change(EndOfResponseReason::WindowChange, false, RequestOutcome::Aborted, Some("internal"))]
    #[case::window_change_stopped(EndOfResponseReason::WindowChange, true, RequestOutcome::Success, None)]
    #[case::byte_limit(EndOfResponseReason::ByteLimit, false, RequestOutcome::Resent, None)]
    #[case::response_limit(EndOfResponseReason::ResponseLimit, false, RequestOutcome::Resent, None)]
    #[case::byte_limit_stopped(EndOfResponseReason::ByteLimit, true, RequestOutcome::Aborted, None)]
    #[case::session_limit(EndOfResponseReason::SessionLimit, false, RequestOutcome::Aborted, Some("resources"))]
    #[case::non_specified(EndOfResponseReason::NonSpecified, false, RequestOutcome::Aborted, Some("protocol"))]
    fn test_end_of_response(#[case] reason: EndOfResponseReason, #[case] stopped: bool, #[case] expected: RequestOutcome, #[case] expected_exception: Option<&str>) {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);
        if stopped {
            request.stop_request_async();
        }

        let response = ResponseBuilder::new().end_of_response(reason);
        assert_eq!(request.on_response(&response, &mut f.helper), expected);

        let exceptions = exceptions(&f);
        assert_eq!(request.failure(), exceptions.first());
        match expected_exception {
            None => assert!(exceptions.is_empty(), "{:?}", exceptions),
            Some("internal") => assert!(matches!(exceptions.as_slice(), [JpipError::InternalError(_)])),
            Some("resources") => assert!(matches!(exceptions.as_slice(), [JpipError::ResourceExhausted(_)])),
            Some(_) => assert!(matches!(exceptions.as_slice(), [JpipError::ProtocolViolation(_)])),
        }

        let expected_sends = if expected == RequestOutcome::Resent { 2 } else { 1 };
        assert_eq!(f.transport.urls().len(), expected_sends);
    }

    #[test]
    fn test_retry_doubles_response_length() {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);

        let response = ResponseBuilder::new()
            .message(DatabinClass::Precinct, 1, 0, &[1, 2], false)
            .end_of_response(EndOfResponseReason::ByteLimit);
        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Resent);
        assert_eq!(request.state(), RequestState::Retrying);
        assert_eq!(request.last_request_id(), Ok(2));

        assert_eq!(f.transport.urls(), vec![
            format!("{}&wait=yes&len=10240&qid=1&cid=C1", DATA_URL),
            format!("{}&wait=yes&len=20480&qid=2&cid=C1", DATA_URL),
        ]);
    }

    #[test]
    fn test_unknown_end_of_response_code() {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);

        let response = TransportResponse::ok(vec![], bytes::Bytes::from_static(&[0, 42]));
        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Aborted);
        assert!(matches!(exceptions(&f).as_slice(), [JpipError::ProtocolViolation(_)]));
    }

    #[rstest]
    #[case::truncated_body(ResponseBuilder::new().message(DatabinClass::Precinct, 1, 0, &[1, 2, 3], false).truncated(1), "protocol")]
    #[case::no_end_of_response(ResponseBuilder::new().message(DatabinClass::Precinct, 1, 0, &[1, 2, 3], false).truncated(0), "protocol")]
    #[case::truncated_header(ResponseBuilder::new().raw(&[0xE1]), "header")]
    #[case::huge_length(ResponseBuilder::new().raw(&[0x61, 0, 0, 0, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0, 1]), "header")]
    #[case::illegal_class(ResponseBuilder::new().message(DatabinClass::Tile, 1, 0, &[1], false).end_of_response(EndOfResponseReason::ImageDone), "protocol")]
    fn test_broken_response(#[case] response: TransportResponse, #[case] expected_exception: &str) {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);

        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Aborted);
        assert_eq!(request.state(), RequestState::Done(RequestResult::Aborted));

        let exceptions = exceptions(&f);
        match expected_exception {
            "header" => assert!(matches!(exceptions.as_slice(), [JpipError::MalformedHeader(_)])),
            _ => assert!(matches!(exceptions.as_slice(), [JpipError::ProtocolViolation(_)]), "{:?}", exceptions),
        }
    }

    #[test]
    fn test_truncated_response_keeps_complete_messages() {
        let mut f = fixture(Some("C1"));
        let mut request = new_request(&mut f);

        let response = ResponseBuilder::new()
            .message(DatabinClass::Precinct, 1, 0, &[1, 2], false)
            .message(DatabinClass::Precinct, 2, 0, &[3, 4, 5], false)
            .truncated(1);
        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Aborted);

        assert_eq!(f.helper.databins().databin(DatabinKind::Precinct, 1).unwrap().known_length(), 2);
        assert!(f.helper.databins().databin(DatabinKind::Precinct, 2).is_none());
    }

    #[rstest]
    #[case::missing_cnew(None, None)]
    #[case::unexpected_cnew(Some("C1"), Some("C2"))]
    fn test_channel_id_violations(#[case] channel_id: Option<&str>, #[case] cnew: Option<&str>) {
        let mut f = fixture(channel_id);
        let mut request = new_request(&mut f);

        let mut builder = ResponseBuilder::new();
        if let Some(cnew) = cnew {
            builder = builder.new_channel(cnew);
        }
        let response = builder.end_of_response(EndOfResponseReason::WindowDone);

        assert_eq!(request.on_response(&response, &mut f.helper), RequestOutcome::Success);
        assert!(matches!(exceptions(&f).as_slice(), [JpipError::ProtocolViolation(_)]));
        assert_eq!(f.helper.channel(ChannelIndex(0)).channel_id(), channel_id);
    }

    #[test]
    fn test_listener_default_on_failure() {
        struct DoneOnly(u32);
        impl RequestListener for DoneOnly {
            fn on_done(&mut self, _handle: RequestHandle) {
                self.0 += 1;
            }
        }

        let mut listener = DoneOnly(0);
        listener.on_failure(RequestHandle(1), &JpipError::internal("x"));
        listener.on_done(RequestHandle(1));
        assert_eq!(listener.0, 1);
    }
}
