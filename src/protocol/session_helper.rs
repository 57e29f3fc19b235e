use std::sync::Arc;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace, warn};
use crate::databins::databins_saver::DatabinsSaver;
use crate::error::{JpipError, JpipResult};
use crate::protocol::channel::{Channel, ChannelIndex};
use crate::protocol::request::RequestHandle;
use crate::protocol::request_url::parse_cnew_channel_id;
use crate::protocol::transport::{Transport, TransportResponse, TransportToken};

const UNKNOWN_TARGET_ID: &str = "0";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionStatus {
    pub is_ready: bool,
    pub exception: Option<JpipError>,
}

pub type StatusListener = Box<dyn FnMut(&SessionStatus) + Send>;
pub type RequestEndedListener = Box<dyn FnMut(ChannelIndex) + Send>;

/// What a transport token was issued for
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PendingSend {
    Request(RequestHandle),
    CloseSession,
}

struct ConcurrentRequestsBarrier {
    handle: RequestHandle,
    waiting_for: FxHashSet<RequestHandle>,
}

/// State shared by all channels and requests of a session: the databin cache, the channel
///  registry, active request accounting and the session's single fault sink.
pub struct SessionHelper {
    transport: Arc<dyn Transport>,
    databins: DatabinsSaver,
    data_request_url: String,
    target_id: String,

    is_ready: bool,
    was_ever_ready: bool,

    active_requests: FxHashSet<RequestHandle>,
    barriers: Vec<ConcurrentRequestsBarrier>,

    channels: Vec<Channel>,
    first_channel: Option<ChannelIndex>,

    status_listener: Option<StatusListener>,
    request_ended_listener: Option<RequestEndedListener>,

    pending_sends: FxHashMap<TransportToken, PendingSend>,
    next_token: u64,
}

impl SessionHelper {
    pub fn new(transport: Arc<dyn Transport>, databins: DatabinsSaver, known_target_id: Option<String>) -> SessionHelper {
        SessionHelper {
            transport,
            databins,
            data_request_url: String::new(),
            target_id: known_target_id.unwrap_or_else(|| UNKNOWN_TARGET_ID.to_string()),
            is_ready: false,
            was_ever_ready: false,
            active_requests: Default::default(),
            barriers: Vec::new(),
            channels: Vec::new(),
            first_channel: None,
            status_listener: None,
            request_ended_listener: None,
            pending_sends: Default::default(),
            next_token: 0,
        }
    }

    pub fn set_data_request_url(&mut self, data_request_url: String) {
        self.data_request_url = data_request_url;
    }

    pub fn data_request_url(&self) -> &str {
        &self.data_request_url
    }

    pub fn databins(&self) -> &DatabinsSaver {
        &self.databins
    }

    pub fn databins_mut(&mut self) -> &mut DatabinsSaver {
        &mut self.databins
    }

    /// `"0"` until the server told us
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn set_status_listener(&mut self, listener: StatusListener) {
        self.status_listener = Some(listener);
    }

    pub fn set_request_ended_listener(&mut self, listener: RequestEndedListener) {
        self.request_ended_listener = Some(listener);
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// A session becomes ready once, and stops being ready when it is closed
    pub fn set_is_ready(&mut self, is_ready: bool) -> JpipResult<()> {
        if is_ready && self.was_ever_ready {
            return Err(JpipError::internal("session can become ready only once"));
        }

        info!("session is {}", if is_ready { "ready" } else { "not ready" });
        self.is_ready = is_ready;
        self.was_ever_ready |= is_ready;
        self.notify_status(None);
        Ok(())
    }

    /// The fault sink: errors caused by the server end up here and are passed to the status
    ///  listener.
    pub fn on_exception(&mut self, error: JpipError) {
        warn!("JPIP session fault: {}", error);
        self.notify_status(Some(error));
    }

    fn notify_status(&mut self, exception: Option<JpipError>) {
        let status = SessionStatus {
            is_ready: self.is_ready,
            exception,
        };
        if let Some(listener) = &mut self.status_listener {
            listener(&status);
        }
    }

    pub fn send(&mut self, url: &str, pending: PendingSend) {
        self.next_token += 1;
        let token = TransportToken(self.next_token);
        trace!("sending {:?} as {:?}", pending, token);

        self.pending_sends.insert(token, pending);
        self.transport.send(token, url);
    }

    pub fn take_pending_send(&mut self, token: TransportToken) -> Option<PendingSend> {
        self.pending_sends.remove(&token)
    }

    pub fn created_channel_id(&self, response: &TransportResponse) -> Option<String> {
        response.header("JPIP-cnew")
            .and_then(parse_cnew_channel_id)
    }

    pub fn request_started(&mut self, handle: RequestHandle) {
        self.active_requests.insert(handle);
    }

    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    pub fn has_active_requests(&self) -> bool {
        !self.active_requests.is_empty()
    }

    /// Frees the request's slot in its channel. `response` is `None` if the request failed on the
    ///  transport level.
    pub fn request_ended(&mut self, channel: ChannelIndex, handle: RequestHandle, response: Option<&TransportResponse>) {
        debug!("request {:?} on channel {:?} ended", handle, channel);
        self.channel_mut(channel).request_ended(handle);
        self.active_requests.remove(&handle);

        if let Some(response) = response {
            self.check_target_id(response);
        }

        if self.first_channel.is_none() {
            self.first_channel = Some(channel);
        }

        if let Some(listener) = &mut self.request_ended_listener {
            listener(channel);
        }
    }

    fn check_target_id(&mut self, response: &TransportResponse) {
        let target_id = match response.header("JPIP-tid") {
            Some(tid) if !tid.is_empty() => tid,
            _ => return,
        };

        if self.target_id == UNKNOWN_TARGET_ID {
            debug!("target id is {}", target_id);
            self.target_id = target_id.to_string();
        }
        else if self.target_id != target_id {
            let error = JpipError::protocol_violation(format!("server returned target id {}, expected {}", target_id, self.target_id));
            self.on_exception(error);
        }
    }

    /// Arms a barrier for a request that completed successfully: it is reported as done once all
    ///  requests that are active right now have ended.
    pub fn wait_for_concurrent_requests_to_end(&mut self, handle: RequestHandle) {
        let waiting_for = self.active_requests.iter()
            .copied()
            .filter(|h| *h != handle)
            .collect();
        self.barriers.push(ConcurrentRequestsBarrier { handle, waiting_for });
    }

    /// Returns the requests whose barrier fired, in the order the barriers were armed. Each barrier
    ///  fires exactly once.
    pub fn check_concurrent_requests_finished(&mut self) -> Vec<RequestHandle> {
        let mut finished = Vec::new();
        let active_requests = &self.active_requests;

        self.barriers.retain_mut(|barrier| {
            barrier.waiting_for.retain(|h| active_requests.contains(h));
            if barrier.waiting_for.is_empty() {
                finished.push(barrier.handle);
                false
            }
            else {
                true
            }
        });
        finished
    }

    pub fn channel_created(&mut self, max_requests_waiting_for_response: usize) -> ChannelIndex {
        let index = ChannelIndex(self.channels.len());
        debug!("creating channel {:?}", index);
        self.channels.push(Channel::new(index, max_requests_waiting_for_response));
        index
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Channel indexes are only handed out by [SessionHelper::channel_created], so they are always
    ///  valid
    pub fn channel(&self, index: ChannelIndex) -> &Channel {
        &self.channels[index.0]
    }

    pub fn channel_mut(&mut self, index: ChannelIndex) -> &mut Channel {
        &mut self.channels[index.0]
    }

    pub fn first_channel(&self) -> Option<ChannelIndex> {
        self.first_channel
    }

    pub fn minimal_request_url(&self, channel: ChannelIndex, allow_stop_previous_requests: bool) -> String {
        self.channel(channel).minimal_request_url(&self.data_request_url, &self.target_id, allow_stop_previous_requests)
    }
}
