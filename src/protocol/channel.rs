use std::collections::VecDeque;
use tracing::debug;
use crate::error::{JpipError, JpipResult};
use crate::protocol::request::RequestHandle;

/// Channels are never removed during a session, so they are addressed by their creation index
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelIndex(pub usize);

/// A JPIP channel. The server assigns the channel id in response to the channel's first request
///  (`cnew`), so it is unknown until then. Requests on a channel without id wait until the
///  creating request is answered, otherwise each of them would create a new channel.
pub struct Channel {
    index: ChannelIndex,
    channel_id: Option<String>,
    max_requests_waiting_for_response: usize,
    queue: VecDeque<RequestHandle>,
    waiting_for_channel_creation: VecDeque<RequestHandle>,
    request_id_counter: u64,
    is_dedicated_for_movable_request: bool,
}

impl Channel {
    pub fn new(index: ChannelIndex, max_requests_waiting_for_response: usize) -> Channel {
        Channel {
            index,
            channel_id: None,
            max_requests_waiting_for_response,
            queue: Default::default(),
            waiting_for_channel_creation: Default::default(),
            request_id_counter: 0,
            is_dedicated_for_movable_request: false,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn set_channel_id(&mut self, channel_id: String) {
        debug!("channel {:?} got id {}", self.index, channel_id);
        self.channel_id = Some(channel_id);
    }

    /// unique per channel for the session's lifetime, starting at 1
    pub fn next_request_id(&mut self) -> u64 {
        self.request_id_counter += 1;
        self.request_id_counter
    }

    pub fn all_queued_request_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_dedicated_for_movable_request(&self) -> bool {
        self.is_dedicated_for_movable_request
    }

    pub fn dedicate_for_movable_request(&mut self) -> JpipResult<()> {
        if self.is_dedicated_for_movable_request {
            return Err(JpipError::internal(format!("channel {:?} is already dedicated for a movable request", self.index)));
        }
        self.is_dedicated_for_movable_request = true;
        Ok(())
    }

    /// Adds a request to the channel's queue. Returns `true` if the request can be sent right away,
    ///  and `false` if it has to wait for the channel id.
    pub fn enqueue(&mut self, handle: RequestHandle) -> JpipResult<bool> {
        if self.queue.len() >= self.max_requests_waiting_for_response {
            return Err(JpipError::internal(format!("channel {:?} has too many requests waiting for response", self.index)));
        }

        let can_send = self.can_send_next();
        self.queue.push_back(handle);
        if !can_send {
            self.waiting_for_channel_creation.push_back(handle);
        }
        Ok(can_send)
    }

    /// The next request that was waiting for the channel to be created, if it can be sent now
    pub fn take_request_waiting_for_channel_creation(&mut self) -> Option<RequestHandle> {
        if self.waiting_for_channel_creation.is_empty() || !self.can_send_next() {
            return None;
        }
        self.waiting_for_channel_creation.pop_front()
    }

    pub fn request_ended(&mut self, handle: RequestHandle) {
        self.queue.retain(|h| *h != handle);
        self.waiting_for_channel_creation.retain(|h| *h != handle);
    }

    /// This is the base for all requests on the channel. Only a dedicated channel may ask the server
    ///  to abandon a previous request in favour of a new one (`wait=no`).
    pub fn minimal_request_url(&self, data_request_url: &str, target_id: &str, allow_stop_previous_requests: bool) -> String {
        let mut url = data_request_url.to_string();
        if target_id != "0" {
            url.push_str(&format!("&tid={}", target_id));
        }

        if self.channel_id.is_some() {
            let wait = if self.is_dedicated_for_movable_request && allow_stop_previous_requests { "no" } else { "yes" };
            url.push_str(&format!("&wait={}", wait));
        }
        url
    }

    /// A channel without id can only have the one request that creates it in flight
    fn can_send_next(&self) -> bool {
        self.channel_id.is_some() || self.queue.len() == self.waiting_for_channel_creation.len()
    }
}
