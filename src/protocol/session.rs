use std::sync::Arc;
use std::time::Duration;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};
use crate::config::SessionConfig;
use crate::databins::databins_saver::DatabinsSaver;
use crate::error::{JpipError, JpipResult};
use crate::image::codestream_part_params::CodestreamPartParams;
use crate::image::structure::CodestreamStructure;
use crate::protocol::channel::{Channel, ChannelIndex};
use crate::protocol::request::{Request, RequestHandle, RequestListener, RequestOutcome, RequestPurpose, RequestState};
use crate::protocol::request_url::{data_request_query, JpipUrls};
use crate::protocol::session_helper::{PendingSend, RequestEndedListener, SessionHelper, StatusListener};
use crate::protocol::transport::{Transport, TransportError, TransportEvent, TransportResponse};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Unopened,
    Opening,
    Ready,
    Closing,
    Closed,
}

pub type CloseCallback = Box<dyn FnOnce(JpipResult<()>) + Send>;

/// A JPIP session: the channels of one target, and the requests in flight on them.
///
/// The session does no I/O itself. Requests go out through the [Transport], and whoever drives
///  the session (see [crate::protocol::driver::SessionDriver]) feeds completions back through
///  [Session::on_transport_event] and calls [Session::on_keep_alive_tick] periodically.
pub struct Session {
    config: Arc<SessionConfig>,
    state: SessionState,
    helper: SessionHelper,
    urls: Option<JpipUrls>,

    requests: FxHashMap<RequestHandle, Request>,
    next_handle: u64,

    /// channels that ordinary requests may be assigned to, i.e. not dedicated to a movable request
    non_dedicated_channels: Vec<ChannelIndex>,

    close_session_url: Option<String>,
    is_close_called: bool,
    close_callback: Option<CloseCallback>,
    is_keep_alive_armed: bool,
}

impl Session {
    pub fn new(config: Arc<SessionConfig>, transport: Arc<dyn Transport>, known_target_id: Option<String>) -> anyhow::Result<Session> {
        config.validate()?;

        let databins = DatabinsSaver::new(config.stream_type.is_tile_part_stream(), config.max_pending_fragments_per_databin);
        Ok(Session {
            helper: SessionHelper::new(transport, databins, known_target_id),
            config,
            state: SessionState::Unopened,
            urls: None,
            requests: Default::default(),
            next_handle: 0,
            non_dedicated_channels: Vec::new(),
            close_session_url: None,
            is_close_called: false,
            close_callback: None,
            is_keep_alive_armed: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.helper.is_ready()
    }

    pub fn set_status_listener(&mut self, listener: StatusListener) {
        self.helper.set_status_listener(listener);
    }

    pub fn set_request_ended_listener(&mut self, listener: RequestEndedListener) {
        self.helper.set_request_ended_listener(listener);
    }

    /// The databin cache that all requests of this session write into
    pub fn databins(&self) -> &DatabinsSaver {
        self.helper.databins()
    }

    pub fn channel(&self, channel: ChannelIndex) -> JpipResult<&Channel> {
        self.check_channel_index(channel)?;
        Ok(self.helper.channel(channel))
    }

    pub fn request_state(&self, handle: RequestHandle) -> Option<RequestState> {
        self.requests.get(&handle)
            .map(|r| r.state())
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.config.keep_alive_interval
    }

    pub fn open(&mut self, base_url: &str) -> JpipResult<()> {
        if self.state != SessionState::Unopened {
            return Err(JpipError::internal("Session::open should be called only once"));
        }

        info!("opening JPIP session at {}", base_url);
        let urls = JpipUrls::new(base_url, self.config.stream_type);
        self.helper.set_data_request_url(urls.data_request.clone());
        self.urls = Some(urls);
        self.state = SessionState::Opening;

        let channel = self.create_channel(false);
        self.send_minimal_request(channel, RequestPurpose::Bootstrap)?;
        Ok(())
    }

    pub fn target_id(&self) -> JpipResult<&str> {
        self.ensure_ready()?;
        Ok(self.helper.target_id())
    }

    pub fn has_active_requests(&self) -> JpipResult<bool> {
        self.ensure_ready()?;
        Ok(self.helper.has_active_requests())
    }

    /// Picks the channel for a new request: the non-dedicated channel with the fewest queued
    ///  requests. While more channels may be created, only an idle channel is reused. Returns
    ///  `None` if all channels are busy and no more channels may be created.
    ///
    /// A channel picked for a movable request is taken out of the pool for good.
    pub fn try_get_channel(&mut self, dedicate_for_movable_request: bool) -> JpipResult<Option<ChannelIndex>> {
        self.ensure_ready()?;

        let can_create_new_channel = self.helper.num_channels() < self.config.max_channels_in_session;
        let search_only_idle_channels = can_create_new_channel || dedicate_for_movable_request;
        let max_requests_in_channel = if search_only_idle_channels {
            0
        }
        else {
            self.config.max_requests_waiting_for_response_in_channel - 1
        };

        let mut best: Option<(usize, usize)> = None;
        for (pos, &channel) in self.non_dedicated_channels.iter().enumerate() {
            let waiting = self.helper.channel(channel).all_queued_request_count();
            if waiting > max_requests_in_channel {
                continue;
            }
            if best.map_or(true, |(_, min_waiting)| waiting < min_waiting) {
                best = Some((pos, waiting));
            }
            if waiting == 0 {
                break;
            }
        }

        let channel = match best {
            Some((pos, _)) if dedicate_for_movable_request => self.non_dedicated_channels.swap_remove(pos),
            Some((pos, _)) => self.non_dedicated_channels[pos],
            None if can_create_new_channel => self.create_channel(dedicate_for_movable_request),
            None => return Ok(None),
        };

        if dedicate_for_movable_request {
            self.helper.channel_mut(channel).dedicate_for_movable_request()?;
        }
        Ok(Some(channel))
    }

    /// Requests a region of the image on a channel. The number of quality layers is taken from
    ///  `params`. `allow_stop_previous_requests` lets the server abandon the channel's previous
    ///  request, which is honoured only on a channel dedicated for a movable request.
    pub fn request_data(
        &mut self,
        channel: ChannelIndex,
        params: &CodestreamPartParams,
        structure: &dyn CodestreamStructure,
        listener: Box<dyn RequestListener>,
        allow_stop_previous_requests: bool,
    ) -> JpipResult<RequestHandle> {
        self.ensure_ready()?;
        self.check_channel_index(channel)?;
        params.validate(structure)?;

        let mut url = self.helper.minimal_request_url(channel, allow_stop_previous_requests);
        url.push_str(&data_request_query(params, structure, params.max_num_quality_layers));

        self.enqueue_request(channel, url, RequestPurpose::Data(listener))
    }

    /// Requests that are stopped are not retried, and their listener is not told about failures.
    ///  A request that is still waiting for its channel is dropped without being sent.
    pub fn stop_request_async(&mut self, handle: RequestHandle) {
        match self.requests.get_mut(&handle) {
            Some(request) => request.stop_request_async(),
            None => debug!("request {:?} is not active, nothing to stop", handle),
        }
    }

    /// Completes the session once all pending requests are answered. Closing a session that is
    ///  still opening is deferred until the bootstrap request ends.
    pub fn close(&mut self, callback: CloseCallback) -> JpipResult<()> {
        if self.state == SessionState::Unopened {
            return Err(JpipError::internal("cannot close session before open"));
        }
        if self.is_close_called {
            return Err(JpipError::internal("cannot close session twice"));
        }

        self.is_close_called = true;
        self.close_callback = Some(callback);

        if self.state == SessionState::Closed {
            debug!("session was never established, nothing to close on the server");
            self.finish_close(Ok(()));
        }
        else if self.close_session_url.is_some() {
            self.close_internal();
        }
        else {
            debug!("close is deferred until the session is established");
        }
        Ok(())
    }

    /// Sends a minimal request on the first channel, unless there are requests in flight anyway
    pub fn on_keep_alive_tick(&mut self) {
        if !self.is_keep_alive_armed || self.helper.has_active_requests() {
            return;
        }

        let channel = match self.helper.first_channel() {
            Some(channel) => channel,
            None => return,
        };

        debug!("sending keep-alive request on channel {:?}", channel);
        if let Err(e) = self.send_minimal_request(channel, RequestPurpose::KeepAlive) {
            self.helper.on_exception(e);
        }
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        let pending = match self.helper.take_pending_send(event.token) {
            Some(pending) => pending,
            None => {
                warn!("ignoring transport event for unknown token {:?}", event.token);
                return;
            }
        };

        let result = event.result.and_then(|response| {
            if response.status == 200 {
                Ok(response)
            }
            else {
                Err(TransportError::UnexpectedStatus(response.status))
            }
        });

        match pending {
            PendingSend::Request(handle) => self.on_request_completed(handle, result),
            PendingSend::CloseSession => self.on_close_session_completed(result),
        }
    }

    fn on_request_completed(&mut self, handle: RequestHandle, result: Result<TransportResponse, TransportError>) {
        let request = match self.requests.get_mut(&handle) {
            Some(request) => request,
            None => {
                warn!("response for request {:?} which is not active", handle);
                return;
            }
        };
        let channel = request.channel();

        match result {
            Ok(response) => {
                match request.on_response(&response, &mut self.helper) {
                    RequestOutcome::Resent => {
                        self.send_requests_waiting_for_channel(channel);
                        return;
                    }
                    RequestOutcome::Success => {
                        self.helper.wait_for_concurrent_requests_to_end(handle);
                        self.helper.request_ended(channel, handle, Some(&response));
                    }
                    RequestOutcome::Aborted => {
                        self.helper.request_ended(channel, handle, Some(&response));
                        if let Some(request) = self.requests.remove(&handle) {
                            self.on_request_failed(request, false);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("request {:?} failed: {}", handle, e);
                request.on_transport_failure(JpipError::TransportFailure(e.to_string()));
                self.helper.request_ended(channel, handle, None);
                if let Some(request) = self.requests.remove(&handle) {
                    self.on_request_failed(request, true);
                }
            }
        }

        self.send_requests_waiting_for_channel(channel);
        self.on_concurrent_requests_finished();
    }

    /// `needs_reporting` is set for transport failures, other failures were routed to the fault
    ///  sink by the request itself
    fn on_request_failed(&mut self, request: Request, needs_reporting: bool) {
        let handle = request.handle();
        let error = request.failure()
            .cloned()
            .unwrap_or_else(|| JpipError::internal(format!("request {:?} was aborted", handle)));

        if request.is_ended_by_user() {
            debug!("request {:?} was stopped by the user, not reporting failure: {}", handle, error);
            return;
        }

        match request.into_purpose() {
            RequestPurpose::Data(mut listener) => {
                listener.on_failure(handle, &error);
            }
            RequestPurpose::KeepAlive => {
                if needs_reporting {
                    self.helper.on_exception(error);
                }
            }
            RequestPurpose::Bootstrap => {
                if needs_reporting {
                    self.helper.on_exception(error.clone());
                }
                self.state = SessionState::Closed;
                self.finish_close(Err(error));
            }
        }
    }

    fn send_requests_waiting_for_channel(&mut self, channel: ChannelIndex) {
        while let Some(handle) = self.helper.channel_mut(channel).take_request_waiting_for_channel_creation() {
            let request = match self.requests.get_mut(&handle) {
                Some(request) => request,
                None => continue,
            };

            if request.is_ended_by_user() {
                debug!("dropping stopped request {:?} before sending it", handle);
                self.helper.channel_mut(channel).request_ended(handle);
                self.requests.remove(&handle);
                continue;
            }

            if let Err(e) = request.start_request(&mut self.helper) {
                self.helper.on_exception(e);
            }
        }
    }

    fn on_concurrent_requests_finished(&mut self) {
        for handle in self.helper.check_concurrent_requests_finished() {
            let request = match self.requests.remove(&handle) {
                Some(request) => request,
                None => continue,
            };

            match request.into_purpose() {
                RequestPurpose::Bootstrap => self.on_session_bootstrapped(),
                RequestPurpose::KeepAlive => {}
                RequestPurpose::Data(mut listener) => listener.on_done(handle),
            }
        }
    }

    fn on_session_bootstrapped(&mut self) {
        if !self.helper.databins().main_header_databin().is_complete() {
            let error = JpipError::protocol_violation("main header was not loaded on session creation");
            self.helper.on_exception(error.clone());
            self.state = SessionState::Closed;
            self.finish_close(Err(error));
            return;
        }

        let channel_id = self.helper.first_channel()
            .and_then(|channel| self.helper.channel(channel).channel_id())
            .map(|id| id.to_string());

        let channel_id = match channel_id {
            Some(channel_id) => channel_id,
            None => {
                // the missing channel id was reported when the response was processed
                self.state = SessionState::Closed;
                self.finish_close(Ok(()));
                return;
            }
        };

        self.close_session_url = self.urls.as_ref()
            .map(|urls| urls.close_session(&channel_id));

        if self.is_close_called {
            self.close_internal();
            return;
        }

        self.is_keep_alive_armed = true;
        self.state = SessionState::Ready;
        if let Err(e) = self.helper.set_is_ready(true) {
            self.helper.on_exception(e);
        }
    }

    fn close_internal(&mut self) {
        let close_session_url = match self.close_session_url.clone() {
            Some(url) => url,
            None => return,
        };

        info!("closing JPIP session");
        self.is_keep_alive_armed = false;
        self.state = SessionState::Closing;
        if let Err(e) = self.helper.set_is_ready(false) {
            self.helper.on_exception(e);
        }
        self.helper.send(&close_session_url, PendingSend::CloseSession);
    }

    fn on_close_session_completed(&mut self, result: Result<TransportResponse, TransportError>) {
        self.state = SessionState::Closed;
        let result = match result {
            Ok(_) => {
                info!("JPIP session closed");
                Ok(())
            }
            Err(e) => {
                warn!("closing the JPIP session failed: {}", e);
                Err(JpipError::TransportFailure(e.to_string()))
            }
        };
        self.finish_close(result);
    }

    fn finish_close(&mut self, result: JpipResult<()>) {
        if let Some(callback) = self.close_callback.take() {
            callback(result);
        }
    }

    fn create_channel(&mut self, is_dedicated_for_movable_request: bool) -> ChannelIndex {
        let channel = self.helper.channel_created(self.config.max_requests_waiting_for_response_in_channel);
        if !is_dedicated_for_movable_request {
            self.non_dedicated_channels.push(channel);
        }
        channel
    }

    fn send_minimal_request(&mut self, channel: ChannelIndex, purpose: RequestPurpose) -> JpipResult<RequestHandle> {
        if self.helper.channel(channel).channel_id().is_none() && self.helper.num_channels() > 1 {
            return Err(JpipError::internal("cannot send a minimal request on a channel that was not created yet"));
        }

        let url = self.helper.minimal_request_url(channel, false);
        self.enqueue_request(channel, url, purpose)
    }

    fn enqueue_request(&mut self, channel: ChannelIndex, url: String, purpose: RequestPurpose) -> JpipResult<RequestHandle> {
        self.next_handle += 1;
        let handle = RequestHandle(self.next_handle);
        let mut request = Request::new(handle, channel, url, purpose, self.config.min_response_length);

        if self.helper.channel_mut(channel).enqueue(handle)? {
            request.start_request(&mut self.helper)?;
        }
        else {
            debug!("request {:?} waits for channel {:?} to be created", handle, channel);
        }

        self.requests.insert(handle, request);
        Ok(handle)
    }

    fn check_channel_index(&self, channel: ChannelIndex) -> JpipResult<()> {
        if channel.0 >= self.helper.num_channels() {
            return Err(JpipError::invalid_argument("channel", format!("{:?} does not exist in this session", channel)));
        }
        Ok(())
    }

    fn ensure_ready(&self) -> JpipResult<()> {
        if !self.helper.is_ready() {
            return Err(JpipError::internal("cannot perform this operation when the session is not ready"));
        }
        Ok(())
    }
}
