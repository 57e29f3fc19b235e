use std::time::Duration;
use anyhow::bail;

/// The flavour of JPIP stream a session requests. This decides both the `type=` request
///  parameter and which databin classes the cache accepts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StreamType {
    /// `jpt-stream`: the cache is addressed by tile(-part)
    TilePart,
    /// `jpp-stream`: the cache is addressed by precinct, with separate tile headers
    Precinct,
}
impl StreamType {
    pub fn query_value(&self) -> &'static str {
        match self {
            StreamType::TilePart => "jpt-stream",
            StreamType::Precinct => "jpp-stream",
        }
    }

    pub fn is_tile_part_stream(&self) -> bool {
        *self == StreamType::TilePart
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stream_type: StreamType,

    /// Upper bound for the number of channels the session creates. Channels are never closed
    ///  during a session, so this is also the upper bound for concurrently open channels.
    pub max_channels_in_session: usize,

    /// Requests that were sent on a channel but did not receive their complete response yet.
    ///  The session prefers channels with fewer waiting requests, and a data request on a
    ///  channel that reached this limit is rejected.
    pub max_requests_waiting_for_response_in_channel: usize,

    /// A minimal request is sent on the first channel at this interval while there are no
    ///  active requests, so that the server does not discard the session
    pub keep_alive_interval: Duration,

    /// The `len=` quota of a request's first response. It doubles every time the server ends a
    ///  response because of a byte or response limit.
    pub min_response_length: u64,

    /// Fragments that arrive before the gap in front of them is filled are buffered. This caps
    ///  the number of such fragments per databin.
    pub max_pending_fragments_per_databin: usize,
}

impl SessionConfig {
    pub const DEFAULT_MIN_RESPONSE_LENGTH: u64 = 10 * 1024;

    pub fn new(stream_type: StreamType) -> SessionConfig {
        SessionConfig {
            stream_type,
            max_channels_in_session: 1,
            max_requests_waiting_for_response_in_channel: 20,
            keep_alive_interval: Duration::from_secs(30),
            min_response_length: Self::DEFAULT_MIN_RESPONSE_LENGTH,
            max_pending_fragments_per_databin: 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_channels_in_session == 0 {
            bail!("a session needs at least one channel");
        }
        if self.max_requests_waiting_for_response_in_channel == 0 {
            bail!("a channel must allow at least one request waiting for response");
        }
        if self.keep_alive_interval.is_zero() {
            bail!("keep-alive interval must not be zero");
        }
        if self.min_response_length == 0 {
            bail!("minimal response length must not be zero");
        }
        if self.max_pending_fragments_per_databin == 0 {
            bail!("at least one pending fragment per databin must be allowed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default(|_: &mut SessionConfig| {}, true)]
    #[case::no_channels(|c: &mut SessionConfig| c.max_channels_in_session = 0, false)]
    #[case::no_waiting_requests(|c: &mut SessionConfig| c.max_requests_waiting_for_response_in_channel = 0, false)]
    #[case::no_keep_alive(|c: &mut SessionConfig| c.keep_alive_interval = Duration::ZERO, false)]
    #[case::no_response_length(|c: &mut SessionConfig| c.min_response_length = 0, false)]
    #[case::no_pending_fragments(|c: &mut SessionConfig| c.max_pending_fragments_per_databin = 0, false)]
    fn test_validate(#[case] modify: fn(&mut SessionConfig), #[case] expected_valid: bool) {
        let mut config = SessionConfig::new(StreamType::Precinct);
        modify(&mut config);
        assert_eq!(config.validate().is_ok(), expected_valid);
    }

    #[rstest]
    #[case::tile_part(StreamType::TilePart, "jpt-stream", true)]
    #[case::precinct(StreamType::Precinct, "jpp-stream", false)]
    fn test_stream_type(#[case] stream_type: StreamType, #[case] expected_query: &str, #[case] expected_tile_part: bool) {
        assert_eq!(stream_type.query_value(), expected_query);
        assert_eq!(stream_type.is_tile_part_stream(), expected_tile_part);
    }
}
