use crate::config::StreamType;
use crate::image::codestream_part_params::CodestreamPartParams;
use crate::image::quality_layers::QualityLayers;
use crate::image::structure::CodestreamStructure;

/// The fixed URL prefixes of a session, derived from the server's base URL
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JpipUrls {
    pub channel_management: String,
    pub data_request: String,
}
impl JpipUrls {
    pub fn new(base_url: &str, stream_type: StreamType) -> JpipUrls {
        let delimiter = if base_url.contains('?') { '&' } else { '?' };
        let channel_management = format!("{}{}type={}", base_url, delimiter, stream_type.query_value());
        let data_request = format!("{}&stream=0", channel_management);
        JpipUrls { channel_management, data_request }
    }

    pub fn close_session(&self, channel_id: &str) -> String {
        format!("{}&cclose=*&cid={}", self.channel_management, channel_id)
    }
}

/// Query parameters selecting the requested part of the image: frame size, region and quality
pub fn data_request_query(params: &CodestreamPartParams, structure: &dyn CodestreamStructure, quality: QualityLayers) -> String {
    let mut query = format!("&fsiz={},{},closest&rsiz={},{}&roff={},{}",
        structure.level_width(params.level),
        structure.level_height(params.level),
        params.max_x_exclusive - params.min_x,
        params.max_y_exclusive - params.min_y,
        params.min_x,
        params.min_y,
    );

    if let QualityLayers::Bounded(layers) = quality {
        query.push_str(&format!("&layers={}", layers));
    }
    query
}

/// Extracts the new channel id from the value of a `JPIP-cnew` response header, e.g.
///  `cid=0x1234,path=jpip,transport=http`
pub fn parse_cnew_channel_id(header_value: &str) -> Option<String> {
    header_value.split(',')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| *key == "cid")
        .map(|(_, value)| value.to_string())
        .filter(|cid| !cid.is_empty())
}
