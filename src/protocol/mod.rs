pub mod channel;
pub mod driver;
pub mod end_of_response;
pub mod http_transport;
pub mod message_header;
pub mod request;
pub mod request_url;
pub mod session;
pub mod session_helper;
pub mod transport;
