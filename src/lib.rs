//! Client side of the JPEG2000 Interactive Protocol (JPIP).
//!
//! A JPIP server hands out a huge JPEG2000 codestream in small, individually addressable pieces
//!  ("databins"). This crate contains the part of a viewer that talks to such a server: it opens
//!  a session, creates and reuses channels, issues data requests with a growing response length,
//!  demultiplexes the returned message stream into a per-session databin cache, and tells callers
//!  when enough quality layers have arrived for a progressive rendering stage.
//!
//! ## Structure
//!
//! * [protocol] has the session / channel / request state machine. It is sans-IO: requests are
//!   handed to a [protocol::transport::Transport] together with a token, and completions are fed
//!   back through [protocol::session::Session::on_transport_event]. [protocol::driver] runs this
//!   on tokio with an HTTP transport and the keep-alive timer.
//! * [databins] is the append-only, gap tolerant cache that all requests of a session write into.
//! * [image] has region parameters, progressiveness stages and the tracker that turns
//!   'quality layers reached' signals into 'stage reached' events.
//!
//! Codestream geometry and reconstruction are external collaborators: geometry is consumed
//!  through [image::structure::CodestreamStructure], and reconstruction reads the cache through
//!  [databins::databins_saver::DatabinsSaver].

pub mod config;
pub mod databins;
pub mod error;
pub mod image;
pub mod protocol;
pub mod util;

#[cfg(test)]
pub mod test_util;
