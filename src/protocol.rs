//! DAP wire protocol: message envelopes, Content-Length framing and the
//! event dispatcher used to observe relayed traffic.
//!
//! # Module Structure
//!
//! - `message` - `ProtocolMessage` and its request/response/event envelopes
//! - `codec` - framing reader/writer and sequence numbering
//! - `dispatcher` - decode loop publishing named events with fire-once listeners

mod codec;
mod dispatcher;
mod message;

pub use codec::{MAX_FRAME_SIZE, MessageReader, MessageWriter, SequenceCounter, encode};
pub use dispatcher::MessageDispatcher;
pub use message::{Event, ProtocolMessage, Request, Response};
