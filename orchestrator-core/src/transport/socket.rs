use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

/// Data produced or consumed by a [`Socket`].
#[derive(Debug, Clone)]
pub enum Frame {
    /// An unsolicited ping, to be answered in kind (spec §4.1 describes `pong`
    /// replies being absorbed by the correlation table; the lower-level WebSocket
    /// ping/pong exchange is handled here, one layer below envelopes).
    Ping(Vec<u8>),
    /// A complete text frame, expected to parse as an [`Envelope`](crate::envelope::Envelope).
    Text(String),
}

/// A bidirectional stream of frames between the orchestrator and one peer
/// connection.
///
/// Implemented as a [`Stream`]+[`Sink`] pair, same shape as the teacher's
/// `MessageStream`, so the connection pump (B.2 of SPEC_FULL.md) is agnostic to
/// whether the other end is a real WebSocket or an in-process test double.
pub trait Socket:
    Stream<Item = Result<Frame>> + Sink<Frame, Error = Error> + Send + Unpin + Debug
{
    fn socket_kind(&self) -> &'static str;
}
