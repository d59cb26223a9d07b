use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tonic::Status;

/// One message travelling through a paired session, independent of
/// which operation (exec, port-forward, rsync) the wire carries. Each
/// operation's messages are framed equivalently, so the registry and
/// pump handle this type only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent to both sides when the partner stream arrives. Only ever
    /// travels router-to-caller.
    Paired,
    /// Opaque payload bytes.
    Data(Vec<u8>),
    /// Clean end-of-stream from one side.
    Close,
    /// Terminal error surfaced to the paired side.
    Error { code: String, message: String },
}

impl Frame {
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Data(payload) => payload.len(),
            _ => 0,
        }
    }
}

/// Inbound half of one side, init already consumed: every remaining
/// wire message mapped to a [`Frame`].
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<Frame, Status>> + Send>>;

/// Outbound half of one side: frames pushed here surface on that
/// side's response stream. Bounded, so a slow consumer backpressures
/// the pump into its send timeout rather than buffering without limit.
pub type FrameSink = mpsc::Sender<Result<Frame, Status>>;

/// A duplex handle for one side of a session. Built by the operation
/// handler at the stream boundary; owned by the rendezvous slot until
/// pairing, then by the pump.
pub struct StreamSide {
    pub source: FrameSource,
    pub sink: FrameSink,
}
