use std::time::Duration;

use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::RouterError;
use crate::frame::{Frame, FrameSink, FrameSource, StreamSide};
use crate::metrics::SessionOutcome;

/// Why one forwarding direction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionEnd {
    /// Source closed cleanly (explicit close frame or transport EOF).
    SourceClosed,
    /// Source surfaced an error; it was propagated to the destination.
    SourceError,
    /// Destination did not accept a frame within the send timeout.
    SendTimeout,
    /// Destination's handler went away; its response stream is gone.
    SinkClosed,
    /// The sibling direction (or the server) tore the session down.
    Cancelled,
    /// The forwarding task itself failed.
    Faulted,
}

/// Totals for one direction, flushed to metrics once at teardown so
/// the hot path carries no shared counters.
#[derive(Debug, Clone, Copy)]
pub struct DirectionReport {
    pub bytes: u64,
    pub frames: u64,
    pub end: DirectionEnd,
}

#[derive(Debug)]
pub struct PumpReport {
    pub client_to_agent: DirectionReport,
    pub agent_to_client: DirectionReport,
}

impl PumpReport {
    pub fn outcome(&self) -> SessionOutcome {
        let ends = [self.client_to_agent.end, self.agent_to_client.end];
        if ends.contains(&DirectionEnd::Faulted) {
            SessionOutcome::Internal
        } else if ends.contains(&DirectionEnd::SendTimeout) {
            SessionOutcome::ForwardingTimeout
        } else if ends.contains(&DirectionEnd::SourceError) {
            SessionOutcome::PeerError
        } else {
            SessionOutcome::Completed
        }
    }
}

/// Forward frames between two paired sides until either stream ends, a
/// write times out, or `shutdown` fires.
///
/// The two directions run as independent tasks sharing no mutable
/// state; the only coupling is the cancellation token that tears both
/// down once one hits a terminal condition. Within a direction, frame
/// order is preserved exactly as received.
pub async fn run(
    client: StreamSide,
    agent: StreamSide,
    send_timeout: Duration,
    shutdown: CancellationToken,
) -> PumpReport {
    let cancel = shutdown.child_token();
    let StreamSide {
        source: client_source,
        sink: client_sink,
    } = client;
    let StreamSide {
        source: agent_source,
        sink: agent_sink,
    } = agent;

    let client_to_agent = tokio::spawn(forward(
        client_source,
        agent_sink.clone(),
        send_timeout,
        cancel.clone(),
        "client_to_agent",
    ));
    let agent_to_client = tokio::spawn(forward(
        agent_source,
        client_sink.clone(),
        send_timeout,
        cancel.clone(),
        "agent_to_client",
    ));

    let client_to_agent = finish(client_to_agent, &cancel, "client_to_agent").await;
    let agent_to_client = finish(agent_to_client, &cancel, "agent_to_client").await;

    let report = PumpReport {
        client_to_agent,
        agent_to_client,
    };

    // A stuck peer means the pairing is no longer viable; tell both
    // sides why, where their transport still accepts it.
    if report.outcome() == SessionOutcome::ForwardingTimeout {
        let err = RouterError::ForwardingTimeout(send_timeout);
        for sink in [&client_sink, &agent_sink] {
            let _ = sink.try_send(Ok(Frame::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            }));
        }
    }

    report
}

async fn finish(
    task: tokio::task::JoinHandle<DirectionReport>,
    cancel: &CancellationToken,
    direction: &'static str,
) -> DirectionReport {
    match task.await {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(direction, ?err, "forwarding task failed");
            cancel.cancel();
            DirectionReport {
                bytes: 0,
                frames: 0,
                end: DirectionEnd::Faulted,
            }
        }
    }
}

async fn forward(
    mut source: FrameSource,
    sink: FrameSink,
    send_timeout: Duration,
    cancel: CancellationToken,
    direction: &'static str,
) -> DirectionReport {
    let mut bytes = 0u64;
    let mut frames = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return DirectionReport { bytes, frames, end: DirectionEnd::Cancelled };
            }
            next = source.next() => next,
        };

        let frame = match next {
            // Transport-level EOF counts as a clean close.
            None => Frame::Close,
            Some(Ok(frame)) => frame,
            Some(Err(status)) => Frame::Error {
                code: "PEER_STREAM".to_string(),
                message: status.message().to_string(),
            },
        };

        let end = match &frame {
            Frame::Close => Some(DirectionEnd::SourceClosed),
            Frame::Error { .. } => Some(DirectionEnd::SourceError),
            _ => None,
        };
        let payload_len = frame.payload_len() as u64;

        match timeout(send_timeout, sink.send(Ok(frame))).await {
            Ok(Ok(())) => {
                bytes += payload_len;
                frames += 1;
            }
            Ok(Err(_)) => {
                cancel.cancel();
                return DirectionReport { bytes, frames, end: DirectionEnd::SinkClosed };
            }
            Err(_) => {
                tracing::warn!(direction, ?send_timeout, "destination stalled, tearing session down");
                cancel.cancel();
                return DirectionReport { bytes, frames, end: DirectionEnd::SendTimeout };
            }
        }

        if let Some(end) = end {
            // A stream end on one side ends the whole session.
            cancel.cancel();
            return DirectionReport { bytes, frames, end };
        }
    }
}
