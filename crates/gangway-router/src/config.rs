use std::time::Duration;

/// Tunables consumed by the session core. The binary fills this from
/// command-line flags; tests shrink the timeouts instead of sleeping
/// for minutes.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long the first side of a session may wait for its partner.
    pub rendezvous_timeout: Duration,
    /// Bound on every forwarded write toward a destination stream. A
    /// destination that stalls past this is treated as dead and the
    /// whole session is torn down.
    pub stream_send_timeout: Duration,
    /// HTTP/2 concurrent-stream cap enforced by the server.
    pub max_concurrent_streams: u32,
    /// Cap on encoded message size in both directions.
    pub max_message_size: usize,
    pub max_session_key_len: usize,
    pub max_workflow_id_len: usize,
    /// Frames buffered per direction before the send timeout starts
    /// counting against a slow consumer. Must be at least 1.
    pub forward_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rendezvous_timeout: Duration::from_secs(60),
            stream_send_timeout: Duration::from_secs(30),
            max_concurrent_streams: 1000,
            max_message_size: 4 * 1024 * 1024,
            max_session_key_len: 256,
            max_workflow_id_len: 256,
            forward_buffer: 64,
        }
    }
}
