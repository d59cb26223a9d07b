use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Terminal outcome of a session, used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    RendezvousTimeout,
    ForwardingTimeout,
    PeerError,
    Internal,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::RendezvousTimeout => "rendezvous_timeout",
            SessionOutcome::ForwardingTimeout => "forwarding_timeout",
            SessionOutcome::PeerError => "peer_error",
            SessionOutcome::Internal => "internal",
        }
    }
}

/// Narrow recording interface the session core calls into. The
/// concrete backend is an external collaborator; the core only
/// guarantees the call pattern: `session_opened` once per slot,
/// `session_paired` once per pairing, `session_closed` exactly once
/// per slot (the release winner records it).
pub trait MetricsSink: Send + Sync + 'static {
    /// A slot was created for a new session key.
    fn session_opened(&self, op: &'static str);

    /// Both sides arrived; `waited` is the rendezvous duration.
    fn session_paired(&self, op: &'static str, waited: Duration);

    /// The slot was released.
    fn session_closed(
        &self,
        op: &'static str,
        outcome: SessionOutcome,
        lifetime: Duration,
        bytes_client_to_agent: u64,
        bytes_agent_to_client: u64,
    );

    /// A stream was turned away without touching a live slot
    /// (invalid init or duplicate session).
    fn stream_rejected(&self, op: &'static str, code: &'static str);
}

/// Default sink: structured log lines, no backend.
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn session_opened(&self, op: &'static str) {
        tracing::debug!(op, "session opened");
    }

    fn session_paired(&self, op: &'static str, waited: Duration) {
        tracing::debug!(op, waited_ms = waited.as_millis() as u64, "session paired");
    }

    fn session_closed(
        &self,
        op: &'static str,
        outcome: SessionOutcome,
        lifetime: Duration,
        bytes_client_to_agent: u64,
        bytes_agent_to_client: u64,
    ) {
        tracing::debug!(
            op,
            outcome = outcome.as_str(),
            lifetime_ms = lifetime.as_millis() as u64,
            bytes_client_to_agent,
            bytes_agent_to_client,
            "session closed"
        );
    }

    fn stream_rejected(&self, op: &'static str, code: &'static str) {
        tracing::debug!(op, code, "stream rejected");
    }
}

/// Counting sink backed by atomics, for tests and embedders that
/// scrape gauges themselves. Active sessions is opened minus closed.
#[derive(Default)]
pub struct CountingSink {
    pub opened: AtomicU64,
    pub paired: AtomicU64,
    pub closed: AtomicU64,
    pub rejected: AtomicU64,
    pub active: AtomicI64,
    pub bytes_client_to_agent: AtomicU64,
    pub bytes_agent_to_client: AtomicU64,
}

impl MetricsSink for CountingSink {
    fn session_opened(&self, _op: &'static str) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn session_paired(&self, _op: &'static str, _waited: Duration) {
        self.paired.fetch_add(1, Ordering::Relaxed);
    }

    fn session_closed(
        &self,
        _op: &'static str,
        _outcome: SessionOutcome,
        _lifetime: Duration,
        bytes_client_to_agent: u64,
        bytes_agent_to_client: u64,
    ) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.bytes_client_to_agent
            .fetch_add(bytes_client_to_agent, Ordering::Relaxed);
        self.bytes_agent_to_client
            .fetch_add(bytes_agent_to_client, Ordering::Relaxed);
    }

    fn stream_rejected(&self, _op: &'static str, _code: &'static str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
}
