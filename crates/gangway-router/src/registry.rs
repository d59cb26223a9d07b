use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::error::RouterError;
use crate::frame::StreamSide;

/// Which half of a session a stream claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSide {
    Client,
    Agent,
}

impl SessionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSide::Client => "client",
            SessionSide::Agent => "agent",
        }
    }
}

#[derive(Default)]
struct SlotInner {
    client: Option<StreamSide>,
    agent: Option<StreamSide>,
    paired: bool,
    released: bool,
}

/// Per-session rendezvous point. Holds at most one stream handle per
/// side; the pairing signal fires exactly once, and a released slot
/// never accepts another side.
pub struct RendezvousSlot {
    key: String,
    created_at: Instant,
    inner: Mutex<SlotInner>,
    paired_tx: watch::Sender<bool>,
}

enum JoinOutcome {
    /// Both handles, ready to pump. The joiner owns them from here.
    Joined { client: StreamSide, agent: StreamSide },
    /// The requested side is already occupied (or the session is
    /// already paired); the live slot is untouched.
    SideTaken,
    /// The slot was released between lookup and join; the caller's
    /// handle is returned so it can seed a fresh slot.
    Released(StreamSide),
    /// One side was marked present but its handle was gone.
    Corrupt,
}

impl RendezvousSlot {
    fn new(key: &str) -> Self {
        let (paired_tx, _) = watch::channel(false);
        Self {
            key: key.to_string(),
            created_at: Instant::now(),
            inner: Mutex::new(SlotInner::default()),
            paired_tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().expect("slot lock poisoned")
    }

    /// Wait until the partner arrives. Safe to call from any number of
    /// tasks, before or after the pairing edge. Returns false if the
    /// window elapses first.
    pub async fn wait_paired(&self, window: Duration) -> bool {
        let mut rx = self.paired_tx.subscribe();
        match tokio::time::timeout(window, rx.wait_for(|paired| *paired)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    fn attach_first(&self, side: SessionSide, handle: StreamSide) {
        let mut inner = self.lock();
        match side {
            SessionSide::Client => inner.client = Some(handle),
            SessionSide::Agent => inner.agent = Some(handle),
        }
    }

    fn try_join(&self, side: SessionSide, handle: StreamSide) -> JoinOutcome {
        let mut inner = self.lock();
        if inner.released {
            return JoinOutcome::Released(handle);
        }
        if inner.paired {
            return JoinOutcome::SideTaken;
        }
        let occupied = match side {
            SessionSide::Client => inner.client.is_some(),
            SessionSide::Agent => inner.agent.is_some(),
        };
        if occupied {
            return JoinOutcome::SideTaken;
        }
        let partner = match side {
            SessionSide::Client => inner.agent.take(),
            SessionSide::Agent => inner.client.take(),
        };
        let Some(partner) = partner else {
            return JoinOutcome::Corrupt;
        };
        inner.paired = true;
        drop(inner);
        self.paired_tx.send_replace(true);
        let (client, agent) = match side {
            SessionSide::Client => (handle, partner),
            SessionSide::Agent => (partner, handle),
        };
        JoinOutcome::Joined { client, agent }
    }

    /// Returns true exactly once. Drops any handle still attached so
    /// its response stream ends.
    fn mark_released(&self) -> bool {
        let mut inner = self.lock();
        if inner.released {
            return false;
        }
        inner.released = true;
        inner.client.take();
        inner.agent.take();
        true
    }

    /// Timeout variant of [`mark_released`]: refuses once paired, and
    /// hands back the waiting side's handle so the timeout error can
    /// still be delivered on it.
    fn mark_abandoned(&self) -> Option<StreamSide> {
        let mut inner = self.lock();
        if inner.released || inner.paired {
            return None;
        }
        inner.released = true;
        inner.client.take().or_else(|| inner.agent.take())
    }
}

/// Outcome of [`SessionRegistry::acquire_or_join`].
pub enum Acquired {
    /// First side in; wait on the slot's pairing signal.
    First(Arc<RendezvousSlot>),
    /// Second side in; both handles, ready to pump.
    Second {
        slot: Arc<RendezvousSlot>,
        client: StreamSide,
        agent: StreamSide,
    },
}

/// Concurrent map of live rendezvous slots, one per session key.
///
/// Cleanup is deterministic: whichever task finishes a session calls
/// `release` or `abandon`, and the transport's keepalive is the
/// backstop for peers that vanish without closing. There is no sweeper
/// task, so there is no sweep/release window to reason about.
pub struct SessionRegistry {
    slots: DashMap<String, Arc<RendezvousSlot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Number of live slots (sessions opened and not yet released).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Create a slot for `key` or join the one the partner left.
    ///
    /// A second stream claiming an occupied side is rejected without
    /// touching the live slot; overwriting would orphan the stream
    /// that got there first. A slot released concurrently (rendezvous
    /// timeout racing a late arrival) counts as absent: the arrival
    /// seeds a fresh slot and becomes its first side.
    pub fn acquire_or_join(
        &self,
        key: &str,
        side: SessionSide,
        handle: StreamSide,
    ) -> Result<Acquired, RouterError> {
        match self.slots.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                let slot = Arc::new(RendezvousSlot::new(key));
                slot.attach_first(side, handle);
                entry.insert(slot.clone());
                Ok(Acquired::First(slot))
            }
            Entry::Occupied(mut entry) => {
                let slot = entry.get().clone();
                match slot.try_join(side, handle) {
                    JoinOutcome::Joined { client, agent } => Ok(Acquired::Second {
                        slot,
                        client,
                        agent,
                    }),
                    JoinOutcome::SideTaken => Err(RouterError::DuplicateSession(key.to_string())),
                    JoinOutcome::Released(handle) => {
                        let fresh = Arc::new(RendezvousSlot::new(key));
                        fresh.attach_first(side, handle);
                        entry.insert(fresh.clone());
                        Ok(Acquired::First(fresh))
                    }
                    JoinOutcome::Corrupt => {
                        tracing::error!(session_key = %key, "slot lost a stream handle before pairing");
                        slot.mark_released();
                        entry.remove();
                        Err(RouterError::Internal(format!(
                            "session {key} lost a stream handle before pairing"
                        )))
                    }
                }
            }
        }
    }

    /// Remove `slot` from the registry if it is still the live slot
    /// for its key. Idempotent; returns true only for the call that
    /// actually released, which is then responsible for final
    /// accounting. A successor slot under the same key is never
    /// touched.
    pub fn release(&self, slot: &Arc<RendezvousSlot>) -> bool {
        if !slot.mark_released() {
            return false;
        }
        self.slots
            .remove_if(slot.key(), |_, live| Arc::ptr_eq(live, slot));
        true
    }

    /// Rendezvous-timeout path: release only if the partner never
    /// arrived. Returns the waiting side's handle so the caller can
    /// deliver the timeout error, or None if the slot paired (or was
    /// already released) in the same instant.
    pub fn abandon(&self, slot: &Arc<RendezvousSlot>) -> Option<StreamSide> {
        let handle = slot.mark_abandoned()?;
        self.slots
            .remove_if(slot.key(), |_, live| Arc::ptr_eq(live, slot));
        Some(handle)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
