//! Session-rendezvous and stream-bridging router.
//!
//! A CLI-side stream and an agent-side stream that share a session key
//! arrive independently; the registry pairs them and the pump forwards
//! frames between them until either side closes, errors, or a timeout
//! fires. All session state is in-memory; a restarted router starts
//! empty and callers reconnect with fresh keys.

pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod ops;
pub mod pump;
pub mod registry;
pub mod service;
