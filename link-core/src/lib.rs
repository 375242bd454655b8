//! # link-core
//!
//! Pure logic for clusterlink (no I/O, instant tests).
//!
//! This crate implements the state machines and bookkeeping behind cluster
//! sessions and the watch multiplexer without any network, IPC or timers,
//! enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (upstream connections, IPC) is performed by `link-host` and
//! `link-watch`, which interpret the actions and transitions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backlog;
pub mod frames;
pub mod refcount;
pub mod resync;
pub mod session;
pub mod versions;

pub use backlog::{Backlog, PushOutcome};
pub use frames::{FrameTable, Unregistered};
pub use refcount::{SubscriptionKey, SubscriptionTable, SubscriptionToken, TableError, Transition};
pub use resync::{RecoveryDecision, ResyncPolicy, StreamRecovery};
pub use session::{Action, Event, SessionMachine, SessionState};
pub use versions::{Freshness, VersionTracker};
