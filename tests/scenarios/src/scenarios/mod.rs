//! End-to-end scenarios, grouped by the part of the system under stress.
//!
//! | Module | Covers |
//! |--------|--------|
//! | `refcount` | One upstream watch per (cluster, kind) across stores and displays |
//! | `activation` | Deduplicated activation, failure, disconnect and restart |
//! | `transport` | Request timeouts, unknown channels, ordered broadcasts |
//! | `delivery` | Store semantics, frame scoping, backlog overflow |
//! | `recovery` | Stream restarts and giving up |
//!
//! Every scenario runs over both link kinds unless it tests something only
//! one of them can show.

pub mod activation;
pub mod delivery;
pub mod recovery;
pub mod refcount;
pub mod transport;
