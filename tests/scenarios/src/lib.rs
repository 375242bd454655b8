//! # clusterlink-scenarios
//!
//! End-to-end scenarios for clusterlink.
//!
//! Every scenario runs a real [`link_host::Host`] with a mock upstream and
//! one or more display processes attached over in-memory or byte-stream
//! links:
//! - Refcounted watch sharing across stores and displays
//! - Activation deduplication, failure and restart
//! - Request timeouts and ordered broadcast delivery
//! - Frame scoping, store semantics and backlog overflow
//! - Stream recovery and giving up

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
