//! Test infrastructure for the Tryl activity log client.
//!
//! Provides a scripted in-memory transport for deterministic pipeline tests,
//! a wiremock-backed API server for HTTP-level tests, fixtures, and proptest
//! strategies.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod fixtures;
pub mod http;
pub mod strategies;
pub mod transport;

pub use http::{fast_retry, ApiServer};
pub use transport::{ScriptedReply, ScriptedTransport};
