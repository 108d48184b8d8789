//! Reliable event delivery for the Tryl activity log.
//!
//! This crate sends activity events to the Tryl API, tolerating transient
//! failures with bounded retries and optionally grouping asynchronous
//! submissions into batch requests.
//!
//! # Architecture
//!
//! Every call goes through one path:
//!
//! 1. **Validate** - Events are checked locally; invalid input never retries
//! 2. **Dispatch** - The request runs under the retry executor
//! 3. **Transport** - One HTTP round trip per attempt
//! 4. **Resolve** - Batched submissions are resolved by position
//!
//! With batching enabled, [`Client::log_async`] hands events to a
//! [`Batcher`], whose background task sends a batch when it is full or when
//! the flush interval elapses. Each submitter receives its own outcome
//! exactly once through a [`ResultSink`].
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use tryl_core::{Event, TrylError};
//! use tryl_delivery::{BatchConfig, ClientBuilder};
//!
//! # async fn example() -> std::result::Result<(), TrylError> {
//! let client = ClientBuilder::new("actlog_live_0123456789abcdef0123456789abcdef")
//!     .batching(BatchConfig::default())
//!     .build()?;
//! let cancel = CancellationToken::new();
//!
//! let sink = client.log_async(&cancel, Event::new("user_1", "user.signed_in")).await;
//! client.close(&cancel).await?;
//! let receipt = sink.await?;
//! println!("recorded {}", receipt.id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batcher;
pub mod client;
pub mod dispatcher;
mod management;
pub mod observer;
pub mod retry;
pub mod transport;

pub use batcher::{BatchConfig, Batcher, BatcherState, ResultSink};
pub use client::{Client, ClientBuilder, ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use dispatcher::Dispatcher;
pub use observer::{BatchFailureObserver, LoggingObserver, MulticastObserver, NoOpObserver};
pub use reqwest::Method;
pub use retry::{RetryExecutor, RetryPolicy};
pub use transport::{
    HttpTransport, HttpTransportConfig, Transport, TransportError, TransportFuture,
    TransportRequest, TransportResponse,
};
pub use tryl_core::{Result, TrylError};
