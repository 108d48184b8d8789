//! Core types for the Tryl activity log client.
//!
//! Provides the event payload and response shapes exchanged with the API,
//! the error taxonomy used for retry decisions, and client-side validation.
//! The delivery pipeline in `tryl-delivery` builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod filter;
pub mod management;
pub mod models;
pub mod validation;

pub use error::{codes, ErrorCategory, Result, TrylError};
pub use filter::{EventFilter, SortOrder};
pub use models::{
    BatchItemError, BatchRequest, BatchResponse, Event, EventFields, EventList, EventReceipt,
    StoredEvent, MAX_EVENTS_PER_BATCH,
};
pub use validation::{validate_api_key, validate_event};
