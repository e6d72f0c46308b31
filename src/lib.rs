//! # fsd-ipc - IPC client for the fsd file-search daemon
//!
//! This crate talks to a locally running file-search daemon over its private,
//! versioned, length-framed binary protocol (a Unix-domain socket on Unix, a
//! named pipe on Windows). It issues search/sort/property/journal requests,
//! decodes the streamed binary replies into an in-memory result set, and
//! exposes that result set as typed columns.
//!
//! ## Architecture
//!
//! - [`client`] - One method per daemon request
//! - [`transport`] - Connection ownership, endpoint naming, cancellable I/O
//! - [`protocol`] - Message framing, the tiered VLQ codec, the reply stream
//! - [`search`] - Mutable, lock-guarded search request description
//! - [`result`] - Decoded result set with typed column access
//! - [`arena`] - Grow-only pool backing one result set
//! - [`snapshot`] - Directory-snapshot enumeration
//! - [`journal`] - Unbounded change-record streaming
//!
//! ## Quick start
//!
//! ```ignore
//! use fsd_ipc::{Client, PropertyRequestFlags, SearchFlags, SearchState};
//!
//! let client = Client::connect(None)?;
//! let state = SearchState::new();
//! state.set_text("report .pdf");
//! state.set_viewport(0, 100);
//! state.add_property_request(PROP_NAME, PropertyRequestFlags::FORMAT);
//! state.add_property_request(PROP_SIZE, PropertyRequestFlags::empty());
//!
//! let results = client.search(&state)?;
//! for row in 0..results.row_count() {
//!     let name = results.property_string(row, PROP_NAME, PropertyRequestFlags::FORMAT)?;
//!     let size = results.property_size(row, PROP_SIZE)?;
//!     println!("{:?} {:?}", name, size);
//! }
//! ```
//!
//! ## Concurrency model
//!
//! Every call blocks its thread until the reply is fully consumed. Requests
//! on one client are strictly serialized; a [`ShutdownHandle`] cloned from
//! the client aborts blocked and future calls from any other thread. A
//! [`SearchState`] carries its own lock and may be mutated while a request
//! built from it is in flight; the request uses a snapshot taken at send
//! time.

pub mod arena;
pub mod client;
pub mod error;
pub mod journal;
pub mod protocol;
pub mod result;
pub mod search;
pub mod snapshot;
pub mod transport;
pub mod variant;

pub use client::{Client, FileAttributesEx};
pub use error::{Error, Result};
pub use journal::{JournalChangeType, JournalFields, JournalInfo, JournalRecord};
pub use result::{FixedPoint, ResolvedRequest, ResultList};
pub use search::{
    PropertyRequest, PropertyRequestFlags, SearchFlags, SearchState, SortEntry,
    SORT_DESCENDING, VIEWPORT_UNBOUNDED,
};
pub use snapshot::{FindHandle, SnapshotEntry};
pub use transport::ShutdownHandle;
pub use variant::{PropertyValueType, PropertyVariant};
