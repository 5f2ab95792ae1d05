//! The Meander client library.
//!
//! The control socket is a strictly serialized byte stream, so exactly
//! one thread may read it. [`dispatcher::Dispatcher`] owns that reader
//! and offers a one-in-flight synchronous request/response primitive on
//! top of it; asynchronous notifications are consumed internally and the
//! chunked snapshot stream is reassembled by
//! [`assembler::SnapshotAssembler`]. [`client::Client`] wraps the
//! dispatcher in typed request methods with tight expected-reply sets.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod assembler;
pub mod client;
pub mod dispatcher;
pub mod error;

pub use assembler::{SnapshotAssembler, SnapshotData};
pub use client::Client;
pub use dispatcher::Dispatcher;
pub use error::ClientError;
