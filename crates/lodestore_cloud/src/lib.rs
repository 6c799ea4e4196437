//! # lodestore cloud backend
//!
//! A remote-first backend over a cloud record store. The wire surface
//! is the narrow [`RecordClient`] contract; realtime row events arrive
//! over a [`RealtimeChannel`] and fold into the local cache and
//! watchers. Writes that cannot reach the remote queue in the
//! pending-change log, flip the status to `Disconnected`, and drain on
//! the next `sync()`: pushes first, then an authoritative pull.
//!
//! ```rust,ignore
//! use lodestore_cloud::{CloudBackend, MemoryRecordClient};
//!
//! let client = Arc::new(MemoryRecordClient::new());
//! let backend = CloudBackend::new(client.clone(), "contacts", adapter)
//!     .with_realtime(client.channel());
//! backend.initialize().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod client;
mod realtime;
mod translator;

pub use backend::CloudBackend;
pub use client::{map_remote_error, MemoryRecordClient, RecordClient, RemoteError};
pub use realtime::{RealtimeChannel, RecordEvent, RecordEventKind};
pub use translator::{to_record_query, RecordFilter, RecordOp, RecordOrder, RecordQuery};
