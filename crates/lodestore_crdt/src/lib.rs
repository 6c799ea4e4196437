//! # lodestore CRDT backend
//!
//! A replicated local backend for lodestore. Every row carries a hybrid
//! logical clock stamp, the writing node's id, and a tombstone flag;
//! peers converge by exchanging CBOR changesets whose merge is
//! monotonic: a row is accepted only when its stamp is strictly newer
//! than the local copy, so replaying a changeset never changes state.
//!
//! ```rust,ignore
//! use lodestore_crdt::CrdtBackend;
//!
//! let phone = CrdtBackend::new(adapter.clone());
//! let laptop = CrdtBackend::new(adapter);
//! phone.initialize().await?;
//! laptop.initialize().await?;
//!
//! phone.save(note).await?;
//! laptop.apply_changeset(&phone.get_changeset(None)?)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod changeset;
mod hlc;
mod store;

pub use backend::CrdtBackend;
pub use changeset::{ChangeRow, Changeset};
pub use hlc::{epoch_ms, Hlc, HlcClock};
pub use store::{AppliedChange, CrdtRow, CrdtStore};
