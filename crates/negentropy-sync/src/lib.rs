//! Range-based set reconciliation over a chunked BLE GATT transport.
//!
//! Three layers, bottom to top:
//! - [`engine`] drives one peer's side of the Negentropy protocol over a
//!   sealed [`storage::Storage`].
//! - [`transport`] compresses and chunks engine output for a ~512-byte MTU
//!   link, and abstracts the GATT read/write/notify surface itself.
//! - [`session`] is the per-peer orchestrator: role selection, JSON
//!   envelope dispatch, and the post-reconciliation event-fetch phase.

pub mod accumulator;
pub mod config;
pub mod content_store;
pub mod engine;
pub mod error;
pub mod hexstr;
pub mod item;
pub mod session;
pub mod storage;
pub mod transport;
pub mod varint;

pub use engine::{InitiatorReply, Negentropy};
pub use error::{Error, Result};
pub use item::{Bound, Id, Item};
pub use storage::Storage;
