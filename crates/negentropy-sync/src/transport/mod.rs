//! Chunked BLE GATT transport (§4.F, §4.G): compress-and-chunk framing over
//! a message-oriented link with a ~512-byte MTU ceiling.

pub mod ble;
pub mod chunk;

pub use ble::{BleTransport, InMemoryBleTransport, PeerEvent};
pub use chunk::{join, split, Chunk};
