//! 32-byte item identifiers, timestamped items, and order-cutting bounds
//! (§4.B).

use std::cmp::Ordering;
use std::fmt;

use crate::error::ItemError;
use crate::hexstr;

pub const ID_SIZE: usize = 32;

/// A 32-byte content-addressed identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub fn new(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, ItemError> {
        if slice.len() != ID_SIZE {
            return Err(ItemError::BadIdSize);
        }
        let mut bytes = [0u8; ID_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, crate::error::Error> {
        let bytes = hexstr::decode(s).map_err(crate::error::Error::from)?;
        Self::from_slice(&bytes).map_err(crate::error::Error::from)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ID_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hexstr::encode(self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An immutable `(timestamp, id)` pair. Ordered first by timestamp, then by
/// id lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Item {
    pub timestamp: u64,
    pub id: Id,
}

impl Item {
    pub fn new(timestamp: u64, id: Id) -> Self {
        Self { timestamp, id }
    }

    /// An item with the given timestamp and an all-zero id, used as a
    /// scratch sentinel when only the timestamp component matters.
    pub fn with_timestamp(timestamp: u64) -> Self {
        Self {
            timestamp,
            id: Id::default(),
        }
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A cut point in the Item order: a timestamp plus an id prefix of
/// `0..=32` bytes. Shorter prefixes compare as "anything with this
/// timestamp and this prefix or less".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bound {
    pub timestamp: u64,
    id_prefix: [u8; ID_SIZE],
    id_len: usize,
}

impl Bound {
    pub fn new(timestamp: u64, id_prefix: &[u8]) -> Result<Self, ItemError> {
        if id_prefix.len() > ID_SIZE {
            return Err(ItemError::BoundKeyTooLong);
        }
        let mut buf = [0u8; ID_SIZE];
        buf[..id_prefix.len()].copy_from_slice(id_prefix);
        Ok(Self {
            timestamp,
            id_prefix: buf,
            id_len: id_prefix.len(),
        })
    }

    /// A bound with only a timestamp component (zero-length id prefix).
    pub fn with_timestamp(timestamp: u64) -> Self {
        Self {
            timestamp,
            id_prefix: [0u8; ID_SIZE],
            id_len: 0,
        }
    }

    /// The upper sentinel bound `(MAX_U64, ∅)` — strictly greater than every
    /// representable item.
    pub fn infinity() -> Self {
        Self::with_timestamp(u64::MAX)
    }

    /// A bound built from a full item, using its complete 32-byte id.
    pub fn from_item(item: &Item) -> Self {
        Self {
            timestamp: item.timestamp,
            id_prefix: item.id.to_bytes(),
            id_len: ID_SIZE,
        }
    }

    pub fn id_len(&self) -> usize {
        self.id_len
    }

    pub fn id_prefix(&self) -> &[u8] {
        &self.id_prefix[..self.id_len]
    }

    /// Is `item` strictly less than this bound?
    pub fn item_precedes(&self, item: &Item) -> bool {
        match item.timestamp.cmp(&self.timestamp) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => item.id.as_bytes()[..self.id_len] < self.id_prefix[..self.id_len],
        }
    }

    /// The shortest bound separating `prev` from `curr`, where
    /// `prev < curr` under the item order (§4.E `minimal_bound`).
    pub fn minimal_separating(prev: &Item, curr: &Item) -> Result<Self, ItemError> {
        if prev.timestamp != curr.timestamp {
            return Ok(Self::with_timestamp(curr.timestamp));
        }

        let prev_id = prev.id.as_bytes();
        let curr_id = curr.id.as_bytes();
        let mut k = 0;
        while k < ID_SIZE && prev_id[k] == curr_id[k] {
            k += 1;
        }
        Self::new(curr.timestamp, &curr_id[..k + 1])
    }
}
