use thiserror::Error;

/// Errors from the varint and hex codecs (§4.A).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("varint buffer truncated")]
    Truncated,

    #[error("varint exceeds u64 range")]
    Overflow,

    #[error("hex string has odd length")]
    OddLengthHex,

    #[error("invalid hex digit")]
    InvalidHexDigit,
}

/// Errors constructing [`crate::item::Item`]/[`crate::item::Bound`] (§4.B).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("item id must be exactly 32 bytes")]
    BadIdSize,

    #[error("bound id prefix longer than 32 bytes")]
    BoundKeyTooLong,
}

/// Errors from [`crate::storage::Storage`] (§4.D).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage is already sealed")]
    AlreadySealed,

    #[error("storage is not sealed")]
    NotSealed,

    #[error("duplicate item inserted: timestamp={0} id={1}")]
    DuplicateItem(u64, String),

    #[error("range [{begin}, {end}) is out of bounds for storage of size {size}")]
    OutOfRange {
        begin: usize,
        end: usize,
        size: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from the Negentropy engine (§4.E).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("frame size limit must be 0 (unbounded) or >= 4096")]
    FrameSizeTooSmall,

    #[error("initiate() already called on this engine")]
    AlreadyInitiated,

    #[error("reconcile() called on an initiator engine; use reconcile_with_ids()")]
    IsInitiator,

    #[error("reconcile_with_ids() called on a non-initiator engine; call initiate() first")]
    NotInitiator,

    #[error("protocol byte {0:#04x} outside valid range 0x60..=0x6f")]
    BadProtocolByte(u8),

    #[error("peer's protocol version {0:#04x} is not supported by this initiator")]
    UnsupportedVersion(u8),

    #[error("unexpected range mode {0}")]
    UnexpectedMode(u64),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the chunk transport codec (§4.F).
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("message compresses/splits into {0} chunks, more than the 255 a single index byte can address")]
    TooManyChunks(usize),

    #[error("chunk frame shorter than the 2-byte index/total header")]
    FrameTooShort,

    #[error("no chunks to join")]
    Empty,

    #[error("deflate compression failed: {0}")]
    Compress(String),

    #[error("inflate decompression failed: {0}")]
    Decompress(String),
}

/// Errors from the BLE transport adapter (§4.G).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("GATT characteristic missing after service discovery: {0}")]
    CharacteristicMissing(&'static str),

    #[error("not connected to peer {0}")]
    NotConnected(String),

    #[error("transport operation against peer {0} timed out")]
    TransportTimeout(String),

    #[error("write to peer {0} failed: {1}")]
    WriteFailed(String, String),

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Crate-wide error, aggregating every module's error enum.
///
/// Mirrors `notedeck::Error`'s composition of `SubscriptionError`,
/// `FilterError`, `ZapError`, etc. into one top-level type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed json envelope: {0}")]
    Envelope(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
