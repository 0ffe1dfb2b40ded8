//! The Negentropy range-based set-reconciliation engine (§4.E).
//!
//! Drives one peer's side of the protocol: `initiate()` builds the first
//! message, `reconcile()`/`reconcile_with_ids()` consume a peer message and
//! produce the next one, recursively refining disagreeing ranges via
//! fingerprint buckets until only id lists remain to exchange.

use crate::accumulator::FINGERPRINT_SIZE;
use crate::error::{CodecError, EngineError, ItemError};
use crate::hexstr;
use crate::item::{Bound, Id, Item, ID_SIZE};
use crate::storage::Storage;
use crate::varint::{decode_varint, encode_varint};

/// Version 1. Valid protocol bytes span `0x60..=0x6F`; only this exact byte
/// is understood by this implementation.
pub const PROTOCOL_VERSION: u8 = 0x61;
const MIN_PROTOCOL_VERSION: u8 = 0x60;
const MAX_PROTOCOL_VERSION: u8 = 0x6f;

const MAX_U64: u64 = u64::MAX;
const BUCKETS: usize = 16;
const DOUBLE_BUCKETS: usize = BUCKETS * 2;

/// Frame budget slack: reserves room for the truncation suffix (one bound
/// plus a fingerprint header) a round may need to emit when it runs over
/// `frame_size_limit`.
const FRAME_SLACK: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
enum Mode {
    Skip = 0,
    Fingerprint = 1,
    IdList = 2,
}

impl TryFrom<u64> for Mode {
    type Error = EngineError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Skip),
            1 => Ok(Mode::Fingerprint),
            2 => Ok(Mode::IdList),
            other => Err(EngineError::UnexpectedMode(other)),
        }
    }
}

fn take_bytes<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if buf.len() < n {
        return Err(CodecError::Truncated);
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], CodecError> {
    let slice = take_bytes(buf, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// The non-initiator's reply is always a hex string (possibly just the
/// protocol version byte, signalling "no more ranges for this round"). The
/// initiator additionally drains `have`/`need` ids, and signals convergence
/// with `None` instead of a further message.
pub struct InitiatorReply {
    pub next_message: Option<String>,
    pub have: Vec<Id>,
    pub need: Vec<Id>,
}

/// One peer's side of a reconciliation round.
pub struct Negentropy {
    storage: Storage,
    frame_size_limit: u32,
    is_initiator: bool,
    last_timestamp_in: u64,
    last_timestamp_out: u64,
}

impl Negentropy {
    /// `frame_size_limit` must be `0` (unbounded) or `>= 4096`.
    pub fn new(storage: Storage, frame_size_limit: u32) -> Result<Self, EngineError> {
        if frame_size_limit != 0 && frame_size_limit < 4096 {
            return Err(EngineError::FrameSizeTooSmall);
        }

        Ok(Self {
            storage,
            frame_size_limit,
            is_initiator: false,
            last_timestamp_in: 0,
            last_timestamp_out: 0,
        })
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Build the first message and mark this engine as the initiator.
    /// Returns a lowercase hex string.
    pub fn initiate(&mut self) -> Result<String, EngineError> {
        if self.is_initiator {
            return Err(EngineError::AlreadyInitiated);
        }
        self.is_initiator = true;

        let mut out = vec![PROTOCOL_VERSION];
        let size = self.storage.size()?;
        out.extend(self.split_range(0, size, Bound::infinity())?);

        Ok(hexstr::encode(out))
    }

    /// Non-initiator reconcile: always returns the next hex message to send
    /// back, even if it is only the protocol version byte.
    pub fn reconcile(&mut self, query_hex: &str) -> Result<String, EngineError> {
        if self.is_initiator {
            return Err(EngineError::IsInitiator);
        }
        let mut have = Vec::new();
        let mut need = Vec::new();
        let out = self.reconcile_aux(query_hex, &mut have, &mut need)?;
        Ok(hexstr::encode(out))
    }

    /// Initiator reconcile: drains newly discovered have/need ids and
    /// returns `None` once converged (no further message required).
    pub fn reconcile_with_ids(&mut self, query_hex: &str) -> Result<InitiatorReply, EngineError> {
        if !self.is_initiator {
            return Err(EngineError::NotInitiator);
        }

        let mut have = Vec::new();
        let mut need = Vec::new();
        let out = self.reconcile_aux(query_hex, &mut have, &mut need)?;

        let next_message = if out.len() == 1 {
            None
        } else {
            Some(hexstr::encode(out))
        };

        Ok(InitiatorReply {
            next_message,
            have,
            need,
        })
    }

    fn reconcile_aux(
        &mut self,
        query_hex: &str,
        have: &mut Vec<Id>,
        need: &mut Vec<Id>,
    ) -> Result<Vec<u8>, EngineError> {
        self.last_timestamp_in = 0;
        self.last_timestamp_out = 0;

        let query_bytes = hexstr::decode(query_hex).map_err(EngineError::Codec)?;
        let mut query: &[u8] = &query_bytes;

        let mut full_output = vec![PROTOCOL_VERSION];

        let version = *query.first().ok_or(CodecError::Truncated)?;
        query = &query[1..];

        if !(MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(&version) {
            return Err(EngineError::BadProtocolByte(version));
        }
        if version != PROTOCOL_VERSION {
            if self.is_initiator {
                return Err(EngineError::UnsupportedVersion(version));
            }
            return Ok(full_output);
        }

        let storage_size = self.storage.size()?;
        let mut prev_bound = Bound::with_timestamp(0);
        let mut prev_index = 0usize;
        let mut skip = false;

        while !query.is_empty() {
            let mut round_output = Vec::new();

            let curr_bound = self.decode_bound(&mut query)?;
            let mode = Mode::try_from(decode_varint(&mut query)?)?;

            let lower = prev_index;
            let mut upper = self
                .storage
                .find_lower_bound(prev_index, storage_size, &curr_bound)?;

            match mode {
                Mode::Skip => {
                    skip = true;
                }
                Mode::Fingerprint => {
                    let their_fp: [u8; FINGERPRINT_SIZE] = take_array(&mut query)?;
                    let our_fp = self.storage.fingerprint(lower, upper)?;

                    if their_fp == our_fp {
                        skip = true;
                    } else {
                        if skip {
                            skip = false;
                            round_output.extend(self.encode_bound(&prev_bound));
                            round_output.extend(encode_varint(Mode::Skip as u64));
                        }
                        round_output.extend(self.split_range(lower, upper, curr_bound)?);
                    }
                }
                Mode::IdList => {
                    let num_ids = decode_varint(&mut query)?;

                    if self.is_initiator {
                        let mut their_ids: hashbrown::HashSet<Id> =
                            hashbrown::HashSet::with_capacity(num_ids as usize);
                        for _ in 0..num_ids {
                            let bytes: [u8; ID_SIZE] = take_array(&mut query)?;
                            their_ids.insert(Id::new(bytes));
                        }

                        self.storage.iterate(lower, upper, |item, _| {
                            if !their_ids.remove(&item.id) {
                                have.push(item.id);
                            }
                            true
                        })?;
                        need.extend(their_ids.into_iter());
                        skip = true;
                    } else {
                        // The non-initiator's own ids in this range are never
                        // compared against the query's; it just echoes its
                        // range back. Consume the ids off the wire anyway to
                        // keep the cursor correct.
                        for _ in 0..num_ids {
                            take_array::<ID_SIZE>(&mut query)?;
                        }

                        if skip {
                            skip = false;
                            round_output.extend(self.encode_bound(&prev_bound));
                            round_output.extend(encode_varint(Mode::Skip as u64));
                        }

                        let mut response_ids = Vec::new();
                        let mut response_count: u64 = 0;
                        let mut end_bound = curr_bound;

                        self.storage.iterate(lower, upper, |item, index| {
                            if self.exceeded_frame_size_limit(
                                full_output.len() + response_ids.len(),
                            ) {
                                end_bound = Bound::from_item(&item);
                                upper = index;
                                return false;
                            }
                            response_ids.extend_from_slice(item.id.as_bytes());
                            response_count += 1;
                            true
                        })?;

                        round_output.extend(self.encode_bound(&end_bound));
                        round_output.extend(encode_varint(Mode::IdList as u64));
                        round_output.extend(encode_varint(response_count));
                        round_output.extend(response_ids);
                    }
                }
            }

            if self.exceeded_frame_size_limit(full_output.len() + round_output.len()) {
                let remaining_fp = self.storage.fingerprint(upper, storage_size)?;
                full_output.extend(self.encode_bound(&Bound::infinity()));
                full_output.extend(encode_varint(Mode::Fingerprint as u64));
                full_output.extend(remaining_fp);
                break;
            }

            full_output.extend(round_output);
            prev_index = upper;
            prev_bound = curr_bound;
        }

        Ok(full_output)
    }

    /// Emit one round's worth of range records covering `[lower, upper)`,
    /// closing with `upper_bound`. Below `2 * BUCKETS` items this is a
    /// single IdList; otherwise 16 fingerprint buckets, each covering as
    /// equal a share of the range as integer division allows (the first
    /// `n mod 16` buckets take one extra item).
    fn split_range(
        &mut self,
        lower: usize,
        upper: usize,
        upper_bound: Bound,
    ) -> Result<Vec<u8>, EngineError> {
        let n = upper - lower;
        let mut out = Vec::with_capacity(16 + n * ID_SIZE / BUCKETS);

        if n < DOUBLE_BUCKETS {
            out.extend(self.encode_bound(&upper_bound));
            out.extend(encode_varint(Mode::IdList as u64));
            out.extend(encode_varint(n as u64));
            self.storage.iterate(lower, upper, |item, _| {
                out.extend_from_slice(item.id.as_bytes());
                true
            })?;
        } else {
            let items_per_bucket = n / BUCKETS;
            let buckets_with_extra = n % BUCKETS;
            let mut curr = lower;

            for bucket in 0..BUCKETS {
                let size = items_per_bucket + usize::from(bucket < buckets_with_extra);
                let fp = self.storage.fingerprint(curr, curr + size)?;
                curr += size;

                let bound = if curr == upper {
                    upper_bound
                } else {
                    let prev_item = self.storage.get(curr - 1)?.expect("curr-1 in range");
                    let curr_item = self.storage.get(curr)?.expect("curr in range");
                    Bound::minimal_separating(&prev_item, &curr_item)?
                };

                out.extend(self.encode_bound(&bound));
                out.extend(encode_varint(Mode::Fingerprint as u64));
                out.extend(fp);
            }
        }

        Ok(out)
    }

    fn exceeded_frame_size_limit(&self, n: usize) -> bool {
        self.frame_size_limit != 0 && n as u32 > self.frame_size_limit.saturating_sub(FRAME_SLACK)
    }

    fn decode_timestamp_in(&mut self, buf: &mut &[u8]) -> Result<u64, CodecError> {
        let v = decode_varint(buf)?;
        let delta = if v == 0 { MAX_U64 } else { v - 1 };
        let ts = delta.saturating_add(self.last_timestamp_in);
        self.last_timestamp_in = ts;
        Ok(ts)
    }

    fn decode_bound(&mut self, buf: &mut &[u8]) -> Result<Bound, EngineError> {
        let timestamp = self.decode_timestamp_in(buf)?;
        let id_len = decode_varint(buf)? as usize;
        if id_len > ID_SIZE {
            return Err(EngineError::Item(ItemError::BoundKeyTooLong));
        }
        let id_prefix = take_bytes(buf, id_len)?;
        Ok(Bound::new(timestamp, id_prefix)?)
    }

    fn encode_timestamp_out(&mut self, timestamp: u64) -> Vec<u8> {
        if timestamp == MAX_U64 {
            self.last_timestamp_out = MAX_U64;
            return encode_varint(0);
        }

        let delta = timestamp.saturating_sub(self.last_timestamp_out);
        self.last_timestamp_out = timestamp;
        encode_varint(delta.saturating_add(1))
    }

    fn encode_bound(&mut self, bound: &Bound) -> Vec<u8> {
        let mut out = self.encode_timestamp_out(bound.timestamp);
        out.extend(encode_varint(bound.id_len() as u64));
        out.extend_from_slice(bound.id_prefix());
        out
    }
}
