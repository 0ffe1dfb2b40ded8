//! Sorted, sealed item sequence backing a reconciliation round (§4.D).

use crate::accumulator::{Accumulator, FINGERPRINT_SIZE};
use crate::error::StorageError;
use crate::item::{Bound, Item};

/// An ordered set of `(timestamp, id)` items with two lifecycle phases: an
/// `Open` phase that accepts unordered inserts, and a `Sealed` phase that
/// enables the binary-search/fingerprint operations the engine needs.
#[derive(Debug, Clone, Default)]
pub struct Storage {
    items: Vec<Item>,
    sealed: bool,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            sealed: false,
        }
    }

    /// Append an item. O(1). Fails if the storage has already been sealed.
    pub fn insert(&mut self, item: Item) -> Result<(), StorageError> {
        if self.sealed {
            return Err(StorageError::AlreadySealed);
        }
        self.items.push(item);
        Ok(())
    }

    /// Sort and reject duplicates. O(n log n). Fails if already sealed, or
    /// if sorting reveals two equal adjacent items.
    pub fn seal(&mut self) -> Result<(), StorageError> {
        if self.sealed {
            return Err(StorageError::AlreadySealed);
        }

        self.items.sort();

        if let Some(dup) = self.items.windows(2).find(|pair| pair[0] == pair[1]) {
            let item = dup[0];
            return Err(StorageError::DuplicateItem(
                item.timestamp,
                item.id.to_hex(),
            ));
        }

        self.sealed = true;
        Ok(())
    }

    /// Return the storage to the open phase, allowing further inserts.
    pub fn unseal(&mut self) {
        self.sealed = false;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of items. Requires the storage to be sealed.
    pub fn size(&self) -> Result<usize, StorageError> {
        self.check_sealed()?;
        Ok(self.items.len())
    }

    pub fn get(&self, index: usize) -> Result<Option<Item>, StorageError> {
        self.check_sealed()?;
        Ok(self.items.get(index).copied())
    }

    /// Visit items in `[begin, end)` in order. `cb` returns whether to keep
    /// iterating; returning `false` stops early without error.
    pub fn iterate(
        &self,
        begin: usize,
        end: usize,
        mut cb: impl FnMut(Item, usize) -> bool,
    ) -> Result<(), StorageError> {
        self.check_sealed()?;
        self.check_range(begin, end)?;

        for i in begin..end {
            if !cb(self.items[i], i) {
                break;
            }
        }
        Ok(())
    }

    /// Binary search for the smallest index `k` in `[first, last]` such
    /// that `k == last` or `items[k]` is not strictly less than `bound`.
    pub fn find_lower_bound(
        &self,
        first: usize,
        last: usize,
        bound: &Bound,
    ) -> Result<usize, StorageError> {
        self.check_sealed()?;
        self.check_range(first, last)?;

        let mut lo = first;
        let mut count = last - first;

        while count > 0 {
            let step = count / 2;
            let mid = lo + step;
            if bound.item_precedes(&self.items[mid]) {
                lo = mid + 1;
                count -= step + 1;
            } else {
                count = step;
            }
        }
        Ok(lo)
    }

    /// Fingerprint of the range `[begin, end)`: sum every id into a fresh
    /// accumulator and hash it with the range's cardinality.
    pub fn fingerprint(
        &self,
        begin: usize,
        end: usize,
    ) -> Result<[u8; FINGERPRINT_SIZE], StorageError> {
        let mut acc = Accumulator::new();
        self.iterate(begin, end, |item, _| {
            acc.add(item.id.as_bytes());
            true
        })?;
        Ok(acc.fingerprint((end - begin) as u64))
    }

    fn check_sealed(&self) -> Result<(), StorageError> {
        if !self.sealed {
            return Err(StorageError::NotSealed);
        }
        Ok(())
    }

    fn check_range(&self, begin: usize, end: usize) -> Result<(), StorageError> {
        if begin > end || end > self.items.len() {
            return Err(StorageError::OutOfRange {
                begin,
                end,
                size: self.items.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Id;

    fn item(ts: u64, byte: u8) -> Item {
        Item::new(ts, Id::new([byte; 32]))
    }

    #[test]
    fn insert_after_seal_fails() {
        let mut storage = Storage::new();
        storage.insert(item(1, 1)).unwrap();
        storage.seal().unwrap();
        assert_eq!(
            storage.insert(item(2, 2)).unwrap_err(),
            StorageError::AlreadySealed
        );
    }

    #[test]
    fn seal_twice_fails() {
        let mut storage = Storage::new();
        storage.seal().unwrap();
        assert_eq!(storage.seal().unwrap_err(), StorageError::AlreadySealed);
    }

    #[test]
    fn unsealed_queries_fail() {
        let storage = Storage::new();
        assert_eq!(storage.size().unwrap_err(), StorageError::NotSealed);
    }

    #[test]
    fn seal_sorts_and_rejects_duplicates() {
        let mut storage = Storage::new();
        storage.insert(item(5, 2)).unwrap();
        storage.insert(item(1, 1)).unwrap();
        storage.insert(item(1, 1)).unwrap();

        match storage.seal() {
            Err(StorageError::DuplicateItem(1, _)) => {}
            other => panic!("expected DuplicateItem, got {other:?}"),
        }
    }

    #[test]
    fn seal_orders_items() {
        let mut storage = Storage::new();
        storage.insert(item(5, 2)).unwrap();
        storage.insert(item(1, 1)).unwrap();
        storage.insert(item(3, 9)).unwrap();
        storage.seal().unwrap();

        let size = storage.size().unwrap();
        let mut collected = Vec::new();
        storage
            .iterate(0, size, |it, _| {
                collected.push(it);
                true
            })
            .unwrap();

        for pair in collected.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn unseal_allows_further_inserts() {
        let mut storage = Storage::new();
        storage.insert(item(1, 1)).unwrap();
        storage.seal().unwrap();
        storage.unseal();
        storage.insert(item(2, 2)).unwrap();
        storage.seal().unwrap();
        assert_eq!(storage.size().unwrap(), 2);
    }

    #[test]
    fn find_lower_bound_matches_linear_search() {
        let mut storage = Storage::new();
        for ts in [1, 3, 5, 7, 9] {
            storage.insert(item(ts, ts as u8)).unwrap();
        }
        storage.seal().unwrap();
        let size = storage.size().unwrap();

        for target_ts in 0..=10u64 {
            let bound = Bound::with_timestamp(target_ts);
            let expected = (0..size)
                .find(|&i| !bound.item_precedes(&storage.get(i).unwrap().unwrap()))
                .unwrap_or(size);
            let actual = storage.find_lower_bound(0, size, &bound).unwrap();
            assert_eq!(actual, expected, "mismatch at ts={target_ts}");
        }
    }

    #[test]
    fn fingerprint_independent_of_position() {
        let mut a = Storage::new();
        a.insert(item(1, 1)).unwrap();
        a.insert(item(2, 2)).unwrap();
        a.seal().unwrap();

        let mut b = Storage::new();
        b.insert(item(0, 9)).unwrap();
        b.insert(item(1, 1)).unwrap();
        b.insert(item(2, 2)).unwrap();
        b.seal().unwrap();

        assert_eq!(a.fingerprint(0, 2).unwrap(), b.fingerprint(1, 3).unwrap());
    }

    #[test]
    fn out_of_range_iterate_fails() {
        let mut storage = Storage::new();
        storage.insert(item(1, 1)).unwrap();
        storage.seal().unwrap();
        assert!(matches!(
            storage.iterate(0, 5, |_, _| true),
            Err(StorageError::OutOfRange { .. })
        ));
    }
}
