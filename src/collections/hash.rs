//! Chained hash table with a resumable external cursor.
//!
//! Keys choose their own bucket through [`BucketKey::choose`] and are compared
//! with `Eq`, so the table never hashes through `std::hash`. Each bucket is a
//! chain kept in insertion order.
//!
//! # Iteration under mutation
//!
//! [`HashTable::next`] hands out an owned [`Cursor`] naming the bucket, the
//! slot and the key it just visited. The caller is free to mutate or remove
//! that entry before asking for the next one. On resume the table looks the
//! remembered key up in its bucket again:
//!
//! - still present: continue right after it;
//! - gone: removal from a chain shifts the following entries down by one
//!   without reordering them, so the successor now sits in the remembered
//!   slot and iteration continues there.
//!
//! Every other live entry is therefore visited exactly once and removed
//! entries are never handed out. Resizing while a cursor is outstanding
//! invalidates it.

use std::net::Ipv4Addr;

/// Keys usable in a [`HashTable`].
pub trait BucketKey: Eq + Clone {
    /// Bucket index for this key in a table of `size` buckets.
    ///
    /// Must return a value below `size` and must be stable for a given size.
    fn choose(&self, size: usize) -> usize;
}

impl BucketKey for Ipv4Addr {
    fn choose(&self, size: usize) -> usize {
        // Jenkins one-at-a-time over the address bytes in network order.
        let mut hash: u32 = 0;
        for byte in self.octets() {
            hash = hash.wrapping_add(byte as u32);
            hash = hash.wrapping_add(hash << 10);
            hash ^= hash >> 6;
        }
        hash = hash.wrapping_add(hash << 3);
        hash ^= hash >> 11;
        hash = hash.wrapping_add(hash << 15);
        hash as usize % size
    }
}

/// Returned by [`HashTable::insert`] when the key is already present.
///
/// Hands the rejected pair back to the caller.
#[derive(Debug)]
pub struct Duplicate<K, V> {
    /// Rejected key
    pub key: K,
    /// Rejected value
    pub value: V,
}

/// Resume point for [`HashTable::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor<K> {
    bucket: usize,
    slot: usize,
    key: K,
}

impl<K> Cursor<K> {
    /// Key of the entry this cursor visited.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Bucket the visited entry lived in.
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// Load factor (elements per bucket) above which [`HashTable::grow_if_needed`]
/// doubles the bucket count.
pub const MAX_LOAD_FACTOR: usize = 4;

/// Hash table keyed by [`BucketKey`].
#[derive(Debug, Clone)]
pub struct HashTable<K, V> {
    buckets: Vec<Vec<Entry<K, V>>>,
    elements: usize,
}

impl<K: BucketKey, V> HashTable<K, V> {
    /// Create a table with `size` buckets (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Self {
            buckets,
            elements: 0,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.elements
    }

    /// True when the table holds nothing.
    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Number of buckets.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, key: &K) -> usize {
        let index = key.choose(self.buckets.len());
        assert!(
            index < self.buckets.len(),
            "choose() returned bucket {} for a table of {}",
            index,
            self.buckets.len()
        );
        index
    }

    /// Insert a new entry. Rejects keys that are already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), Duplicate<K, V>> {
        let index = self.bucket_of(&key);
        let chain = &mut self.buckets[index];
        if chain.iter().any(|entry| entry.key == key) {
            return Err(Duplicate { key, value });
        }
        chain.push(Entry { key, value });
        self.elements += 1;
        Ok(())
    }

    /// Look an entry up.
    pub fn find(&self, key: &K) -> Option<&V> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter()
            .find(|entry| entry.key == *key)
            .map(|entry| &entry.value)
    }

    /// Look an entry up for modification.
    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter_mut()
            .find(|entry| entry.key == *key)
            .map(|entry| &mut entry.value)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Remove an entry by key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.bucket_of(key);
        let chain = &mut self.buckets[index];
        let slot = chain.iter().position(|entry| entry.key == *key)?;
        self.elements -= 1;
        // Vec::remove keeps the order of the remaining chain entries, which
        // is what lets an outstanding cursor resume at the same slot.
        Some(chain.remove(slot).value)
    }

    /// Remove the entry a cursor just visited, if it is still present.
    pub fn remove_at(&mut self, cursor: &Cursor<K>) -> Option<V> {
        let chain = self.buckets.get_mut(cursor.bucket)?;
        let slot = Self::locate(chain, cursor)?;
        self.elements -= 1;
        Some(chain.remove(slot).value)
    }

    /// Value of the entry a cursor visited.
    pub fn get_at(&self, cursor: &Cursor<K>) -> Option<&V> {
        let chain = self.buckets.get(cursor.bucket)?;
        let slot = Self::locate(chain, cursor)?;
        Some(&chain[slot].value)
    }

    /// Mutable value of the entry a cursor visited.
    pub fn get_at_mut(&mut self, cursor: &Cursor<K>) -> Option<&mut V> {
        let chain = self.buckets.get_mut(cursor.bucket)?;
        let slot = Self::locate(chain, cursor)?;
        Some(&mut chain[slot].value)
    }

    fn locate(chain: &[Entry<K, V>], cursor: &Cursor<K>) -> Option<usize> {
        if chain
            .get(cursor.slot)
            .is_some_and(|entry| entry.key == cursor.key)
        {
            return Some(cursor.slot);
        }
        chain.iter().position(|entry| entry.key == cursor.key)
    }

    /// Advance an external iteration.
    ///
    /// Pass `None` to start, then the previously returned cursor. Between two
    /// calls the caller may remove the entry named by the previous cursor and
    /// nothing else; removing other entries can make the iteration skip one.
    pub fn next(&self, prev: Option<&Cursor<K>>) -> Option<Cursor<K>> {
        let (mut bucket, mut slot) = match prev {
            None => (0, 0),
            Some(cursor) => {
                let chain = self.buckets.get(cursor.bucket)?;
                match Self::locate(chain, cursor) {
                    Some(found) => (cursor.bucket, found + 1),
                    // Removed: the successor shifted into its slot.
                    None => (cursor.bucket, cursor.slot),
                }
            }
        };

        while bucket < self.buckets.len() {
            if let Some(entry) = self.buckets[bucket].get(slot) {
                return Some(Cursor {
                    bucket,
                    slot,
                    key: entry.key.clone(),
                });
            }
            bucket += 1;
            slot = 0;
        }
        None
    }

    /// Rebuild the table with `new_size` buckets, keeping every entry.
    pub fn resize(&mut self, new_size: usize) {
        let old = std::mem::replace(self, Self::new(new_size));
        for entry in old.buckets.into_iter().flatten() {
            if self.insert(entry.key, entry.value).is_err() {
                panic!("duplicate key while resizing hash table: entries were not unique");
            }
        }
    }

    /// Double the bucket count when the load factor exceeds
    /// [`MAX_LOAD_FACTOR`]. Returns whether a resize happened.
    pub fn grow_if_needed(&mut self) -> bool {
        if self.elements > self.buckets.len() * MAX_LOAD_FACTOR {
            let new_size = self.buckets.len() * 2;
            tracing::debug!(
                elements = self.elements,
                old_size = self.buckets.len(),
                new_size,
                "resizing hash table"
            );
            self.resize(new_size);
            true
        } else {
            false
        }
    }

    /// Borrowing iterator over all entries, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.buckets
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Borrowing iterator over all values.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.buckets.iter().flatten().map(|entry| &entry.value)
    }

    /// Mutable iterator over all values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.buckets
            .iter_mut()
            .flatten()
            .map(|entry| &mut entry.value)
    }

    /// Drop every entry, keeping the bucket count.
    pub fn clear(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
        }
        self.elements = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, BTreeSet};

    /// Key that lands every value in bucket `value % size`; makes collisions
    /// easy to arrange.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Modulo(u32);

    impl BucketKey for Modulo {
        fn choose(&self, size: usize) -> usize {
            self.0 as usize % size
        }
    }

    fn collect_by_cursor<K: BucketKey, V>(table: &HashTable<K, V>) -> Vec<K> {
        let mut keys = Vec::new();
        let mut cursor = None;
        while let Some(next) = table.next(cursor.as_ref()) {
            keys.push(next.key().clone());
            cursor = Some(next);
        }
        keys
    }

    #[test]
    fn test_insert_find_remove() {
        let mut table = HashTable::new(8);
        let addr = Ipv4Addr::new(192, 168, 1, 1);

        assert!(table.insert(addr, "a").is_ok());
        assert_eq!(table.find(&addr), Some(&"a"));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(&addr), Some("a"));
        assert_eq!(table.find(&addr), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut table = HashTable::new(4);
        table.insert(Modulo(3), 1).unwrap();
        let err = table.insert(Modulo(3), 2).unwrap_err();

        assert_eq!(err.key, Modulo(3));
        assert_eq!(err.value, 2);
        assert_eq!(table.find(&Modulo(3)), Some(&1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_random_operations_match_model() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut table = HashTable::new(16);
        let mut model = BTreeMap::new();

        for step in 0..5000u32 {
            let key = Modulo(rng.gen_range(0..300));
            if rng.gen_bool(0.6) {
                let inserted = table.insert(key, step).is_ok();
                assert_eq!(inserted, !model.contains_key(&key));
                model.entry(key).or_insert(step);
            } else {
                assert_eq!(table.remove(&key), model.remove(&key));
                assert_eq!(table.find(&key), None);
            }
            assert_eq!(table.len(), model.len());
            if let Some((k, v)) = model.iter().next() {
                assert_eq!(table.find(k), Some(v));
            }
        }
    }

    #[test]
    fn test_cursor_visits_everything_once() {
        let mut table = HashTable::new(4);
        for i in 0..20 {
            table.insert(Modulo(i), i).unwrap();
        }

        let mut keys = collect_by_cursor(&table);
        keys.sort();
        assert_eq!(keys, (0..20).map(Modulo).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_head_during_iteration() {
        let mut table = HashTable::new(2);
        // All even keys chain in bucket 0, odd keys in bucket 1.
        for i in 0..10 {
            table.insert(Modulo(i), i).unwrap();
        }

        let mut visited = Vec::new();
        let mut cursor: Option<Cursor<Modulo>> = None;
        while let Some(next) = table.next(cursor.as_ref()) {
            let key = *next.key();
            visited.push(key);
            // Removing the visited entry makes it the chain head's successor
            // that must be visited next.
            if key.0 % 3 == 0 {
                assert_eq!(table.remove_at(&next), Some(key.0));
            }
            cursor = Some(next);
        }

        visited.sort();
        assert_eq!(visited, (0..10).map(Modulo).collect::<Vec<_>>());

        let remaining: BTreeSet<_> = table.iter().map(|(k, _)| *k).collect();
        let expected: BTreeSet<_> = (0..10).filter(|i| i % 3 != 0).map(Modulo).collect();
        assert_eq!(remaining, expected);
        assert_eq!(table.len(), expected.len());
    }

    #[test]
    fn test_remove_every_entry_during_iteration() {
        let mut table = HashTable::new(3);
        for i in 0..30 {
            table.insert(Modulo(i), ()).unwrap();
        }

        let mut count = 0;
        let mut cursor: Option<Cursor<Modulo>> = None;
        while let Some(next) = table.next(cursor.as_ref()) {
            table.remove(next.key()).unwrap();
            count += 1;
            cursor = Some(next);
        }

        assert_eq!(count, 30);
        assert!(table.is_empty());
    }

    #[test]
    fn test_cursor_survives_removal_of_earlier_entry() {
        let mut table = HashTable::new(1);
        for i in 0..5 {
            table.insert(Modulo(i), ()).unwrap();
        }

        let first = table.next(None).unwrap();
        let second = table.next(Some(&first)).unwrap();
        assert_eq!(*second.key(), Modulo(1));

        // Remove an entry that was already visited, then resume.
        table.remove(&Modulo(0));
        let third = table.next(Some(&second)).unwrap();
        assert_eq!(*third.key(), Modulo(2));
    }

    #[test]
    fn test_get_at_mut() {
        let mut table = HashTable::new(4);
        table.insert(Modulo(1), 10).unwrap();
        let cursor = table.next(None).unwrap();

        *table.get_at_mut(&cursor).unwrap() += 5;
        assert_eq!(table.get_at(&cursor), Some(&15));
    }

    #[test]
    fn test_resize_preserves_entries() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut table = HashTable::new(4);
        let mut keys = BTreeSet::new();
        while keys.len() < 200 {
            let addr = Ipv4Addr::from(rng.gen::<u32>());
            if keys.insert(addr) {
                table.insert(addr, u32::from(addr)).unwrap();
            }
        }

        table.resize(64);

        assert_eq!(table.size(), 64);
        assert_eq!(table.len(), 200);
        for key in &keys {
            assert_eq!(table.find(key), Some(&u32::from(*key)));
        }
        let iterated: BTreeSet<_> = collect_by_cursor(&table).into_iter().collect();
        assert_eq!(iterated, keys);
    }

    #[test]
    fn test_grow_if_needed_doubles_above_load_factor() {
        let mut table = HashTable::new(2);
        for i in 0..8 {
            table.insert(Modulo(i), ()).unwrap();
        }
        assert!(!table.grow_if_needed());
        assert_eq!(table.size(), 2);

        table.insert(Modulo(8), ()).unwrap();
        assert!(table.grow_if_needed());
        assert_eq!(table.size(), 4);
        assert_eq!(table.len(), 9);
    }

    #[test]
    fn test_ipv4_choose_in_range() {
        for size in [1, 2, 3, 128, 1000] {
            for last in 0..=255u8 {
                let addr = Ipv4Addr::new(10, 0, 1, last);
                assert!(addr.choose(size) < size);
            }
        }
    }
}
