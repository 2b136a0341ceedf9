//! A hash map keyed by shared strings and queried by string slices.
//!
//! [`StrKeyedMap`] stores its keys as `Arc<str>` and accepts any `&str` for
//! lookups, including slices borrowed out of a larger buffer. Both forms run
//! through the same hash function, so looking up a slice never allocates and
//! always agrees with looking up the owned key. [`StrKeyedMap::find_key`] hands
//! back the stored `Arc<str>` for a slice, which lets callers capture a
//! canonical key in a closure without building a new `String`.
//!
//! Layout: a prime-sized bucket array of 1-based entry indices chained through
//! an entry array; removed entries are threaded onto a free list and reused
//! before the entry array grows.

use std::fmt;
use std::hash::BuildHasher;
use std::mem;
use std::ops::Index;
use std::sync::{Arc, OnceLock};

use crate::profiling::profile_function;

/// Errors reported by the fallible [`StrKeyedMap`] accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrMapError {
    /// No entry exists for the key.
    #[error("The given key '{0}' was not present in the map.")]
    NotFound(String),
    /// An entry already exists for the key.
    #[error("An item with the same key has already been added. Key: {0}")]
    DuplicateKey(String),
}

/// Chain length after which the map switches to a randomized hash.
pub const HASH_COLLISION_THRESHOLD: usize = 100;

const START_OF_FREE_LIST: i32 = -3;
const HASH_PRIME: usize = 101;
const MAX_PRIME_ARRAY_LENGTH: usize = 0x7FFF_FFC3;

const PRIMES: &[usize] = &[
    3, 7, 11, 17, 23, 29, 37, 47, 59, 71, 89, 107, 131, 163, 197, 239, 293, 353, 431, 521, 631,
    761, 919, 1103, 1327, 1597, 1931, 2333, 2801, 3371, 4049, 4861, 5839, 7013, 8419, 10103, 12143,
    14591, 17519, 21023, 25229, 30293, 36353, 43627, 52361, 62851, 75431, 90523, 108631, 130363,
    156437, 187751, 225307, 270371, 324449, 389357, 467237, 560689, 672827, 807403, 968897,
    1162687, 1395263, 1674319, 2009191, 2411033, 2893249, 3471899, 4166287, 4999559, 5999471,
    7199369,
];

fn is_prime(candidate: usize) -> bool {
    if candidate & 1 == 0 {
        return candidate == 2;
    }
    let limit = (candidate as f64).sqrt() as usize;
    (3..=limit).step_by(2).all(|divisor| candidate % divisor != 0)
}

/// Smallest table size `>= min`.
fn get_prime(min: usize) -> usize {
    if let Some(&prime) = PRIMES.iter().find(|&&p| p >= min) {
        return prime;
    }
    (min | 1..MAX_PRIME_ARRAY_LENGTH)
        .step_by(2)
        .find(|&i| is_prime(i) && (i - 1) % HASH_PRIME != 0)
        .unwrap_or(min)
}

/// Table size to grow to from `old_size`, roughly doubling.
fn expand_prime(old_size: usize) -> usize {
    let new_size = old_size.saturating_mul(2);
    if new_size > MAX_PRIME_ARRAY_LENGTH && MAX_PRIME_ARRAY_LENGTH > old_size {
        return MAX_PRIME_ARRAY_LENGTH;
    }
    get_prime(new_size)
}

#[inline]
fn mix(hash: u32, word: u32) -> u32 {
    (hash.rotate_left(5).wrapping_add(hash)) ^ word
}

#[inline]
fn read_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Two-lane djb-style hash over the UTF-8 bytes of `key`.
///
/// Deterministic across runs and processes.
pub fn stable_hash(key: &str) -> u32 {
    let mut hash1: u32 = (5381 << 16) + 5381;
    let mut hash2 = hash1;

    let mut chunks = key.as_bytes().chunks_exact(8);
    for chunk in &mut chunks {
        hash1 = mix(hash1, read_word(&chunk[..4]));
        hash2 = mix(hash2, read_word(&chunk[4..]));
    }

    let mut rest = chunks.remainder();
    if rest.len() >= 4 {
        hash1 = mix(hash1, read_word(rest));
        rest = &rest[4..];
    }
    if !rest.is_empty() {
        let mut tail = [0u8; 4];
        tail[..rest.len()].copy_from_slice(rest);
        hash2 = mix(hash2, u32::from_le_bytes(tail));
    }

    hash1.wrapping_add(hash2.wrapping_mul(1_566_083_941))
}

fn randomized_hash(key: &str) -> u32 {
    static STATE: OnceLock<ahash::RandomState> = OnceLock::new();
    BuildHasher::hash_one(STATE.get_or_init(ahash::RandomState::new), key) as u32
}

#[derive(Clone)]
struct Entry<V> {
    hash: u32,
    /// Next entry in the chain (`-1` ends it). Free entries store
    /// `START_OF_FREE_LIST - next_free` instead.
    next: i32,
    slot: Option<(Arc<str>, V)>,
}

impl<V> Entry<V> {
    #[inline]
    fn matches(&self, hash: u32, key: &str) -> bool {
        self.hash == hash && matches!(&self.slot, Some((k, _)) if &**k == key)
    }
}

/// A map from `Arc<str>` keys to values, queried by `&str`.
///
/// The map is not internally synchronized.
#[derive(Clone)]
pub struct StrKeyedMap<V> {
    /// 1-based indices into `entries`; `0` marks an empty bucket.
    buckets: Vec<i32>,
    entries: Vec<Entry<V>>,
    free_list: i32,
    free_count: usize,
    randomized: bool,
}

impl<V> Default for StrKeyedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> StrKeyedMap<V> {
    /// Creates an empty map. No memory is allocated until the first insert.
    pub const fn new() -> Self {
        Self {
            buckets: Vec::new(),
            entries: Vec::new(),
            free_list: -1,
            free_count: 0,
            randomized: false,
        }
    }

    /// Creates an empty map able to hold at least `capacity` entries without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        if capacity > 0 {
            map.initialize(capacity);
        }
        map
    }

    fn initialize(&mut self, capacity: usize) -> usize {
        let size = get_prime(capacity);
        self.buckets = vec![0; size];
        self.entries = Vec::with_capacity(size);
        self.free_list = -1;
        self.free_count = 0;
        size
    }

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries the map can hold before it has to grow.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the map has switched to its randomized hash.
    pub fn is_randomized(&self) -> bool {
        self.randomized
    }

    #[inline]
    fn hash(&self, key: &str) -> u32 {
        if self.randomized {
            randomized_hash(key)
        } else {
            stable_hash(key)
        }
    }

    #[inline]
    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    fn find_entry(&self, key: &str) -> Option<usize> {
        profile_function!();
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash(key);
        let mut i = self.buckets[self.bucket_of(hash)] - 1;
        while i >= 0 {
            let entry = &self.entries[i as usize];
            if entry.matches(hash, key) {
                return Some(i as usize);
            }
            i = entry.next;
        }
        None
    }

    /// Returns a reference to the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        let index = self.find_entry(key)?;
        self.entries[index].slot.as_ref().map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let index = self.find_entry(key)?;
        self.entries[index].slot.as_mut().map(|(_, v)| v)
    }

    /// Like [`get`](Self::get), but reports a missing key as [`StrMapError::NotFound`].
    pub fn try_get(&self, key: &str) -> Result<&V, StrMapError> {
        self.get(key).ok_or_else(|| StrMapError::NotFound(key.to_owned()))
    }

    /// Returns the stored key and value for `key`.
    pub fn get_key_value(&self, key: &str) -> Option<(&Arc<str>, &V)> {
        let index = self.find_entry(key)?;
        self.entries[index].slot.as_ref().map(|(k, v)| (k, v))
    }

    /// Returns the stored key equal to `key`.
    ///
    /// Cloning the returned `Arc<str>` shares the map's allocation.
    pub fn find_key(&self, key: &str) -> Option<&Arc<str>> {
        self.get_key_value(key).map(|(k, _)| k)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find_entry(key).is_some()
    }

    /// Inserts `value` for `key`, returning the previous value if one existed.
    ///
    /// `key` is only converted to an `Arc<str>` when a new entry is created.
    pub fn insert<K>(&mut self, key: K, value: V) -> Option<V>
    where
        K: AsRef<str> + Into<Arc<str>>,
    {
        match self.try_insert(key, value, true) {
            Ok(previous) => previous,
            Err(_) => None,
        }
    }

    /// Inserts a new entry, failing with [`StrMapError::DuplicateKey`] if `key` is present.
    pub fn add<K>(&mut self, key: K, value: V) -> Result<(), StrMapError>
    where
        K: AsRef<str> + Into<Arc<str>>,
    {
        self.try_insert(key, value, false)
            .map(|_| ())
            .map_err(|(key, _)| StrMapError::DuplicateKey(key.as_ref().to_owned()))
    }

    /// Inserts a new entry unless `key` is present. Returns whether it was inserted.
    pub fn try_add<K>(&mut self, key: K, value: V) -> bool
    where
        K: AsRef<str> + Into<Arc<str>>,
    {
        self.try_insert(key, value, false).is_ok()
    }

    fn try_insert<K>(&mut self, key: K, value: V, overwrite: bool) -> Result<Option<V>, (K, V)>
    where
        K: AsRef<str> + Into<Arc<str>>,
    {
        profile_function!();
        if self.buckets.is_empty() {
            self.initialize(0);
        }

        let hash = self.hash(key.as_ref());
        let mut bucket = self.bucket_of(hash);
        let mut collisions = 0;
        let mut i = self.buckets[bucket] - 1;
        while i >= 0 {
            let entry = &mut self.entries[i as usize];
            if entry.matches(hash, key.as_ref()) {
                if !overwrite {
                    return Err((key, value));
                }
                return Ok(entry.slot.as_mut().map(|(_, v)| mem::replace(v, value)));
            }
            i = entry.next;
            collisions += 1;
        }

        let free = if self.free_count > 0 {
            let index = self.free_list as usize;
            self.free_list = START_OF_FREE_LIST - self.entries[index].next;
            self.free_count -= 1;
            Some(index)
        } else {
            if self.entries.len() == self.buckets.len() {
                self.resize(expand_prime(self.entries.len()), false);
                bucket = self.bucket_of(hash);
            }
            None
        };

        let entry = Entry {
            hash,
            next: self.buckets[bucket] - 1,
            slot: Some((key.into(), value)),
        };
        let index = match free {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.buckets[bucket] = index as i32 + 1;

        if collisions > HASH_COLLISION_THRESHOLD && !self.randomized {
            self.switch_to_randomized();
        }
        Ok(None)
    }

    fn switch_to_randomized(&mut self) {
        tracing::debug!(
            "String map exceeded {} collisions, switching to randomized hashing",
            HASH_COLLISION_THRESHOLD
        );
        self.randomized = true;
        self.resize(self.buckets.len(), true);
    }

    fn resize(&mut self, new_size: usize, rehash: bool) {
        profile_function!();
        let mut buckets = vec![0i32; new_size];
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let Some((key, _)) = &entry.slot else {
                continue;
            };
            if rehash {
                entry.hash = randomized_hash(key);
            }
            let bucket = entry.hash as usize % new_size;
            entry.next = buckets[bucket] - 1;
            buckets[bucket] = index as i32 + 1;
        }
        self.buckets = buckets;
        self.entries.reserve_exact(new_size.saturating_sub(self.entries.len()));
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key`, returning the stored key and its value.
    pub fn remove_entry(&mut self, key: &str) -> Option<(Arc<str>, V)> {
        profile_function!();
        if self.buckets.is_empty() {
            return None;
        }
        let hash = self.hash(key);
        let bucket = self.bucket_of(hash);
        let mut last = -1;
        let mut i = self.buckets[bucket] - 1;
        while i >= 0 {
            let index = i as usize;
            let next = self.entries[index].next;
            if self.entries[index].matches(hash, key) {
                if last < 0 {
                    self.buckets[bucket] = next + 1;
                } else {
                    self.entries[last as usize].next = next;
                }
                let entry = &mut self.entries[index];
                entry.next = START_OF_FREE_LIST - self.free_list;
                let slot = entry.slot.take();
                self.free_list = i;
                self.free_count += 1;
                return slot;
            }
            last = i;
            i = next;
        }
        None
    }

    /// Removes every entry, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.buckets.fill(0);
        self.entries.clear();
        self.free_list = -1;
        self.free_count = 0;
    }

    /// Grows the map so it holds at least `capacity` entries. Returns the new capacity.
    pub fn ensure_capacity(&mut self, capacity: usize) -> usize {
        let current = self.capacity();
        if current >= capacity {
            return current;
        }
        if self.buckets.is_empty() {
            return self.initialize(capacity);
        }
        let new_size = get_prime(capacity);
        self.resize(new_size, false);
        new_size
    }

    /// Shrinks the map to the smallest prime size that fits its entries, compacting
    /// out removed slots.
    pub fn shrink_to_fit(&mut self) {
        let new_size = get_prime(self.len());
        if new_size >= self.capacity() && self.free_count == 0 {
            return;
        }
        let old = mem::take(&mut self.entries);
        self.initialize(new_size);
        for entry in old {
            let Some(slot) = entry.slot else {
                continue;
            };
            let bucket = self.bucket_of(entry.hash);
            self.entries.push(Entry {
                hash: entry.hash,
                next: self.buckets[bucket] - 1,
                slot: Some(slot),
            });
            self.buckets[bucket] = self.entries.len() as i32;
        }
    }

    /// Iterates over entries in slot order. Slots freed by `remove` are reused, so
    /// this is insertion order only for maps that never had an entry removed.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

/// Iterator over the entries of a [`StrKeyedMap`].
pub struct Iter<'a, V> {
    inner: std::slice::Iter<'a, Entry<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Arc<str>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find_map(|entry| entry.slot.as_ref().map(|(k, v)| (k, v)))
    }
}

impl<'a, V> IntoIterator for &'a StrKeyedMap<V> {
    type Item = (&'a Arc<str>, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V> Index<&str> for StrKeyedMap<V> {
    type Output = V;

    fn index(&self, key: &str) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("{}", StrMapError::NotFound(key.to_owned())),
        }
    }
}

impl<K, V> Extend<(K, V)> for StrKeyedMap<V>
where
    K: AsRef<str> + Into<Arc<str>>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for StrKeyedMap<V>
where
    K: AsRef<str> + Into<Arc<str>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity(iter.size_hint().0);
        map.extend(iter);
        map
    }
}

impl<V: fmt::Debug> fmt::Debug for StrKeyedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

static_assertions::assert_impl_all!(StrKeyedMap<u32>: Send, Sync);
