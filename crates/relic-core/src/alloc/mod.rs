//! Optimized allocation and collection types for Relic.
//!
//! This module provides:
//! - Re-exports of optimized hash collections using AHash
//! - [`StrKeyedMap`], a string-keyed map that looks keys up by `&str` slices
//!   without allocating

pub mod str_map;

// Re-export optimized hash collections
pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};
pub use str_map::{StrKeyedMap, StrMapError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_ahash() {
        let mut map = HashMap::new();
        map.insert("key", "value");
        assert_eq!(map.get("key"), Some(&"value"));
    }

    #[test]
    fn test_hashset_ahash() {
        let mut set = HashSet::new();
        set.insert(42);
        assert!(set.contains(&42));
    }
}
