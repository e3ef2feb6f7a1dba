//! Name Interning Pool
//!
//! Deduplicated storage for the names that repeat across a form:
//! element and attribute local names, prefixes and namespace URIs.
//!
//! Character data (text, attribute values) is not interned because it
//! changes on every recalculate pass and would only grow the pool.
//!
//! Id 0 is reserved for the empty string, so `0` doubles as "no prefix"
//! and "no namespace".

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Interned name identifier
pub type NameId = u32;

/// Location of an interned string inside the pool buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    offset: u32,
    len: u32,
}

/// Append-only interning pool
///
/// Memory layout:
/// - `entries`: location of each interned string by id
/// - `data`: one contiguous UTF-8 buffer holding every string
/// - `hash_index`: hash -> ids with that hash (collisions are rare)
#[derive(Debug, Clone)]
pub struct StringPool {
    entries: Vec<Entry>,
    data: String,
    hash_index: HashMap<u64, Vec<NameId>>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    /// Create a pool holding only the reserved empty entry
    pub fn new() -> Self {
        let mut pool = StringPool {
            entries: Vec::with_capacity(128),
            data: String::with_capacity(2048),
            hash_index: HashMap::new(),
        };
        pool.entries.push(Entry { offset: 0, len: 0 });
        pool
    }

    #[inline]
    fn compute_hash(s: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Intern a string, returning the existing id when already present
    pub fn intern(&mut self, s: &str) -> NameId {
        if s.is_empty() {
            return 0;
        }

        let hash = Self::compute_hash(s);
        if let Some(ids) = self.hash_index.get(&hash) {
            for &id in ids {
                if self.get(id) == Some(s) {
                    return id;
                }
            }
        }

        let offset = self.data.len() as u32;
        self.data.push_str(s);
        let id = self.entries.len() as NameId;
        self.entries.push(Entry {
            offset,
            len: s.len() as u32,
        });
        self.hash_index.entry(hash).or_default().push(id);
        id
    }

    /// Find the id of an already interned string without inserting it
    pub fn lookup(&self, s: &str) -> Option<NameId> {
        if s.is_empty() {
            return Some(0);
        }
        let ids = self.hash_index.get(&Self::compute_hash(s))?;
        ids.iter().copied().find(|&id| self.get(id) == Some(s))
    }

    /// Resolve an id back to its string
    pub fn get(&self, id: NameId) -> Option<&str> {
        let entry = self.entries.get(id as usize)?;
        let start = entry.offset as usize;
        self.data.get(start..start + entry.len as usize)
    }

    /// Resolve an id, mapping unknown ids to the empty string
    #[inline]
    pub fn get_or_empty(&self, id: NameId) -> &str {
        self.get(id).unwrap_or("")
    }

    /// Number of interned strings, including the reserved empty entry
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing beyond the reserved entry is stored
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_get() {
        let mut pool = StringPool::new();
        let id = pool.intern("instance");
        assert!(id > 0);
        assert_eq!(pool.get(id), Some("instance"));
    }

    #[test]
    fn test_intern_duplicate() {
        let mut pool = StringPool::new();
        let a = pool.intern("bind");
        let b = pool.intern("bind");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_empty_string_is_reserved() {
        let mut pool = StringPool::new();
        assert_eq!(pool.intern(""), 0);
        assert_eq!(pool.get(0), Some(""));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_lookup_does_not_insert() {
        let mut pool = StringPool::new();
        assert_eq!(pool.lookup("model"), None);
        let id = pool.intern("model");
        assert_eq!(pool.lookup("model"), Some(id));
        assert_eq!(pool.len(), 2);
    }
}
