//! Deduplicated string pool for the trailing section of encoded files.

use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use aeptools_common::BinaryWriter;

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Null-terminated strings in first-occurrence order, each stored once.
#[derive(Debug, Default)]
pub struct StringPool {
    data: Vec<u8>,
    offsets: FxHashMap<String, u64>,
    count: usize,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string and return its offset relative to the start of the pool.
    pub fn intern(&mut self, s: &str) -> u64 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }

        let offset = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_string(), offset);
        self.count += 1;
        offset
    }

    /// Pool-relative offset of an interned string.
    pub fn get(&self, s: &str) -> Option<u64> {
        self.offsets.get(s).copied()
    }

    /// Number of distinct strings.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of the pool in bytes, terminators included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append the pool to the writer.
    pub fn write(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedups_in_first_occurrence_order() {
        let mut pool = StringPool::new();
        assert_eq!(pool.intern("layer"), 0);
        assert_eq!(pool.intern("comp"), 6);
        assert_eq!(pool.intern("layer"), 0);
        assert_eq!(pool.intern(""), 11);

        assert_eq!(pool.count(), 3);
        assert_eq!(pool.len(), 12);
        assert_eq!(pool.get("comp"), Some(6));
        assert_eq!(pool.get("missing"), None);

        let mut writer = BinaryWriter::new();
        pool.write(&mut writer);
        assert_eq!(writer.as_bytes(), b"layer\0comp\0\0");
    }
}
