//! Pointer bookkeeping for both conversion directions.
//!
//! Decoding uses [`PointerResolver`] to validate raw pointers and to memoize
//! which node lives at which offset, so that two pointers to the same
//! structure become one node. Encoding uses [`PointerTable`] to remember the
//! offset assigned to each node and to back-patch pointer slots once every
//! offset is known.

use hashbrown::{HashMap as FastHashMap, HashSet as FastHashSet};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use aeptools_common::{BinaryWriter, PointerWidth};

use crate::document::NodeId;
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;
type FxHashSet<T> = FastHashSet<T, BuildHasherDefault<FxHasher>>;

/// Decode-side pointer resolution and offset memoization.
#[derive(Debug)]
pub struct PointerResolver {
    size: usize,
    nodes: FxHashMap<u64, (NodeId, String)>,
    next: u32,
}

impl PointerResolver {
    /// Create a resolver for a buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            nodes: FxHashMap::default(),
            next: 0,
        }
    }

    /// Validate a raw pointer read at offset `at`.
    ///
    /// Returns `None` for null, otherwise the target offset.
    pub fn resolve(&self, raw: u64, at: usize) -> Result<Option<u64>> {
        if raw == 0 {
            return Ok(None);
        }
        if raw >= self.size as u64 {
            return Err(Error::DanglingPointer {
                pointer: raw,
                at,
                size: self.size,
            });
        }
        Ok(Some(raw))
    }

    /// Node id for the structure of `kind` at `offset`.
    ///
    /// The flag is `true` the first time an offset is seen; the caller is
    /// then responsible for decoding it.
    pub fn lookup_or_insert(&mut self, offset: u64, kind: &str) -> Result<(NodeId, bool)> {
        if let Some((id, existing)) = self.nodes.get(&offset) {
            if existing != kind {
                return Err(Error::AliasKindMismatch {
                    offset,
                    first: existing.clone(),
                    second: kind.to_string(),
                });
            }
            return Ok((*id, false));
        }

        let id = NodeId(self.next);
        self.next += 1;
        self.nodes.insert(offset, (id, kind.to_string()));
        Ok((id, true))
    }

    /// Number of distinct structures seen so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Handle returned by [`PointerTable::reserve`], in reservation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub node: NodeId,
    pub order: usize,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    at: usize,
    target: NodeId,
}

/// Encode-side node offsets and pending pointer fixups.
#[derive(Debug, Default)]
pub struct PointerTable {
    offsets: FxHashMap<NodeId, Option<u64>>,
    reserved: usize,
    fixups: Vec<Fixup>,
}

impl PointerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a node. Each node is reserved once.
    pub fn reserve(&mut self, node: NodeId) -> Result<Placeholder> {
        if self.offsets.contains_key(&node) {
            return Err(Error::Layout(format!("node {} reserved twice", node)));
        }
        self.offsets.insert(node, None);
        let order = self.reserved;
        self.reserved += 1;
        Ok(Placeholder { node, order })
    }

    /// Record the final offset of a reserved node.
    pub fn commit(&mut self, node: NodeId, offset: u64) -> Result<()> {
        match self.offsets.get_mut(&node) {
            Some(slot @ None) => {
                *slot = Some(offset);
                Ok(())
            }
            Some(Some(_)) => Err(Error::Layout(format!("node {} committed twice", node))),
            None => Err(Error::Layout(format!("node {} committed without reservation", node))),
        }
    }

    /// Committed offset of a node.
    pub fn offset_of(&self, node: NodeId) -> Result<u64> {
        self.offsets
            .get(&node)
            .copied()
            .flatten()
            .ok_or_else(|| Error::Layout(format!("node {} has no committed offset", node)))
    }

    /// Register a pointer slot at `at` that must point to `target`.
    pub fn record_fixup(&mut self, at: usize, target: NodeId) {
        self.fixups.push(Fixup { at, target });
    }

    /// Number of pending fixups.
    pub fn fixup_count(&self) -> usize {
        self.fixups.len()
    }

    /// Write one pointer into an already written slot.
    pub fn backpatch(writer: &mut BinaryWriter, at: usize, offset: u64, width: PointerWidth) -> Result<()> {
        writer.patch_pointer(at, width, offset)?;
        Ok(())
    }

    /// Patch every recorded slot exactly once.
    pub fn apply_fixups(&self, writer: &mut BinaryWriter, width: PointerWidth) -> Result<()> {
        let mut patched: FxHashSet<usize> = FxHashSet::default();
        for fixup in &self.fixups {
            if !patched.insert(fixup.at) {
                return Err(Error::Layout(format!("pointer slot {:#x} patched twice", fixup.at)));
            }
            let offset = self.offset_of(fixup.target)?;
            Self::backpatch(writer, fixup.at, offset, width)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_null_and_dangling() {
        let resolver = PointerResolver::new(64);
        assert_eq!(resolver.resolve(0, 8).unwrap(), None);
        assert_eq!(resolver.resolve(63, 8).unwrap(), Some(63));
        assert!(matches!(
            resolver.resolve(64, 8),
            Err(Error::DanglingPointer { pointer: 64, at: 8, size: 64 })
        ));
    }

    #[test]
    fn test_memo_aliases_and_kind_mismatch() {
        let mut resolver = PointerResolver::new(128);
        let (a, fresh_a) = resolver.lookup_or_insert(32, "Layer").unwrap();
        let (b, fresh_b) = resolver.lookup_or_insert(64, "Layer").unwrap();
        let (again, fresh_again) = resolver.lookup_or_insert(32, "Layer").unwrap();

        assert!(fresh_a && fresh_b && !fresh_again);
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(matches!(
            resolver.lookup_or_insert(32, "Texture"),
            Err(Error::AliasKindMismatch { offset: 32, .. })
        ));
    }

    #[test]
    fn test_fixups_patch_once() {
        let mut table = PointerTable::new();
        let placeholder = table.reserve(NodeId(0)).unwrap();
        assert_eq!(placeholder.order, 0);
        table.commit(NodeId(0), 0x10).unwrap();

        let mut writer = BinaryWriter::new();
        writer.write_pointer(PointerWidth::X86, 0).unwrap();
        writer.write_pointer(PointerWidth::X86, 0).unwrap();
        table.record_fixup(0, NodeId(0));
        table.record_fixup(4, NodeId(0));
        table.apply_fixups(&mut writer, PointerWidth::X86).unwrap();

        assert_eq!(writer.as_bytes(), &[0x10, 0, 0, 0, 0x10, 0, 0, 0]);
    }

    #[test]
    fn test_fixup_errors() {
        let mut table = PointerTable::new();
        table.reserve(NodeId(0)).unwrap();
        assert!(table.reserve(NodeId(0)).is_err());

        let mut writer = BinaryWriter::new();
        writer.write_pointer(PointerWidth::X64, 0).unwrap();
        table.record_fixup(0, NodeId(0));
        assert!(matches!(
            table.apply_fixups(&mut writer, PointerWidth::X64),
            Err(Error::Layout(_))
        ));

        table.commit(NodeId(0), 8).unwrap();
        assert!(table.commit(NodeId(0), 8).is_err());
        table.record_fixup(0, NodeId(0));
        assert!(matches!(
            table.apply_fixups(&mut writer, PointerWidth::X64),
            Err(Error::Layout(_))
        ));
    }
}
