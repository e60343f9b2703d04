//! The fixed-capacity block-record pool.
//!
//! An `MFS` (Manual Fixed Small) style allocator handing out fixed-size
//! block records: a flat slab with a free list threaded through unused
//! slots, never growing once configured. Reallocating on demand would be
//! wrong for this crate on purpose, because the whole point of the
//! pool/emergency-list split is that bookkeeping storage must be allowed
//! to run out without the tracked ranges it describes becoming
//! inconsistent. A slab that never
//! moves once sized is what makes `NodeRef::External(u32)` indices stable
//! across the pool's lifetime.

use crate::node::Node;
use alloc::vec::Vec;

enum Slot {
    Occupied(Node),
    Free { next: Option<u32> },
}

/// Slab of [`Node`] storage handed out to external (pooled) block
/// records. Capacity is fixed at construction; once every slot is
/// occupied, further requests return `None` and the caller falls back to
/// an internal record or an emergency list (or fails with `Oom`).
pub(crate) struct NodePool {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    len: u32,
}

impl NodePool {
    pub(crate) fn with_capacity(capacity: usize) -> NodePool {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next = if i + 1 < capacity {
                Some((i + 1) as u32)
            } else {
                None
            };
            slots.push(Slot::Free { next });
        }
        let free_head = if capacity == 0 { None } else { Some(0) };
        NodePool {
            slots,
            free_head,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len as usize
    }

    /// Claim a slot for `node`, returning its index, or `None` if the pool
    /// is exhausted.
    pub(crate) fn alloc(&mut self, node: Node) -> Option<u32> {
        let idx = self.free_head?;
        let next = match &self.slots[idx as usize] {
            Slot::Free { next } => *next,
            Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
        };
        self.slots[idx as usize] = Slot::Occupied(node);
        self.free_head = next;
        self.len += 1;
        Some(idx)
    }

    /// Return a slot to the free list, yielding the node it held.
    pub(crate) fn free(&mut self, idx: u32) -> Node {
        let prev = core::mem::replace(&mut self.slots[idx as usize], Slot::Free { next: self.free_head });
        self.free_head = Some(idx);
        self.len -= 1;
        match prev {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("freeing an already-free slot"),
        }
    }

    pub(crate) fn get(&self, idx: u32) -> &Node {
        match &self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("dereferencing a free slot"),
        }
    }

    pub(crate) fn get_mut(&mut self, idx: u32) -> &mut Node {
        match &mut self.slots[idx as usize] {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("dereferencing a free slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;
    use crate::range::Range;

    fn dummy_node() -> Node {
        Node::new(Range::new(Addr(0x1000), Addr(0x2000)))
    }

    #[test]
    fn alloc_exhausts_then_free_recycles() {
        let mut pool = NodePool::with_capacity(2);
        let a = pool.alloc(dummy_node()).unwrap();
        let b = pool.alloc(dummy_node()).unwrap();
        assert!(pool.alloc(dummy_node()).is_none());
        assert_eq!(pool.len(), 2);
        pool.free(a);
        assert_eq!(pool.len(), 1);
        let c = pool.alloc(dummy_node()).unwrap();
        assert_eq!(c, a);
        let _ = b;
    }

    #[test]
    fn zero_capacity_always_exhausted() {
        let mut pool = NodePool::with_capacity(0);
        assert!(pool.alloc(dummy_node()).is_none());
    }
}
