//! Block records: the nodes of the ordered map.
//!
//! A record is either *external* (living in a slot of the [`NodePool`]) or
//! *internal* (physically written at the `base` of the range it
//! describes). [`NodeRef`] is the tagged reference that tells the rest of
//! the crate which is which and how to reach it: everywhere but the two
//! functions at the bottom of this file, a node reference is just data,
//! and only here does it become a raw pointer.

use crate::addr::Addr;
use crate::pool::NodePool;
use crate::range::Range;
use core::mem;
use core::ptr;

/// Where a [`Node`] physically lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeRef {
    /// A slot in the block-record pool, by index.
    External(u32),
    /// Written at the start of the range it describes.
    Internal(Addr),
}

impl NodeRef {
    /// The `base` this reference's node claims to describe, if it is
    /// internal (an external node's address tells you nothing about its
    /// range; you have to dereference it).
    #[inline]
    pub(crate) fn internal_addr(self) -> Option<Addr> {
        match self {
            NodeRef::Internal(a) => Some(a),
            NodeRef::External(_) => None,
        }
    }
}

pub(crate) type Link = Option<NodeRef>;

/// A node of the ordered map: a tracked range plus the splay-tree
/// structure and (when `fast-find` is enabled) the augmented subtree
/// maximum.
#[repr(C)]
pub(crate) struct Node {
    pub range: Range,
    pub left: Link,
    pub right: Link,
    #[cfg(feature = "fast-find")]
    pub max_size: usize,
}

impl Node {
    pub(crate) fn new(range: Range) -> Node {
        Node {
            #[cfg(feature = "fast-find")]
            max_size: range.size(),
            range,
            left: None,
            right: None,
        }
    }
}

/// Recompute `r`'s `max_size` from its own size and its children's
/// `max_size`. The single place I5 is restored from, called by every
/// splay-tree mutation primitive (rotate, link, base/limit edit).
///
/// Takes the pool by `&mut` and re-borrows it immutably first for the
/// children's sizes, then mutably for the write, rather than taking
/// `&mut Node` and `&NodePool` together: for an `External` node those two
/// borrows would alias the same slot in the pool's slab.
#[cfg(feature = "fast-find")]
pub(crate) fn refresh(pool: &mut NodePool, r: NodeRef) {
    let left = unsafe { node_ref(pool, r) }.left;
    let right = unsafe { node_ref(pool, r) }.right;
    let mut max = unsafe { node_ref(pool, r) }.range.size();
    if let Some(l) = left {
        max = max.max(unsafe { node_ref(pool, l) }.max_size);
    }
    if let Some(rt) = right {
        max = max.max(unsafe { node_ref(pool, rt) }.max_size);
    }
    unsafe { node_mut(pool, r) }.max_size = max;
}

#[cfg(not(feature = "fast-find"))]
pub(crate) fn refresh(_pool: &mut NodePool, _r: NodeRef) {}

/// Minimum size of a tracked range that can host an internal record: the
/// physical footprint of `Node` itself.
pub(crate) fn internal_footprint() -> usize {
    mem::size_of::<Node>()
}

/// Borrow the node a [`NodeRef`] refers to.
///
/// # Safety
/// `r` must currently be a live reference: either a slot index actually
/// occupied in `pool`, or an address that currently holds a validly
/// initialized `Node` written by [`write_internal`].
pub(crate) unsafe fn node_ref(pool: &NodePool, r: NodeRef) -> &Node {
    match r {
        NodeRef::External(idx) => pool.get(idx),
        NodeRef::Internal(addr) => &*(addr.as_ptr() as *const Node),
    }
}

/// Mutably borrow the node a [`NodeRef`] refers to.
///
/// # Safety
/// Same preconditions as [`node_ref`], and the caller must not alias this
/// with any other live reference to the same node.
pub(crate) unsafe fn node_mut(pool: &mut NodePool, r: NodeRef) -> &mut Node {
    match r {
        NodeRef::External(idx) => pool.get_mut(idx),
        NodeRef::Internal(addr) => &mut *(addr.as_mut_ptr() as *mut Node),
    }
}

/// Write `node` as the intrusive header at the start of its own range.
///
/// # Safety
/// `node.range.base` must be writable for `internal_footprint()` bytes and
/// not currently aliased by any other reference.
pub(crate) unsafe fn write_internal(node: Node) -> NodeRef {
    let base = node.range.base;
    ptr::write(base.as_mut_ptr() as *mut Node, node);
    NodeRef::Internal(base)
}

/// Physically relocate an internal node's backing storage from `old_base`
/// to `new_base`, which must already carry the node's up-to-date `range`
/// (i.e. the caller has set `range.base = new_base` before calling this,
/// or does so via the returned node).
///
/// Favours a non-overlapping copy (valid whenever the two `sizeof(Node)`-byte
/// footprints don't share any byte), and falls back to the overlap-safe
/// `ptr::copy` otherwise. Neither path relies on `volatile` for ordering;
/// on a single core with no concurrent access there is nothing for
/// volatility to order.
///
/// # Safety
/// `old_base` must currently hold a valid `Node` (as written by
/// [`write_internal`]); `new_base` must be writable for
/// `internal_footprint()` bytes and must not overlap `old_base` in a way
/// that straddles live data outside the node itself.
pub(crate) unsafe fn relocate_internal(old_base: Addr, new_base: Addr) -> NodeRef {
    let size = internal_footprint();
    let src = old_base.as_ptr() as *const Node;
    let dst = new_base.as_mut_ptr() as *mut Node;

    let old_end = old_base.as_usize() + size;
    let new_end = new_base.as_usize() + size;
    let overlapping = old_base.as_usize() < new_end && new_base.as_usize() < old_end;

    if overlapping {
        ptr::copy(src, dst, 1);
    } else {
        ptr::copy_nonoverlapping(src, dst, 1);
    }
    (*dst).range.base = new_base;
    NodeRef::Internal(new_base)
}
