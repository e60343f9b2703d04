//! The self-adjusting ordered map: a top-down splay tree keyed by
//! `range.base`, augmented (when `fast-find` is enabled) with each
//! subtree's maximum range size.
//!
//! The shape is Sleator & Tarjan's simple top-down splay rather than a
//! bottom-up recursive one, because it needs no parent links: `Node` only
//! stores `left`/`right`, avoiding back-pointers wherever a single pass
//! suffices.

use crate::addr::Addr;
use crate::node::{self, node_mut, node_ref, Link, Node, NodeRef};
use crate::pool::NodePool;
use alloc::vec::Vec;

#[derive(Default)]
pub(crate) struct SplayTree {
    pub(crate) root: Link,
}

/// Appends nodes onto one arm of the virtual splay-tree sentinel,
/// threading them together as the descent proceeds. `tail` is the most
/// recently appended node, or `None` while the arm is still empty (in
/// which case the new node becomes `head`). `chain` records append order
/// (shallowest first) so the augmentation can be refreshed bottom-up
/// afterwards.
struct Arm {
    head: Link,
    tail: Link,
    chain: Vec<NodeRef>,
}

impl Arm {
    fn new() -> Arm {
        Arm {
            head: None,
            tail: None,
            chain: Vec::new(),
        }
    }
}

impl SplayTree {
    pub(crate) fn new() -> SplayTree {
        SplayTree { root: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Bring the node with the greatest `base <= key` (or least `base`
    /// if every node is greater) to the root. No-op on an empty tree.
    pub(crate) fn splay(&mut self, pool: &mut NodePool, key: Addr) {
        self.root = Self::splay_subtree(pool, self.root.take(), key);
    }

    fn splay_subtree(pool: &mut NodePool, root: Link, key: Addr) -> Link {
        let mut t = match root {
            Some(t) => t,
            None => return None,
        };
        // Left arm: nodes found to be < key, linked via .right, shallowest first.
        let mut left = Arm::new();
        // Right arm: nodes found to be > key, linked via .left, shallowest first.
        let mut right = Arm::new();

        loop {
            let t_base = unsafe { node_ref(pool, t) }.range.base;
            if key < t_base {
                let l = match unsafe { node_ref(pool, t) }.left {
                    Some(l) => l,
                    None => break,
                };
                let l_base = unsafe { node_ref(pool, l) }.range.base;
                if key < l_base {
                    // zig-zig: rotate t right under l.
                    let l_right = unsafe { node_ref(pool, l) }.right;
                    unsafe { node_mut(pool, t) }.left = l_right;
                    node::refresh(pool, t);
                    unsafe { node_mut(pool, l) }.right = Some(t);
                    node::refresh(pool, l);
                    t = l;
                    if unsafe { node_ref(pool, t) }.left.is_none() {
                        break;
                    }
                }
                Self::append(pool, &mut right, t, Side::ViaLeft);
                t = unsafe { node_ref(pool, t) }.left.unwrap();
            } else if key > t_base {
                let r = match unsafe { node_ref(pool, t) }.right {
                    Some(r) => r,
                    None => break,
                };
                let r_base = unsafe { node_ref(pool, r) }.range.base;
                if key > r_base {
                    // zig-zig: rotate t left under r.
                    let r_left = unsafe { node_ref(pool, r) }.left;
                    unsafe { node_mut(pool, t) }.right = r_left;
                    node::refresh(pool, t);
                    unsafe { node_mut(pool, r) }.left = Some(t);
                    node::refresh(pool, r);
                    t = r;
                    if unsafe { node_ref(pool, t) }.right.is_none() {
                        break;
                    }
                }
                Self::append(pool, &mut left, t, Side::ViaRight);
                t = unsafe { node_ref(pool, t) }.right.unwrap();
            } else {
                break;
            }
        }

        let t_left = unsafe { node_ref(pool, t) }.left;
        let t_right = unsafe { node_ref(pool, t) }.right;
        match left.tail {
            Some(tail) => unsafe { node_mut(pool, tail) }.right = t_left,
            None => left.head = t_left,
        }
        match right.tail {
            Some(tail) => unsafe { node_mut(pool, tail) }.left = t_right,
            None => right.head = t_right,
        }
        unsafe { node_mut(pool, t) }.left = left.head;
        unsafe { node_mut(pool, t) }.right = right.head;

        // Refresh bottom-up: deepest appended node first, ending at t.
        for &r in left.chain.iter().rev() {
            node::refresh(pool, r);
        }
        for &r in right.chain.iter().rev() {
            node::refresh(pool, r);
        }
        node::refresh(pool, t);

        Some(t)
    }

    /// Append `t` to `arm`, threading it onto the arm's own chain pointer
    /// (`.left` if the arm is eventually reattached as a right subtree,
    /// `.right` if it's reattached as a left subtree).
    fn append(pool: &mut NodePool, arm: &mut Arm, t: NodeRef, side: Side) {
        match arm.tail {
            Some(tail) => match side {
                Side::ViaLeft => unsafe { node_mut(pool, tail) }.left = Some(t),
                Side::ViaRight => unsafe { node_mut(pool, tail) }.right = Some(t),
            },
            None => arm.head = Some(t),
        }
        arm.tail = Some(t);
        arm.chain.push(t);
    }

    /// Splay on `key` and return the node with the greatest `base <= key`,
    /// i.e. the node that would contain `key` if any node does.
    pub(crate) fn find_floor(&mut self, pool: &mut NodePool, key: Addr) -> Option<NodeRef> {
        self.splay(pool, key);
        match self.root {
            Some(r) if unsafe { node_ref(pool, r) }.range.base <= key => Some(r),
            _ => None,
        }
    }

    /// Find the node whose range starts exactly at `key`, splaying it to
    /// the root on success (on failure the root ends up at the nearest
    /// neighbour, same as any other failed `splay`).
    pub(crate) fn find_exact(&mut self, pool: &mut NodePool, key: Addr) -> Option<NodeRef> {
        self.splay(pool, key);
        match self.root {
            Some(r) if unsafe { node_ref(pool, r) }.range.base == key => Some(r),
            _ => None,
        }
    }

    /// Splay on `key` and return `(predecessor, successor)`: the nodes
    /// with the greatest `base < key` and the least `base > key`. If a
    /// node with `base == key` exists it is neither (callers that want it
    /// too should check the root after this call).
    pub(crate) fn neighbours(&mut self, pool: &mut NodePool, key: Addr) -> (Link, Link) {
        self.splay(pool, key);
        let root = match self.root {
            Some(r) => r,
            None => return (None, None),
        };
        let root_base = unsafe { node_ref(pool, root) }.range.base;
        if root_base == key {
            let pred = unsafe { node_ref(pool, root) }
                .left
                .map(|l| Self::subtree_max(pool, l));
            let succ = unsafe { node_ref(pool, root) }
                .right
                .map(|r| Self::subtree_min(pool, r));
            (pred, succ)
        } else if root_base < key {
            let succ = unsafe { node_ref(pool, root) }
                .right
                .map(|r| Self::subtree_min(pool, r));
            (Some(root), succ)
        } else {
            let pred = unsafe { node_ref(pool, root) }
                .left
                .map(|l| Self::subtree_max(pool, l));
            (pred, Some(root))
        }
    }

    fn subtree_max(pool: &NodePool, mut r: NodeRef) -> NodeRef {
        while let Some(right) = unsafe { node_ref(pool, r) }.right {
            r = right;
        }
        r
    }

    fn subtree_min(pool: &NodePool, mut r: NodeRef) -> NodeRef {
        while let Some(left) = unsafe { node_ref(pool, r) }.left {
            r = left;
        }
        r
    }

    /// Insert a freestanding node (not already linked into any tree) keyed
    /// by its own `range.base`. The caller is responsible for knowing the
    /// key is absent; inserting a duplicate key is a logic error.
    pub(crate) fn insert(&mut self, pool: &mut NodePool, new: NodeRef) {
        let key = unsafe { node_ref(pool, new) }.range.base;
        match self.root.take() {
            None => self.root = Some(new),
            Some(old_root) => {
                let splayed = Self::splay_subtree(pool, Some(old_root), key);
                let root = splayed.expect("splaying a nonempty tree yields a root");
                let root_base = unsafe { node_ref(pool, root) }.range.base;
                debug_assert_ne!(root_base, key, "insert: key already tracked");
                if key < root_base {
                    let root_left = unsafe { node_ref(pool, root) }.left;
                    unsafe { node_mut(pool, new) }.left = root_left;
                    unsafe { node_mut(pool, new) }.right = Some(root);
                    unsafe { node_mut(pool, root) }.left = None;
                    node::refresh(pool, root);
                } else {
                    let root_right = unsafe { node_ref(pool, root) }.right;
                    unsafe { node_mut(pool, new) }.right = root_right;
                    unsafe { node_mut(pool, new) }.left = Some(root);
                    unsafe { node_mut(pool, root) }.right = None;
                    node::refresh(pool, root);
                }
                node::refresh(pool, new);
                self.root = Some(new);
            }
        }
    }

    /// Remove and return the node keyed by `key`, or `None` if absent.
    pub(crate) fn remove(&mut self, pool: &mut NodePool, key: Addr) -> Option<NodeRef> {
        self.splay(pool, key);
        let root = self.root?;
        if unsafe { node_ref(pool, root) }.range.base != key {
            return None;
        }
        let left = unsafe { node_ref(pool, root) }.left;
        let right = unsafe { node_ref(pool, root) }.right;
        self.root = match left {
            None => right,
            Some(l) => {
                let new_root = Self::splay_subtree(pool, Some(l), key);
                let new_root = new_root.expect("nonempty left subtree splays to a root");
                unsafe { node_mut(pool, new_root) }.right = right;
                node::refresh(pool, new_root);
                Some(new_root)
            }
        };
        unsafe { node_mut(pool, root) }.left = None;
        unsafe { node_mut(pool, root) }.right = None;
        Some(root)
    }

    /// In-order walk of every tracked range.
    pub(crate) fn iterate(&self, pool: &NodePool, f: &mut dyn FnMut(&Node)) {
        fn walk(pool: &NodePool, link: Link, f: &mut dyn FnMut(&Node)) {
            if let Some(r) = link {
                let node = unsafe { node_ref(pool, r) };
                walk(pool, node.left, f);
                f(node);
                walk(pool, node.right, f);
            }
        }
        walk(pool, self.root, f);
    }

    /// In-order walk that stops as soon as `f` reports it wants to; returns
    /// `true` if it was stopped early, `false` if every node was visited.
    pub(crate) fn iterate_until(&self, pool: &NodePool, f: &mut dyn FnMut(&Node) -> bool) -> bool {
        fn walk(pool: &NodePool, link: Link, f: &mut dyn FnMut(&Node) -> bool) -> bool {
            if let Some(r) = link {
                let node = unsafe { node_ref(pool, r) };
                if walk(pool, node.left, f) {
                    return true;
                }
                if f(node) {
                    return true;
                }
                if walk(pool, node.right, f) {
                    return true;
                }
            }
            false
        }
        walk(pool, self.root, f)
    }

    /// Subtree maximum size at the root, or 0 for an empty tree. Requires
    /// `fast-find`; without it the augmentation isn't maintained.
    #[cfg(feature = "fast-find")]
    pub(crate) fn max_size(&self, pool: &NodePool) -> usize {
        match self.root {
            Some(r) => unsafe { node_ref(pool, r) }.max_size,
            None => 0,
        }
    }

    /// Leftmost (lowest-address) node whose range is at least `min_size`.
    #[cfg(feature = "fast-find")]
    pub(crate) fn find_first_fit(&self, pool: &NodePool, min_size: usize) -> Option<NodeRef> {
        let mut cur = self.root?;
        loop {
            let n = unsafe { node_ref(pool, cur) };
            if let Some(l) = n.left {
                if unsafe { node_ref(pool, l) }.max_size >= min_size {
                    cur = l;
                    continue;
                }
            }
            if n.range.size() >= min_size {
                return Some(cur);
            }
            match n.right {
                Some(r) if unsafe { node_ref(pool, r) }.max_size >= min_size => cur = r,
                _ => return None,
            }
        }
    }

    /// Rightmost (highest-address) node whose range is at least `min_size`.
    #[cfg(feature = "fast-find")]
    pub(crate) fn find_last_fit(&self, pool: &NodePool, min_size: usize) -> Option<NodeRef> {
        let mut cur = self.root?;
        loop {
            let n = unsafe { node_ref(pool, cur) };
            if let Some(r) = n.right {
                if unsafe { node_ref(pool, r) }.max_size >= min_size {
                    cur = r;
                    continue;
                }
            }
            if n.range.size() >= min_size {
                return Some(cur);
            }
            match n.left {
                Some(l) if unsafe { node_ref(pool, l) }.max_size >= min_size => cur = l,
                _ => return None,
            }
        }
    }

    /// Any node whose range size equals the tree's overall maximum.
    #[cfg(feature = "fast-find")]
    pub(crate) fn find_largest(&self, pool: &NodePool) -> Option<NodeRef> {
        let target = self.max_size(pool);
        if target == 0 {
            return None;
        }
        let mut cur = self.root?;
        loop {
            let n = unsafe { node_ref(pool, cur) };
            if n.range.size() == target {
                return Some(cur);
            }
            if let Some(l) = n.left {
                if unsafe { node_ref(pool, l) }.max_size == target {
                    cur = l;
                    continue;
                }
            }
            cur = n.right.expect("max_size invariant implies a matching descendant");
        }
    }
}

enum Side {
    ViaLeft,
    ViaRight,
}
