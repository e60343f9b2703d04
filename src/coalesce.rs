//! The coalescing engine: insert-range and delete-range, tying the tree,
//! pool and emergency lists together and firing observer callbacks.
//!
//! Absorb whatever's adjacent before committing a new record, and roll
//! back a delete that needs two new records when only one pool slot
//! comes free.

use crate::addr::Addr;
use crate::emergency::{self, EmergencyLists};
use crate::error::CbsError;
use crate::node::{self, Node, NodeRef};
use crate::observer::Observer;
use crate::pool::NodePool;
use crate::range::Range;
use crate::splay::SplayTree;

/// Borrowed handle onto everything a coalescing operation needs. Plain
/// data, assembled fresh by [`crate::Cbs`] on every public call rather
/// than stored as a long-lived struct, since the pieces it borrows
/// already live in `Cbs` itself.
pub(crate) struct Context<'a> {
    pub tree: &'a mut SplayTree,
    pub pool: &'a mut NodePool,
    pub emergency: &'a mut EmergencyLists,
    pub min_size: usize,
    pub allow_inline: bool,
}

/// Store `range` wherever it fits: a fresh pool slot first, an internal
/// record if inline fallback is allowed and the range is big enough to
/// carry one, otherwise an emergency-list entry. Mutates nothing on the
/// `Err` path.
///
/// The internal-record and emergency-list tiers only exist when the
/// `inline-fallback` crate feature is on; without it, pool exhaustion is
/// always `Oom`, whatever `Config::allow_inline` says (the feature gates
/// the capability at compile time, the config flag at run time — see
/// `DESIGN.md`).
fn store_range(ctx: &mut Context, range: Range) -> Result<(), CbsError> {
    if let Some(idx) = ctx.pool.alloc(Node::new(range)) {
        ctx.tree.insert(ctx.pool, NodeRef::External(idx));
        return Ok(());
    }
    #[cfg(feature = "inline-fallback")]
    if ctx.allow_inline {
        if range.size() >= node::internal_footprint() {
            let r = unsafe { node::write_internal(Node::new(range)) };
            ctx.tree.insert(ctx.pool, r);
            return Ok(());
        }
        if range.size() == emergency::GRAIN_SIZE {
            unsafe { ctx.emergency.insert_grain(range.base) };
            return Ok(());
        }
        if range.size() >= emergency::MIN_BLOCK_SIZE {
            unsafe { ctx.emergency.insert_block(range) };
            return Ok(());
        }
    }
    Err(CbsError::Oom)
}

/// Remove and return whatever [`store_range`] would have produced for a
/// range based at `base` — tried in the same order `store_range` tries
/// storage tiers, so it finds whichever tier actually holds it.
fn remove_exact(ctx: &mut Context, base: Addr) -> Option<Range> {
    if let Some(r) = ctx.tree.remove(ctx.pool, base) {
        let range = unsafe { node::node_ref(ctx.pool, r) }.range;
        if let NodeRef::External(idx) = r {
            ctx.pool.free(idx);
        }
        return Some(range);
    }
    if let Some(r) = unsafe { ctx.emergency.remove_block(base) } {
        return Some(r);
    }
    if let Some(b) = unsafe { ctx.emergency.remove_grain(base) } {
        return Some(Range::new(b, b.add(emergency::GRAIN_SIZE)));
    }
    None
}

/// The tracked range whose `limit == addr`, removed, if any.
fn take_left_neighbour(ctx: &mut Context, addr: Addr) -> Option<Range> {
    if let Some(r) = ctx.tree.find_floor(ctx.pool, addr) {
        let range = unsafe { node::node_ref(ctx.pool, r) }.range;
        if range.limit == addr {
            ctx.tree.remove(ctx.pool, range.base);
            if let NodeRef::External(idx) = r {
                ctx.pool.free(idx);
            }
            return Some(range);
        }
    }
    if let Some(range) = unsafe { ctx.emergency.left_neighbour_block(addr) } {
        unsafe { ctx.emergency.remove_block(range.base) };
        return Some(range);
    }
    if addr.as_usize() >= emergency::GRAIN_SIZE {
        let candidate = Addr(addr.as_usize() - emergency::GRAIN_SIZE);
        if unsafe { ctx.emergency.grain_at(candidate) }.is_some() {
            unsafe { ctx.emergency.remove_grain(candidate) };
            return Some(Range::new(candidate, addr));
        }
    }
    None
}

/// The tracked range whose `base == addr`, removed, if any.
fn take_right_neighbour(ctx: &mut Context, addr: Addr) -> Option<Range> {
    if let Some(r) = ctx.tree.find_exact(ctx.pool, addr) {
        let range = unsafe { node::node_ref(ctx.pool, r) }.range;
        ctx.tree.remove(ctx.pool, addr);
        if let NodeRef::External(idx) = r {
            ctx.pool.free(idx);
        }
        return Some(range);
    }
    if let Some(range) = unsafe { ctx.emergency.block_at(addr) } {
        unsafe { ctx.emergency.remove_block(addr) };
        return Some(range);
    }
    if unsafe { ctx.emergency.grain_at(addr) }.is_some() {
        unsafe { ctx.emergency.remove_grain(addr) };
        return Some(Range::new(addr, addr.add(emergency::GRAIN_SIZE)));
    }
    None
}

/// Does any tracked range genuinely overlap (not just touch) `range`?
///
/// Tracked tree entries are pairwise disjoint and sorted by `base`, so it
/// is never necessary to walk more than the floor entry (the greatest
/// `base <= range.base`) and its immediate successor (the least
/// `base > range.base`): if neither overlaps, every entry further out is
/// even further from `range` and can't either. Checking only the node
/// whose range happens to contain `range.limit` (as opposed to the true
/// successor) would miss a `range` that fully engulfs some untouched
/// tracked entry without landing on either of its edges.
fn overlaps_existing(ctx: &mut Context, range: Range) -> bool {
    if let Some(r) = ctx.tree.find_floor(ctx.pool, range.base) {
        let existing = unsafe { node::node_ref(ctx.pool, r) }.range;
        if existing.overlaps(&range) {
            return true;
        }
    }
    let (_, succ) = ctx.tree.neighbours(ctx.pool, range.base);
    if let Some(r) = succ {
        let existing = unsafe { node::node_ref(ctx.pool, r) }.range;
        if existing.overlaps(&range) {
            return true;
        }
    }
    let mut hit = false;
    unsafe {
        ctx.emergency.iterate_blocks(|r| hit |= r.overlaps(&range));
        ctx.emergency
            .iterate_grains(|b| hit |= Range::new(b, b.add(emergency::GRAIN_SIZE)).overlaps(&range));
    }
    hit
}

/// Try to migrate entries sitting in the emergency lists into a freshly
/// available pool slot, lowest address first, stopping at the first one
/// that still doesn't fit. Called after every successful insert (§4.3
/// step 3): merging a range can free up a pool slot (when an absorbed
/// neighbour was external) without needing that slot back, so there may
/// now be room for a record this crate would otherwise leave stranded in
/// degraded storage until something explicitly asks for it.
fn flush_emergency(ctx: &mut Context) {
    loop {
        let range = match unsafe { ctx.emergency.first_block() } {
            Some(r) => r,
            None => break,
        };
        match ctx.pool.alloc(Node::new(range)) {
            Some(idx) => {
                unsafe { ctx.emergency.remove_block(range.base) };
                ctx.tree.insert(ctx.pool, NodeRef::External(idx));
            }
            None => break,
        }
    }
    loop {
        let base = match ctx.emergency.first_grain() {
            Some(b) => b,
            None => break,
        };
        let range = Range::new(base, base.add(emergency::GRAIN_SIZE));
        match ctx.pool.alloc(Node::new(range)) {
            Some(idx) => {
                unsafe { ctx.emergency.remove_grain(base) };
                ctx.tree.insert(ctx.pool, NodeRef::External(idx));
            }
            None => break,
        }
    }
}

/// Insert `range`, merging it with any tracked range it's adjacent to,
/// and return the final (possibly larger) tracked range.
///
/// Absorbing an existing neighbour can only ever free up storage
/// capacity (a pool slot, if the neighbour was external) or leave it
/// unchanged (if the neighbour was internal or in an emergency list); it
/// never costs capacity that the merged, larger range then needs back.
/// So the only way this can return `Oom` is when `range` has no tracked
/// neighbour at all and genuinely has nowhere to go — in which case
/// nothing has been mutated yet.
pub(crate) fn insert_range(
    ctx: &mut Context,
    range: Range,
    observer: &mut impl Observer,
) -> Result<Range, CbsError> {
    if overlaps_existing(ctx, range) {
        return Err(CbsError::Overlap);
    }

    let left = take_left_neighbour(ctx, range.base);
    let right = take_right_neighbour(ctx, range.limit);

    let merged = match (left, right) {
        (Some(l), Some(r)) => l.union(&range).union(&r),
        (Some(l), None) => l.union(&range),
        (None, Some(r)) => range.union(&r),
        (None, None) => range,
    };

    store_range(ctx, merged)?;
    flush_emergency(ctx);

    // Tie-break toward the left survivor on equal sizes.
    let old_visible = match (left, right) {
        (Some(l), Some(r)) => Some(if l.size() >= r.size() { l } else { r }),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
    .filter(|r| r.size() >= ctx.min_size);

    match old_visible {
        Some(old) => observer.on_grow(old, merged),
        None if merged.size() >= ctx.min_size => observer.on_new(None, merged),
        None => {}
    }

    Ok(merged)
}

/// Remove `target` from whatever tracked range currently contains it,
/// splitting that range into up to two remaining fragments.
pub(crate) fn delete_range(
    ctx: &mut Context,
    target: Range,
    observer: &mut impl Observer,
) -> Result<(), CbsError> {
    let base = locate_containing(ctx, target).ok_or(CbsError::NotFound)?;
    let old = remove_exact(ctx, base).expect("locate_containing found a real entry");
    if !old.contains_range(&target) {
        // Put it back exactly as found; the caller asked about a range
        // that isn't fully covered by what's actually tracked there.
        store_range(ctx, old).expect("restoring an unmodified range never fails");
        return Err(CbsError::NotFound);
    }

    let low = (old.base < target.base).then(|| Range::new(old.base, target.base));
    let high = (target.limit < old.limit).then(|| Range::new(target.limit, old.limit));

    match (low, high) {
        (None, None) => {}
        (Some(frag), None) | (None, Some(frag)) => {
            if let Err(e) = store_range(ctx, frag) {
                store_range(ctx, old).expect("restoring an unmodified range never fails");
                return Err(e);
            }
        }
        (Some(l), Some(h)) => {
            if let Err(e) = store_range(ctx, l) {
                store_range(ctx, old).expect("restoring an unmodified range never fails");
                return Err(e);
            }
            if let Err(e) = store_range(ctx, h) {
                remove_exact(ctx, l.base);
                store_range(ctx, old).expect("restoring an unmodified range never fails");
                return Err(e);
            }
        }
    }

    notify_delete(observer, old, low, high, ctx.min_size);
    Ok(())
}

/// Fire the right observer callback for a completed, committed delete.
/// Split out from [`delete_range`] so the bookkeeping mutation and the
/// side-effecting callback aren't interleaved with the rollback paths
/// above.
fn notify_delete(
    observer: &mut impl Observer,
    old: Range,
    low: Option<Range>,
    high: Option<Range>,
    min_size: usize,
) {
    let old_visible = old.size() >= min_size;
    match (low, high) {
        (None, None) => {
            if old_visible {
                observer.on_delete(old, None);
            }
        }
        (Some(frag), None) | (None, Some(frag)) => {
            let frag_visible = frag.size() >= min_size;
            match (old_visible, frag_visible) {
                (true, true) => observer.on_shrink(old, frag),
                (true, false) => observer.on_delete(old, Some(frag)),
                (false, true) => observer.on_new(Some(old), frag),
                (false, false) => {}
            }
        }
        (Some(l), Some(h)) => {
            let l_visible = l.size() >= min_size;
            let h_visible = h.size() >= min_size;
            if old_visible {
                observer.on_delete(old, None);
            }
            if l_visible {
                observer.on_new(None, l);
            }
            if h_visible {
                observer.on_new(None, h);
            }
        }
    }
}

/// Lowest-address tracked range of at least `min_size`, searching the
/// tree (via its `fast-find` augmentation) and both emergency lists and
/// keeping whichever candidate has the smaller base.
#[cfg(feature = "fast-find")]
pub(crate) fn find_first_fit(ctx: &mut Context, min_size: usize) -> Option<Range> {
    let tree_hit = ctx
        .tree
        .find_first_fit(ctx.pool, min_size)
        .map(|r| unsafe { node::node_ref(ctx.pool, r) }.range);
    let block_hit = unsafe { ctx.emergency.find_first_block(min_size) };
    let grain_hit = if min_size <= emergency::GRAIN_SIZE {
        let mut first = None;
        unsafe {
            ctx.emergency.iterate_grains(|b| {
                if first.is_none() {
                    first = Some(b);
                }
            });
        }
        first.map(|b| Range::new(b, b.add(emergency::GRAIN_SIZE)))
    } else {
        None
    };
    [tree_hit, block_hit, grain_hit]
        .into_iter()
        .flatten()
        .min_by_key(|r| r.base)
}

/// Highest-address tracked range of at least `min_size`.
#[cfg(feature = "fast-find")]
pub(crate) fn find_last_fit(ctx: &mut Context, min_size: usize) -> Option<Range> {
    let tree_hit = ctx
        .tree
        .find_last_fit(ctx.pool, min_size)
        .map(|r| unsafe { node::node_ref(ctx.pool, r) }.range);
    let block_hit = unsafe { ctx.emergency.find_last_block(min_size) };
    let grain_hit = if min_size <= emergency::GRAIN_SIZE {
        let mut last = None;
        unsafe {
            ctx.emergency.iterate_grains(|b| last = Some(b));
        }
        last.map(|b| Range::new(b, b.add(emergency::GRAIN_SIZE)))
    } else {
        None
    };
    [tree_hit, block_hit, grain_hit]
        .into_iter()
        .flatten()
        .max_by_key(|r| r.base)
}

/// The single largest tracked range, preferring an emergency-list
/// candidate over a tree candidate of the same size ([`flush_emergency`]
/// already empties the emergency lists back into the tree whenever an
/// insert leaves room for it; a tie here just means nothing has asked
/// for that room yet, and there's no reason to leave a record sitting in
/// degraded storage when a caller is about to consume it anyway).
#[cfg(feature = "fast-find")]
pub(crate) fn find_largest(ctx: &mut Context) -> Option<Range> {
    let tree_hit = ctx
        .tree
        .find_largest(ctx.pool)
        .map(|r| unsafe { node::node_ref(ctx.pool, r) }.range);
    let mut best_emergency: Option<Range> = None;
    unsafe {
        ctx.emergency.iterate_blocks(|r| {
            if best_emergency.map_or(true, |b| r.size() > b.size()) {
                best_emergency = Some(r);
            }
        });
        ctx.emergency.iterate_grains(|b| {
            let r = Range::new(b, b.add(emergency::GRAIN_SIZE));
            if best_emergency.map_or(true, |cur| r.size() > cur.size()) {
                best_emergency = Some(r);
            }
        });
    }
    match (tree_hit, best_emergency) {
        (Some(t), Some(e)) if e.size() >= t.size() => Some(e),
        (Some(t), _) => Some(t),
        (None, e) => e,
    }
}

/// Find the base address of whichever tracked entry (tree or emergency)
/// contains `target`, without removing it.
fn locate_containing(ctx: &mut Context, target: Range) -> Option<Addr> {
    if let Some(r) = ctx.tree.find_floor(ctx.pool, target.base) {
        let range = unsafe { node::node_ref(ctx.pool, r) }.range;
        if range.contains_range(&target) {
            return Some(range.base);
        }
    }
    let mut found = None;
    unsafe {
        ctx.emergency.iterate_blocks(|r| {
            if r.contains_range(&target) {
                found = Some(r.base);
            }
        });
    }
    if found.is_some() {
        return found;
    }
    unsafe {
        ctx.emergency.iterate_grains(|b| {
            let r = Range::new(b, b.add(emergency::GRAIN_SIZE));
            if r.contains_range(&target) {
                found = Some(b);
            }
        });
    }
    found
}
