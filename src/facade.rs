//! The public façade: `Config`, `DeletePolicy`, and the `Cbs` type
//! itself, tying the splay tree, pool and emergency lists together
//! behind a re-entrancy guard.

use crate::addr::Addr;
use crate::coalesce::{self, Context};
use crate::emergency::EmergencyLists;
use crate::error::{CbsError, ParamError, Result};
use crate::macros::trace;
use crate::observer::{NullObserver, Observer};
use crate::pool::NodePool;
use crate::range::Range;
use crate::splay::SplayTree;
use core::mem;
use core::ops::ControlFlow;

/// Configuration fixed for the lifetime of a [`Cbs`], supplied to
/// [`Cbs::init`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Every tracked range's `base` and `limit` must be a multiple of
    /// this. Must be a power of two; must be at least `size_of::<usize>()`
    /// if `allow_inline` is set, since an internal record's header needs
    /// that much room to even start.
    pub alignment: usize,
    /// Ranges at or above this size fire [`Observer::on_new`] /
    /// [`Observer::on_delete`] on appearance/disappearance and
    /// [`Observer::on_grow`] / [`Observer::on_shrink`] on resize; ranges
    /// below it are tracked but silent.
    pub min_size: usize,
    /// Number of block records the pool can hand out before falling back
    /// to inline records or emergency lists (or failing outright).
    pub pool_capacity: usize,
    /// Whether a block record may be written inside the range it
    /// describes when the pool is exhausted. If `false`, pool exhaustion
    /// is always `CbsError::Oom`.
    pub allow_inline: bool,
}

impl Config {
    fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(CbsError::Param(ParamError::AlignmentNotPowerOfTwo));
        }
        if self.allow_inline && self.alignment < mem::size_of::<usize>() {
            return Err(CbsError::Param(ParamError::AlignmentTooSmall));
        }
        if !self.allow_inline && self.pool_capacity == 0 {
            return Err(CbsError::Param(ParamError::ZeroCapacityWithoutInline));
        }
        Ok(())
    }
}

/// Controls how much of a range [`Cbs::find_first`], [`Cbs::find_last`]
/// and [`Cbs::find_largest`] remove as a side effect of finding it. A
/// found range exactly the requested size is always removed in full,
/// whatever the policy (there's no remainder to keep).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DeletePolicy {
    /// Leave the found range tracked; just report where it is.
    #[default]
    None,
    /// Remove the low (`size`-byte) end of the found range, leaving any
    /// remainder at the high end tracked.
    Low,
    /// Remove the high (`size`-byte) end of the found range, leaving any
    /// remainder at the low end tracked.
    High,
    /// Remove the entire found range, however much bigger than `size`
    /// it is.
    Entire,
}

/// A coalescing block structure: a free-range manager that keeps
/// non-overlapping address ranges in a self-adjusting tree, tolerating
/// its own bookkeeping running out of memory.
pub struct Cbs<O: Observer = NullObserver> {
    tree: SplayTree,
    pool: NodePool,
    emergency: EmergencyLists,
    config: Config,
    observer: O,
    in_cbs: bool,
}

/// Sets the re-entrancy flag on construction and clears it on drop,
/// whether the operation it guards returns normally or panics. Catches an
/// observer callback calling back into the same structure while it's
/// mid-mutation and therefore inconsistent.
struct InCbsGuard<'a> {
    flag: &'a mut bool,
}

impl<'a> InCbsGuard<'a> {
    fn enter(flag: &'a mut bool) -> InCbsGuard<'a> {
        debug_assert!(!*flag, "re-entrant call into Cbs from an observer callback");
        *flag = true;
        InCbsGuard { flag }
    }
}

impl Drop for InCbsGuard<'_> {
    fn drop(&mut self) {
        *self.flag = false;
    }
}

/// Apply `policy` to a range located by `find_first`/`find_last`/
/// `find_largest`, removing the requested slice (or nothing, for
/// [`DeletePolicy::None`]) and returning exactly what the caller gets
/// back. A `found` range exactly `size` bytes collapses every non-`None`
/// policy to the same removal, since there's no remainder to keep
/// either way — so there's nothing to special-case for that.
fn extract(
    ctx: &mut Context,
    observer: &mut impl Observer,
    found: Range,
    size: usize,
    policy: DeletePolicy,
) -> Result<Range> {
    let target = match policy {
        DeletePolicy::None => return Ok(found),
        DeletePolicy::Low => Range::new(found.base, found.base.add(size)),
        DeletePolicy::High => Range::new(Addr(found.limit.as_usize() - size), found.limit),
        DeletePolicy::Entire => found,
    };
    coalesce::delete_range(ctx, target, observer)?;
    Ok(target)
}

impl<O: Observer> Cbs<O> {
    /// Build a fresh, empty structure. Fails only on an invalid `Config`;
    /// this never touches any tracked memory, since there is none yet.
    pub fn init(config: Config, observer: O) -> Result<Cbs<O>> {
        config.validate()?;
        Ok(Cbs {
            tree: SplayTree::new(),
            pool: NodePool::with_capacity(config.pool_capacity),
            emergency: EmergencyLists::new(),
            config,
            observer,
            in_cbs: false,
        })
    }

    /// Tear down this structure. The language-neutral interface names
    /// `finish` as a call distinct from construction; in Rust there is
    /// nothing left to do beyond running the ordinary destructors once
    /// `self` is consumed, since a `Cbs` owns no resource beyond its own
    /// heap allocations — it never touches the bytes of the ranges it
    /// tracks (§1). Exists so a caller translating against the procedural
    /// surface in `SPEC_FULL.md` §6 has a direct match for `finish`.
    pub fn finish(self) {}

    /// Forget every tracked range without visiting them (no observer
    /// callbacks fire). Pool capacity and configuration are unchanged.
    pub fn clear(&mut self) {
        let _guard = InCbsGuard::enter(&mut self.in_cbs);
        self.tree = SplayTree::new();
        self.pool = NodePool::with_capacity(self.config.pool_capacity);
        self.emergency = EmergencyLists::new();
        self.check_invariants();
    }

    /// A malformed or misaligned range is a caller bug, not a recoverable
    /// condition, so it's checked with `debug_assert!` rather than
    /// threaded through `Result`.
    fn check_range(&self, range: Range) {
        debug_assert!(range.base < range.limit, "empty range: {:?}", range);
        debug_assert!(
            range.is_aligned(self.config.alignment),
            "range not aligned to {}: {:?}",
            self.config.alignment,
            range
        );
    }

    /// Track `range` as free, merging it with any range it's adjacent
    /// to. Returns the final (possibly larger) tracked range.
    pub fn insert(&mut self, range: Range) -> Result<Range> {
        self.check_range(range);
        self.check_invariants();
        let guard = InCbsGuard::enter(&mut self.in_cbs);
        trace!("insert {:?}", range);
        let mut ctx = Context {
            tree: &mut self.tree,
            pool: &mut self.pool,
            emergency: &mut self.emergency,
            min_size: self.config.min_size,
            allow_inline: self.config.allow_inline,
        };
        let result = coalesce::insert_range(&mut ctx, range, &mut self.observer);
        drop(guard);
        self.check_invariants();
        result
    }

    /// Stop tracking `range`, splitting whatever tracked range contains
    /// it into up to two remaining fragments.
    pub fn delete(&mut self, range: Range) -> Result<()> {
        self.check_range(range);
        self.check_invariants();
        let guard = InCbsGuard::enter(&mut self.in_cbs);
        trace!("delete {:?}", range);
        let mut ctx = Context {
            tree: &mut self.tree,
            pool: &mut self.pool,
            emergency: &mut self.emergency,
            min_size: self.config.min_size,
            allow_inline: self.config.allow_inline,
        };
        let result = coalesce::delete_range(&mut ctx, range, &mut self.observer);
        drop(guard);
        self.check_invariants();
        result
    }

    /// Change the visibility threshold. Every block that crosses it as a
    /// result fires exactly one observer callback: raising the threshold
    /// past a block's size fires `on_delete` (it just became
    /// uninteresting); lowering it past a block's size fires `on_new`
    /// (conversely). Blocks that stay on the same side of both the old
    /// and new threshold are untouched. No entries change state;
    /// map/emergency-list contents are unaffected.
    pub fn set_min_size(&mut self, min_size: usize) {
        let _guard = InCbsGuard::enter(&mut self.in_cbs);
        let old_min = self.config.min_size;
        if min_size > old_min {
            let mut crossed: alloc::vec::Vec<Range> = alloc::vec::Vec::new();
            self.iterate_all(|r| {
                if r.size() >= old_min && r.size() < min_size {
                    crossed.push(r);
                }
            });
            for r in crossed {
                self.observer.on_delete(r, None);
            }
        } else if min_size < old_min {
            let mut crossed: alloc::vec::Vec<Range> = alloc::vec::Vec::new();
            self.iterate_all(|r| {
                if r.size() >= min_size && r.size() < old_min {
                    crossed.push(r);
                }
            });
            for r in crossed {
                self.observer.on_new(None, r);
            }
        }
        self.config.min_size = min_size;
    }

    /// Visit every tracked range in address order, stopping as soon as `f`
    /// returns [`ControlFlow::Break`].
    pub fn iterate(&self, mut f: impl FnMut(Range) -> ControlFlow<()>) {
        let mut cb = move |r: Range| f(r).is_break();
        if self.tree.iterate_until(&self.pool, &mut |node| cb(node.range)) {
            return;
        }
        unsafe {
            if self.emergency.iterate_blocks_until(&mut cb) {
                return;
            }
            self.emergency
                .iterate_grains_until(&mut |b| cb(Range::new(b, b.add(crate::emergency::GRAIN_SIZE))));
        }
    }

    /// Visit every tracked range of at least `min_size`, in address order,
    /// stopping as soon as `f` returns [`ControlFlow::Break`].
    pub fn iterate_large(&self, min_size: usize, mut f: impl FnMut(Range) -> ControlFlow<()>) {
        self.iterate(|r| {
            if r.size() >= min_size {
                f(r)
            } else {
                ControlFlow::Continue(())
            }
        });
    }

    /// Visit every tracked range in address order. A convenience wrapper
    /// around [`Cbs::iterate`] for callers that always want the full walk.
    fn iterate_all(&self, mut f: impl FnMut(Range)) {
        self.iterate(|r| {
            f(r);
            ControlFlow::Continue(())
        });
    }

    /// Find the lowest-address tracked range of at least `size`,
    /// removing it (or the requested slice of it) per `policy`.
    #[cfg(feature = "fast-find")]
    pub fn find_first(&mut self, size: usize, policy: DeletePolicy) -> Result<Range> {
        let _guard = InCbsGuard::enter(&mut self.in_cbs);
        let mut ctx = Context {
            tree: &mut self.tree,
            pool: &mut self.pool,
            emergency: &mut self.emergency,
            min_size: self.config.min_size,
            allow_inline: self.config.allow_inline,
        };
        let found = coalesce::find_first_fit(&mut ctx, size).ok_or(CbsError::NotFound)?;
        let result = extract(&mut ctx, &mut self.observer, found, size, policy);
        drop(_guard);
        self.check_invariants();
        result
    }

    /// Find the highest-address tracked range of at least `size`,
    /// removing it (or the requested slice of it) per `policy`.
    #[cfg(feature = "fast-find")]
    pub fn find_last(&mut self, size: usize, policy: DeletePolicy) -> Result<Range> {
        let _guard = InCbsGuard::enter(&mut self.in_cbs);
        let mut ctx = Context {
            tree: &mut self.tree,
            pool: &mut self.pool,
            emergency: &mut self.emergency,
            min_size: self.config.min_size,
            allow_inline: self.config.allow_inline,
        };
        let found = coalesce::find_last_fit(&mut ctx, size).ok_or(CbsError::NotFound)?;
        let result = extract(&mut ctx, &mut self.observer, found, size, policy);
        drop(_guard);
        self.check_invariants();
        result
    }

    /// Find the single largest tracked range, removing it (or a `size`
    /// slice of it) per `policy`.
    #[cfg(feature = "fast-find")]
    pub fn find_largest(&mut self, policy: DeletePolicy) -> Result<Range> {
        let _guard = InCbsGuard::enter(&mut self.in_cbs);
        let mut ctx = Context {
            tree: &mut self.tree,
            pool: &mut self.pool,
            emergency: &mut self.emergency,
            min_size: self.config.min_size,
            allow_inline: self.config.allow_inline,
        };
        let found = coalesce::find_largest(&mut ctx).ok_or(CbsError::NotFound)?;
        let size = found.size();
        let result = extract(&mut ctx, &mut self.observer, found, size, policy);
        drop(_guard);
        self.check_invariants();
        result
    }

    /// Write a human-readable dump of every tracked range to `w`, one
    /// `[base, limit) {size}` line per range. The exact format isn't part
    /// of the API contract.
    pub fn describe(&self, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        let mut err = Ok(());
        self.iterate(|r| match write!(w, "[{:?},{:?}) {{{}}}\n", r.base, r.limit, r.size()) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                err = Err(e);
                ControlFlow::Break(())
            }
        });
        err
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Re-walk the tracked representation and assert I1/I3 (disjoint,
    /// non-adjacent, ascending ranges). Debug builds run this on entry
    /// and exit of every mutator for free; the `paranoid-checks` feature
    /// extends the same check to release builds, since a self-check
    /// costing O(n) per call is worth paying under fuzzing even where it
    /// isn't in a shipped build.
    #[cfg(any(debug_assertions, feature = "paranoid-checks"))]
    fn check_invariants(&self) {
        let mut prev: Option<Range> = None;
        self.iterate_all(|r| {
            assert!(r.base < r.limit, "CBS invariant violated: empty range {:?}", r);
            if let Some(p) = prev {
                assert!(
                    p.limit < r.base,
                    "CBS invariant violated: {:?} and {:?} touch or overlap",
                    p,
                    r
                );
            }
            prev = Some(r);
        });
    }

    #[cfg(not(any(debug_assertions, feature = "paranoid-checks")))]
    fn check_invariants(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::test_support::{Event, RecordingObserver};
    use std::vec::Vec;

    fn r(base: usize, limit: usize) -> Range {
        Range::new(Addr(base), Addr(limit))
    }

    fn cbs(pool_capacity: usize) -> Cbs<RecordingObserver> {
        Cbs::init(
            Config { alignment: 8, min_size: 0, pool_capacity, allow_inline: true },
            RecordingObserver::default(),
        )
        .unwrap()
    }

    fn events(c: &Cbs<RecordingObserver>) -> Vec<Event> {
        c.observer().events.borrow().clone()
    }

    #[test]
    fn init_rejects_non_power_of_two_alignment() {
        let err = Cbs::init(
            Config { alignment: 3, min_size: 0, pool_capacity: 4, allow_inline: false },
            NullObserver,
        )
        .unwrap_err();
        assert_eq!(err, CbsError::Param(ParamError::AlignmentNotPowerOfTwo));
    }

    #[test]
    fn init_rejects_small_alignment_with_inline_allowed() {
        let err = Cbs::init(
            Config { alignment: 4, min_size: 0, pool_capacity: 4, allow_inline: true },
            NullObserver,
        )
        .unwrap_err();
        assert_eq!(err, CbsError::Param(ParamError::AlignmentTooSmall));
    }

    #[test]
    fn init_rejects_zero_capacity_without_inline_fallback() {
        let err = Cbs::init(
            Config { alignment: 8, min_size: 0, pool_capacity: 0, allow_inline: false },
            NullObserver,
        )
        .unwrap_err();
        assert_eq!(err, CbsError::Param(ParamError::ZeroCapacityWithoutInline));
    }

    #[test]
    fn insert_fires_on_new_for_a_fresh_range() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        assert_eq!(events(&c), std::vec![Event::New(r(0x1000, 0x2000))]);
    }

    #[test]
    fn insert_adjacent_range_fires_on_grow() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        c.insert(r(0x2000, 0x3000)).unwrap();
        assert_eq!(
            events(&c),
            std::vec![Event::New(r(0x1000, 0x2000)), Event::Grow(r(0x1000, 0x2000), r(0x1000, 0x3000))]
        );
    }

    #[test]
    fn delete_entire_range_fires_on_delete() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        c.delete(r(0x1000, 0x2000)).unwrap();
        assert_eq!(
            events(&c),
            std::vec![Event::New(r(0x1000, 0x2000)), Event::Delete(r(0x1000, 0x2000))]
        );
    }

    #[test]
    fn delete_middle_retires_the_old_range_and_reports_both_fragments() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x4000)).unwrap();
        c.observer_mut().events.borrow_mut().clear();
        c.delete(r(0x2000, 0x3000)).unwrap();
        assert_eq!(
            events(&c),
            std::vec![
                Event::Delete(r(0x1000, 0x4000)),
                Event::New(r(0x1000, 0x2000)),
                Event::New(r(0x3000, 0x4000)),
            ]
        );
    }

    #[test]
    fn delete_one_edge_fires_shrink() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x4000)).unwrap();
        c.observer_mut().events.borrow_mut().clear();
        c.delete(r(0x1000, 0x2000)).unwrap();
        assert_eq!(
            events(&c),
            std::vec![Event::Shrink(r(0x1000, 0x4000), r(0x2000, 0x4000))]
        );
    }

    #[test]
    fn find_first_with_low_policy_leaves_remainder_tracked() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x3000)).unwrap();
        let found = c.find_first(0x1000, DeletePolicy::Low).unwrap();
        assert_eq!(found, r(0x1000, 0x2000));
        let mut remaining = Vec::new();
        c.iterate(|r| {
            remaining.push(r);
            core::ops::ControlFlow::Continue(())
        });
        assert_eq!(remaining, std::vec![r(0x2000, 0x3000)]);
    }

    #[test]
    fn find_last_with_high_policy_leaves_remainder_tracked() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x3000)).unwrap();
        let found = c.find_last(0x1000, DeletePolicy::High).unwrap();
        assert_eq!(found, r(0x2000, 0x3000));
        let mut remaining = Vec::new();
        c.iterate(|r| {
            remaining.push(r);
            core::ops::ControlFlow::Continue(())
        });
        assert_eq!(remaining, std::vec![r(0x1000, 0x2000)]);
    }

    #[test]
    fn find_largest_with_entire_policy_removes_the_whole_range() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x1100)).unwrap();
        c.insert(r(0x2000, 0x2400)).unwrap();
        let found = c.find_largest(DeletePolicy::Entire).unwrap();
        assert_eq!(found, r(0x2000, 0x2400));
        let mut remaining = Vec::new();
        c.iterate(|r| {
            remaining.push(r);
            core::ops::ControlFlow::Continue(())
        });
        assert_eq!(remaining, std::vec![r(0x1000, 0x1100)]);
    }

    #[test]
    fn find_first_with_none_policy_leaves_the_range_tracked() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        let found = c.find_first(0x500, DeletePolicy::None).unwrap();
        assert_eq!(found, r(0x1000, 0x2000));
        let mut remaining = Vec::new();
        c.iterate(|r| {
            remaining.push(r);
            core::ops::ControlFlow::Continue(())
        });
        assert_eq!(remaining, std::vec![r(0x1000, 0x2000)]);
    }

    #[test]
    fn find_first_with_no_candidate_is_not_found() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x1100)).unwrap();
        let err = c.find_first(0x1000, DeletePolicy::None).unwrap_err();
        assert_eq!(err, CbsError::NotFound);
    }

    #[test]
    fn set_min_size_raised_past_a_blocks_size_fires_on_delete() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x1100)).unwrap(); // size 0x100
        c.observer_mut().events.borrow_mut().clear();
        c.set_min_size(0x200);
        assert_eq!(events(&c), std::vec![Event::Delete(r(0x1000, 0x1100))]);
    }

    #[test]
    fn set_min_size_lowered_past_a_blocks_size_fires_on_new() {
        let mut c = cbs(8);
        c.set_min_size(0x200);
        c.insert(r(0x1000, 0x1100)).unwrap(); // size 0x100, below threshold: silent
        assert!(events(&c).is_empty());
        c.set_min_size(0);
        assert_eq!(events(&c), std::vec![Event::New(r(0x1000, 0x1100))]);
    }

    #[test]
    fn clear_forgets_everything_without_firing_observers() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        c.observer_mut().events.borrow_mut().clear();
        c.clear();
        assert!(events(&c).is_empty());
        let mut remaining = Vec::new();
        c.iterate(|r| {
            remaining.push(r);
            core::ops::ControlFlow::Continue(())
        });
        assert!(remaining.is_empty());
    }

    #[test]
    fn describe_lists_every_tracked_range() {
        let mut c = cbs(8);
        c.insert(r(0x1000, 0x2000)).unwrap();
        c.insert(r(0x3000, 0x3100)).unwrap();
        let mut out = std::string::String::new();
        c.describe(&mut out).unwrap();
        assert!(out.contains("0x1000"));
        assert!(out.contains("0x3000"));
    }
}

