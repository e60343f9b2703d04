//! Concrete end-to-end scenarios: two-range coalescence, a delete that
//! splits a range into fragments, both emergency-list tiers under pool
//! starvation, a find-largest/find-first-with-LOW walk over ten ranges,
//! and an observer firing exactly once across a `set_min_size` crossing.
//!
//! Assumes `alignment = 8`, `sizeof(pointer) = 8`, inline fallback
//! enabled, fast-find on — the crate's default feature set.

use cbs::{Addr, Cbs, Config, DeletePolicy, NullObserver, Observer, Range};
use core::cell::RefCell;

fn r(base: usize, limit: usize) -> Range {
    Range::new(Addr(base), Addr(limit))
}

fn fresh(pool_capacity: usize) -> Cbs<NullObserver> {
    Cbs::init(
        Config { alignment: 8, min_size: 0, pool_capacity, allow_inline: true },
        NullObserver,
    )
    .unwrap()
}

fn ranges_of(c: &Cbs<NullObserver>) -> Vec<Range> {
    let mut out = Vec::new();
    c.iterate(|rg| {
        out.push(rg);
        core::ops::ControlFlow::Continue(())
    });
    out
}

#[test]
fn scenario_1_two_adjacent_inserts_coalesce() {
    let mut c = fresh(8);
    c.insert(r(0x1000, 0x2000)).unwrap();
    c.insert(r(0x2000, 0x3000)).unwrap();
    assert_eq!(ranges_of(&c), vec![r(0x1000, 0x3000)]);
    assert_eq!(ranges_of(&c)[0].size(), 0x2000);
}

#[test]
fn scenario_2_delete_interior_splits_into_two_blocks() {
    let mut c = fresh(8);
    c.insert(r(0x1000, 0x3000)).unwrap();
    c.delete(r(0x1800, 0x2000)).unwrap();
    assert_eq!(ranges_of(&c), vec![r(0x1000, 0x1800), r(0x2000, 0x3000)]);
}

/// Emergency-tier entries are written as real headers inside the range
/// they describe (and, once a merged range is big enough, as an internal
/// node record), so the addresses used against a starved pool must be
/// genuine writable memory, not arbitrary integers.
fn aligned_backing(len: usize) -> (Vec<u8>, usize) {
    let buf = vec![0u8; len];
    let base = (buf.as_ptr() as usize + 7) & !7;
    (buf, base)
}

#[test]
fn scenario_3_starved_pool_uses_emergency_block_list_then_coalesces_back() {
    // Zero pool capacity forces every record onto the emergency lists.
    let (_buf, base) = aligned_backing(0x10000);
    let mut c = fresh(0);
    c.insert(r(base + 0x4000, base + 0x4020)).unwrap();
    assert_eq!(ranges_of(&c), vec![r(base + 0x4000, base + 0x4020)]);

    c.insert(r(base + 0x4020, base + 0x5000)).unwrap();
    assert_eq!(ranges_of(&c), vec![r(base + 0x4000, base + 0x5000)]);
}

#[test]
fn scenario_4_starved_pool_uses_emergency_grain_list_then_coalesces() {
    let (_buf, base) = aligned_backing(0x1000);
    let mut c = fresh(0);
    c.insert(r(base, base + 0x8)).unwrap();
    assert_eq!(ranges_of(&c), vec![r(base, base + 0x8)]);

    c.insert(r(base + 0x8, base + 0x10)).unwrap();
    // Either still two grains or coalesced into one 16-byte block — either
    // way the tracked coverage is exactly one contiguous 16-byte range.
    assert_eq!(ranges_of(&c), vec![r(base, base + 0x10)]);
}

#[cfg(feature = "fast-find")]
#[test]
fn scenario_5_find_largest_then_find_first_with_low_policy() {
    let sizes = [16usize, 32, 16, 64, 16, 128, 16, 256, 16, 16];
    let mut bases = Vec::new();
    let mut base = 0x1000usize;
    for &size in &sizes {
        bases.push(base);
        base += 0x1000 + size;
    }

    let mut c = fresh(16);
    for (&base, &size) in bases.iter().zip(sizes.iter()) {
        c.insert(r(base, base + size)).unwrap();
    }

    let largest = c.find_largest(DeletePolicy::None).unwrap();
    assert_eq!(largest.size(), 256);
    assert_eq!(largest, r(bases[7], bases[7] + 256));

    let first_fit_index = sizes.iter().position(|&s| s >= 64).unwrap();
    assert_eq!(first_fit_index, 3);
    let expected_base = bases[first_fit_index];

    let found = c.find_first(64, DeletePolicy::Low).unwrap();
    assert_eq!(found, r(expected_base, expected_base + 64));

    // The 64-byte block was consumed whole (its size exactly matched the
    // request); every other block is untouched.
    let mut expected: Vec<Range> = bases
        .iter()
        .zip(sizes.iter())
        .filter(|&(&b, _)| b != expected_base)
        .map(|(&b, &s)| r(b, b + s))
        .collect();
    expected.sort();
    let mut actual = ranges_of(&c);
    actual.sort();
    assert_eq!(actual, expected);
}

#[derive(Default)]
struct CountingObserver {
    deletes: RefCell<u32>,
}

impl Observer for CountingObserver {
    fn on_delete(&mut self, _old: Range, _new: Option<Range>) {
        *self.deletes.borrow_mut() += 1;
    }
}

#[test]
fn scenario_6_set_min_size_past_a_blocks_size_fires_delete_exactly_once() {
    let mut c = Cbs::init(
        Config { alignment: 8, min_size: 0, pool_capacity: 8, allow_inline: true },
        CountingObserver::default(),
    )
    .unwrap();
    c.insert(r(0x1000, 0x1040)).unwrap(); // size 0x40

    let before = ranges_of(&c);
    c.set_min_size(0x100); // now above the block's size
    let after = ranges_of(&c);

    assert_eq!(*c.observer().deletes.borrow(), 1);
    assert_eq!(before, after);
}

#[test]
fn iterate_stops_as_soon_as_the_callback_breaks() {
    let mut c = fresh(8);
    c.insert(r(0x1000, 0x1100)).unwrap();
    c.insert(r(0x2000, 0x2100)).unwrap();
    c.insert(r(0x3000, 0x3100)).unwrap();

    let mut visited = Vec::new();
    c.iterate(|rg| {
        visited.push(rg);
        if rg.base == Addr(0x2000) {
            core::ops::ControlFlow::Break(())
        } else {
            core::ops::ControlFlow::Continue(())
        }
    });
    assert_eq!(visited, vec![r(0x1000, 0x1100), r(0x2000, 0x2100)]);
}
