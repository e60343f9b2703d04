//! A coalescing block structure (CBS): a general-purpose free-range
//! manager that tracks contiguous address ranges over an unbounded
//! collection of blocks while tolerating allocation failure of its own
//! bookkeeping.
//!
//! The crate owns none of the memory it tracks. A host — typically a
//! memory-pool allocator — hands it `[base, limit)` ranges to remember as
//! free (`insert`) or to stop tracking (`delete`), and asks it for a
//! range of at least some size back (`find_first`/`find_last`/
//! `find_largest`). Internally, ranges live in a self-adjusting splay
//! tree keyed by `base`, augmented with a subtree-maximum-size invariant
//! for fast size-fit queries. When the tree's own node-record pool runs
//! out, a fallback representation — two emergency lists, threaded through
//! the very ranges they describe — keeps the structure consistent
//! without allocating anything at all.
//!
//! Every public operation is atomic: invariants may be transiently
//! violated mid-operation but are always restored before an observer
//! callback fires or the call returns (see [`Observer`]).
//!
//! ```
//! use cbs::{Cbs, Config, DeletePolicy, NullObserver, Range, Addr};
//!
//! let mut cbs = Cbs::init(
//!     Config { alignment: 8, min_size: 0, pool_capacity: 16, allow_inline: true },
//!     NullObserver,
//! ).unwrap();
//!
//! cbs.insert(Range::new(Addr(0x1000), Addr(0x2000))).unwrap();
//! cbs.insert(Range::new(Addr(0x2000), Addr(0x3000))).unwrap();
//!
//! // The two adjacent ranges coalesced into one on insert.
//! let found = cbs.find_largest(DeletePolicy::None).unwrap();
//! assert_eq!(found, Range::new(Addr(0x1000), Addr(0x3000)));
//! ```

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod addr;
mod coalesce;
mod emergency;
mod error;
mod facade;
mod macros;
mod node;
mod observer;
mod pool;
mod range;
mod splay;

pub use crate::addr::Addr;
pub use crate::error::{CbsError, ParamError, Result};
pub use crate::facade::{Cbs, Config, DeletePolicy};
pub use crate::observer::{NullObserver, Observer};
pub use crate::range::Range;

// `Addr` must stay a bare `usize` in memory: the emergency-list headers
// in `emergency.rs` write raw `usize` words at an entry's own address and
// rely on that address, the range's `base`, and the header's first field
// all being the same representation.
static_assertions::const_assert_eq!(core::mem::size_of::<Addr>(), core::mem::size_of::<usize>());
static_assertions::const_assert_eq!(core::mem::align_of::<Addr>(), core::mem::align_of::<usize>());
