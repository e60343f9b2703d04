//! Host-supplied hooks, invoked only once representation is consistent.
//!
//! Four callbacks (`new`/`delete`/`grow`/`shrink`) are fired as a
//! side effect of mutating operations. A generic trait bound plays the
//! role raw function pointers would: `Cbs<O: Observer>` is monomorphized
//! per observer type, so a no-op observer costs nothing and a
//! closure-backed one is just as cheap as a function pointer would have
//! been.

use crate::range::Range;

/// Callbacks fired by the façade when a tracked block crosses the
/// `minSize` threshold (see section 4.3 of SPEC_FULL.md for exactly when
/// each fires). All four have no-op defaults so a caller that only cares
/// about, say, `shrink` doesn't have to stub out the rest.
pub trait Observer {
    /// A block was created, or grew across `minSize`, ending at `new`.
    fn on_new(&mut self, old: Option<Range>, new: Range) {
        let _ = (old, new);
    }

    /// A block was deleted outright, or shrank below `minSize`. `old` is
    /// the range immediately before the transition.
    fn on_delete(&mut self, old: Range, new: Option<Range>) {
        let _ = (old, new);
    }

    /// A block grew in place while remaining `>= minSize` throughout.
    fn on_grow(&mut self, old: Range, new: Range) {
        let _ = (old, new);
    }

    /// A block shrank in place while remaining `>= minSize` throughout.
    fn on_shrink(&mut self, old: Range, new: Range) {
        let _ = (old, new);
    }
}

/// An observer that does nothing; the default for callers with no
/// interest in block lifecycle events.
#[derive(Clone, Copy, Default, Debug)]
pub struct NullObserver;

impl Observer for NullObserver {}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub enum Event {
        New(Range),
        Delete(Range),
        Grow(Range, Range),
        Shrink(Range, Range),
    }

    /// Records every callback it receives, for assertions in tests.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: RefCell<Vec<Event>>,
    }

    impl Observer for RecordingObserver {
        fn on_new(&mut self, _old: Option<Range>, new: Range) {
            self.events.borrow_mut().push(Event::New(new));
        }
        fn on_delete(&mut self, old: Range, _new: Option<Range>) {
            self.events.borrow_mut().push(Event::Delete(old));
        }
        fn on_grow(&mut self, old: Range, new: Range) {
            self.events.borrow_mut().push(Event::Grow(old, new));
        }
        fn on_shrink(&mut self, old: Range, new: Range) {
            self.events.borrow_mut().push(Event::Shrink(old, new));
        }
    }
}
