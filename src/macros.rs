//! Ambient debug tracing for the crate's own internal operation.
//!
//! This is *not* the host-facing `describe` hook and it never touches
//! tracked-range contents; it exists purely so a developer working on the
//! splay tree or the emergency lists can flip on `cbs_trace` and see what
//! the structure did, the same way a lot of from-scratch data structure
//! crates keep a `log!`/`eprintln!` escape hatch behind a feature instead
//! of pulling in a logging façade the library itself never needs.
//!
//! With the feature off (the default) this expands to nothing and costs
//! nothing, not even argument evaluation.

#[cfg(feature = "cbs_trace")]
macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            std::eprintln!("[cbs] {}", std::format_args!($($arg)*));
        }
    };
}

#[cfg(not(feature = "cbs_trace"))]
macro_rules! trace {
    ($($arg:tt)*) => {
        ()
    };
}

pub(crate) use trace;
