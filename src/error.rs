//! Errors are values here, never panics or aborts.
//!
//! The taxonomy is deliberately narrow: a caller can always tell which of
//! the four kinds in section 7 it got and nothing finer-grained, because
//! nothing finer-grained changes what a well-behaved caller does next.

use core::fmt;

/// Why a public operation failed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CbsError {
    /// Bad `Config` passed to [`crate::Cbs::init`].
    Param(ParamError),
    /// The requested range partially overlaps something already tracked,
    /// or inserting it would violate emergency-list ordering.
    Overlap,
    /// `delete`/`find` against a range or size that isn't tracked.
    NotFound,
    /// The block-record pool is exhausted and either inline fallback is
    /// disallowed or the affected range is smaller than a grain.
    Oom,
}

/// Why [`crate::Cbs::init`] rejected a [`crate::Config`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParamError {
    /// `may_use_inline` was set but `alignment` is not a multiple of the
    /// pointer width, which an internal record's footprint requires.
    AlignmentTooSmall,
    /// `alignment` is zero or not a power of two.
    AlignmentNotPowerOfTwo,
    /// Inline fallback is disallowed and the pool was given zero capacity,
    /// which makes every insert fail immediately.
    ZeroCapacityWithoutInline,
}

impl fmt::Display for CbsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CbsError::Param(p) => write!(f, "invalid configuration: {}", p),
            CbsError::Overlap => write!(f, "range overlaps an already-tracked range"),
            CbsError::NotFound => write!(f, "range or size is not tracked"),
            CbsError::Oom => write!(f, "block-record pool exhausted"),
        }
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::AlignmentTooSmall => {
                write!(f, "alignment must be at least the pointer width when inline fallback is enabled")
            }
            ParamError::AlignmentNotPowerOfTwo => write!(f, "alignment must be a power of two"),
            ParamError::ZeroCapacityWithoutInline => {
                write!(f, "pool_capacity must be nonzero when inline fallback is disabled")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CbsError {}
#[cfg(feature = "std")]
impl std::error::Error for ParamError {}

pub type Result<T> = core::result::Result<T, CbsError>;
