//! Error taxonomy (spec §7).
//!
//! Only kinds 1 (configuration), 2 (invariant violation), and 4
//! (unimplemented request) get real error types. Kind 3 (retryable
//! contention) is an internal control-flow detail that never escapes a
//! public call — [`crate::lock::TxLockTable::acquire`] blocks on a
//! `Condvar` until the contending transaction resolves, rather than
//! returning a value the caller loops on; kind 5 (monitor rejection) is
//! surfaced as a plain `bool` per spec §6.

use thiserror::Error;

/// Fatal at construction. A misconfigured hierarchy never starts running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache would register {got} inner ports, exceeding the 64-bit directory bitmap limit of {limit}")]
    TooManyInnerPorts { limit: u8, got: u8 },

    #[error("unknown replacer kind `{0}` in configuration")]
    UnknownReplacerKind(String),

    #[error("unknown indexer kind `{0}` in configuration")]
    UnknownIndexerKind(String),

    #[error("unknown coherence policy kind `{0}` in configuration")]
    UnknownPolicyKind(String),

    #[error("template arity mismatch: expected {expected} arguments, got {got}")]
    TemplateArityMismatch { expected: usize, got: usize },

    #[error("slice dispatcher configured with {0} slices, at least 1 required")]
    EmptySliceSet(usize),

    #[error("connect statement refers to unknown cache `{0}`")]
    UnknownCache(String),
}

/// A programming-bug-grade invariant violation (spec §7 kind 2). These are
/// never constructed and handled — they exist only so `bug!()` panics carry
/// a typed payload that `#[should_panic(expected = ..)]` tests can match on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoherenceBug {
    #[error("hit check returned a way whose metadata tag does not match the address")]
    HitMetaMismatch,

    #[error("copy buffer released that was never allocated from this pool")]
    BufferNotAllocated,

    #[error("finish_resp for addr {addr:#x} arrived with no matching PendingXact entry")]
    PendingXactMissing { addr: u64 },

    #[error("copy buffer pool exhausted beyond its constructed size")]
    PoolExhausted,
}

/// Panics with a [`CoherenceBug`] payload. Used at every call site the spec
/// calls "fatal assertion (programming bug)" — never hit on a correct
/// implementation driven through the public API.
macro_rules! bug {
    ($kind:expr) => {
        panic!("coherence engine invariant violated: {}", $kind)
    };
}
pub(crate) use bug;

/// Kind 4: the caller asked for something this cache configuration does not
/// support (spec §6: `writeback_invalidate` "may be unimplemented and must
/// fail loudly if so").
#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation `{0}` is not implemented by this cache configuration")]
pub struct Unimplemented(pub &'static str);
