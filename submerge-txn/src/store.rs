use std::collections::BTreeMap;
use std::fmt;

use submerge_base::Key;

/// The result of a single per-node store request: no result (put/delete),
/// a single opaque value (get), or a list of (version, value) pairs for
/// read-repair-shaped gets (getAll against a versioned store).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreValue {
    Unit,
    Value(Vec<u8>),
    Versioned(Vec<(u64, Vec<u8>)>),
}

/// The blocking per-node handle an Action issues requests against.
/// Obtained from an external stores registry; this crate only consumes
/// the trait, it does not own instances of it.
pub trait Store: Send + Sync {
    fn get(&self, key: &Key) -> Result<StoreValue, StoreError>;
    fn get_all(&self, keys: &[Key]) -> Result<BTreeMap<Key, StoreValue>, StoreError>;
    fn put(&self, key: &Key, value: StoreValue) -> Result<(), StoreError>;
    fn delete(&self, key: &Key) -> Result<bool, StoreError>;
}

/// Error classification a `storeRequest` closure can return. The Action
/// dispatches differently on each variant: only `Unreachable` feeds the
/// FailureDetector, only `Application` short-circuits the pipeline,
/// everything else continues the loop.
#[derive(Clone, Debug)]
pub enum StoreError {
    /// Transport-level failure: the node could not be reached at all.
    Unreachable(String),
    /// Non-retryable semantic fault (e.g. obsolete version, invalid
    /// metadata). Authoritative: no further nodes should be tried.
    Application(String),
    /// Any other runtime error. Not a liveness signal.
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unreachable(msg) => write!(f, "unreachable store: {msg}"),
            StoreError::Application(msg) => write!(f, "application fault: {msg}"),
            StoreError::Other(msg) => write!(f, "store request error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
