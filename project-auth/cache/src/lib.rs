//! Project authorization cache.
//!
//! Every API call that enumerates a user's projects would otherwise run an
//! authorization review across cluster-wide and per-namespace policy
//! documents. This crate amortizes that cost by precomputing the inverse
//! mapping (subject to visible namespaces) in the background:
//!
//! - A periodic, single-writer reconcile loop observes the namespace list and
//!   the four policy document sources (cluster policies, cluster policy
//!   bindings, per-namespace policies, per-namespace policy bindings).
//! - A skip oracle short-circuits a cycle when no upstream resource version
//!   moved; a cluster-scoped policy change forces a full rebuild into fresh
//!   stores that are swapped in atomically.
//! - Per namespace, a review is dispatched only when the driving request
//!   carries version information the cached record does not already reflect.
//! - Watchers receive the new membership of each namespace that was reviewed
//!   or deleted.
//!
//! ```ignore
//! [namespaces] --\
//! [policies]   ---> reconcile --> { reviews, users, groups } <-- list(user)
//! [bindings]  --/       |
//!                       \--> watchers
//! ```
//!
//! Readers resolve `(user, groups)` to a namespace list with one map lookup
//! per subject, filtered through the scope evaluator. They synchronize with
//! the reconciler only through the shared store handle, so queries stay
//! cheap and never observe a torn store.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod record;
mod skip;
mod store;
mod watch;

pub use self::cache::AuthorizationCache;
