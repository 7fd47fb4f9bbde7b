//! Core types for the project authorization cache.
//!
//! The cache itself lives in `project-auth-cache`; this crate holds the types
//! that cross its boundary: the upstream objects the cache observes
//! (namespaces and the four policy document kinds), the review result it
//! indexes, and the trait seams for the collaborators it borrows: informers,
//! listers, the reviewer, the scope evaluator, and membership watchers.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use std::collections::BTreeSet;

/// A named tenancy compartment, as observed from the upstream informer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,

    /// Opaque monotonic token issued by the upstream for every change.
    pub resource_version: String,
}

/// Opaque identity of an upstream object. Resource versions are tracked
/// per-UID so that a recreated object is never mistaken for the one it
/// replaced.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(String);

/// Version-bearing metadata of a cluster-scoped policy document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterPolicy {
    pub uid: Uid,
    pub resource_version: String,
}

/// Version-bearing metadata of a cluster-scoped policy binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterPolicyBinding {
    pub uid: Uid,
    pub resource_version: String,
}

/// Version-bearing metadata of a per-namespace policy document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub namespace: String,
    pub uid: Uid,
    pub resource_version: String,
}

/// Version-bearing metadata of a per-namespace policy binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyBinding {
    pub namespace: String,
    pub uid: Uid,
    pub resource_version: String,
}

/// The answer to "who can access namespace N?".
///
/// A review may carry an evaluation error alongside its results; such a
/// review is still usable, the error is a warning about how it was computed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Review {
    users: Vec<String>,
    groups: Vec<String>,
    evaluation_error: Option<String>,
}

/// The namespaces a token's scopes allow a user to see: either everything or
/// a concrete set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisibleNamespaces {
    All,
    Selected(BTreeSet<String>),
}

/// Any object that can divulge the resource-version token of its last sync.
pub trait LastSyncResourceVersion: Send + Sync {
    fn last_sync_resource_version(&self) -> String;
}

/// Snapshot access to the upstream namespace list.
pub trait NamespaceInformer: LastSyncResourceVersion {
    fn list(&self) -> Vec<Namespace>;

    /// Keyed lookup. Absence is not an error; only a failed store read is.
    fn get(&self, name: &str) -> Result<Option<Namespace>>;
}

/// Snapshot access to cluster-scoped policies.
pub trait ClusterPolicyLister: LastSyncResourceVersion {
    fn cluster_policies(&self) -> Result<Vec<ClusterPolicy>>;
}

/// Snapshot access to cluster-scoped policy bindings.
pub trait ClusterPolicyBindingLister: LastSyncResourceVersion {
    fn cluster_policy_bindings(&self) -> Result<Vec<ClusterPolicyBinding>>;
}

/// Snapshot access to per-namespace policies, across all namespaces.
pub trait PolicyLister: LastSyncResourceVersion {
    fn policies(&self) -> Result<Vec<Policy>>;
}

/// Snapshot access to per-namespace policy bindings, across all namespaces.
pub trait PolicyBindingLister: LastSyncResourceVersion {
    fn policy_bindings(&self) -> Result<Vec<PolicyBinding>>;
}

/// Oracle that computes the set of users and groups with access to a
/// namespace.
pub trait Reviewer: Send + Sync {
    fn review(&self, namespace: &str) -> Result<Review>;
}

/// Narrows a user's visible-namespace set according to token scopes.
pub trait ScopeEvaluator: Send + Sync {
    fn visible_namespaces(
        &self,
        scopes: &[String],
        cluster_policies: &dyn ClusterPolicyLister,
    ) -> Result<VisibleNamespaces>;
}

/// The identity making a query.
pub trait UserInfo {
    fn name(&self) -> &str;
    fn groups(&self) -> &[String];
    fn scopes(&self) -> &[String];
}

/// A plain-struct [`UserInfo`] for callers that assemble identities by hand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub groups: Vec<String>,
    pub scopes: Vec<String>,
}

/// Consumer of membership deltas. The user and group sets are the complete
/// new membership for the namespace, empty when the namespace was deleted.
pub trait CacheWatcher: Send + Sync {
    fn group_membership_changed(
        &self,
        namespace: &str,
        users: &BTreeSet<String>,
        groups: &BTreeSet<String>,
    );
}

/// Enumerates the namespaces a user is permitted to list.
pub trait NamespaceLister: Send + Sync {
    fn list(&self, user: &dyn UserInfo) -> Result<Vec<Namespace>>;
}

// === impl Namespace ===

impl Namespace {
    pub fn new(name: impl Into<String>, resource_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_version: resource_version.into(),
        }
    }
}

// === impl Uid ===

impl Uid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

impl From<String> for Uid {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

// === impl Review ===

impl Review {
    pub fn new(
        users: impl IntoIterator<Item = impl Into<String>>,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            groups: groups.into_iter().map(Into::into).collect(),
            evaluation_error: None,
        }
    }

    pub fn with_evaluation_error(mut self, message: impl Into<String>) -> Self {
        self.evaluation_error = Some(message.into());
        self
    }

    /// Users with access to the reviewed namespace.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Groups with access to the reviewed namespace.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// A warning raised while the review was computed, if any.
    pub fn evaluation_error(&self) -> Option<&str> {
        self.evaluation_error.as_deref()
    }
}

// === impl VisibleNamespaces ===

impl VisibleNamespaces {
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Selected(names) => names.contains(name),
        }
    }
}

// === impl User ===

impl UserInfo for User {
    fn name(&self) -> &str {
        &self.name
    }

    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn scopes(&self) -> &[String] {
        &self.scopes
    }
}
