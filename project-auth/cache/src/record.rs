use ahash::AHashMap as HashMap;
use project_auth_core::{Namespace, Policy, PolicyBinding, Review, Uid};

/// A unit of reconcile work: re-review a namespace's access relative to the
/// upstream versions that drove the request. Each reconciler pass only fills
/// in the versions it observes; the rest stay unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ReviewRequest {
    pub namespace: String,

    /// The namespace resource version observed when this request was built.
    pub namespace_resource_version: Option<String>,

    /// Policy UID to resource version observed when this request was built.
    pub policy_versions: HashMap<Uid, String>,

    /// Policy binding UID to resource version observed when this request was
    /// built.
    pub binding_versions: HashMap<Uid, String>,
}

/// The cached result of an access review, stamped with the upstream versions
/// that produced it.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ReviewRecord {
    pub namespace: String,
    pub namespace_resource_version: Option<String>,
    pub policy_versions: HashMap<Uid, String>,
    pub binding_versions: HashMap<Uid, String>,
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

/// Returns true when the request carries no version information beyond what
/// the last known record already reflects, so the review can be skipped.
pub(crate) fn skip_review(request: &ReviewRequest, last_known: Option<&ReviewRecord>) -> bool {
    // Knowing nothing from a prior review, we have to ask.
    let last_known = match last_known {
        Some(last_known) => last_known,
        None => return false,
    };

    if request.namespace != last_known.namespace {
        return false;
    }

    // A request made relative to a specific namespace version only needs a
    // review if that version moved.
    if let Some(version) = &request.namespace_resource_version {
        if Some(version) != last_known.namespace_resource_version.as_ref() {
            return false;
        }
    }

    // A new policy binding, or a newer version of one, forces a review.
    for (uid, version) in &request.binding_versions {
        if last_known.binding_versions.get(uid) != Some(version) {
            return false;
        }
    }

    // Likewise for policies.
    for (uid, version) in &request.policy_versions {
        if last_known.policy_versions.get(uid) != Some(version) {
            return false;
        }
    }

    true
}

// === impl ReviewRequest ===

impl ReviewRequest {
    pub fn for_namespace(namespace: &Namespace) -> Self {
        Self {
            namespace: namespace.name.clone(),
            namespace_resource_version: Some(namespace.resource_version.clone()),
            ..Self::default()
        }
    }

    pub fn for_policy(policy: &Policy) -> Self {
        Self {
            namespace: policy.namespace.clone(),
            policy_versions: [(policy.uid.clone(), policy.resource_version.clone())]
                .into_iter()
                .collect(),
            ..Self::default()
        }
    }

    pub fn for_policy_binding(binding: &PolicyBinding) -> Self {
        Self {
            namespace: binding.namespace.clone(),
            binding_versions: [(binding.uid.clone(), binding.resource_version.clone())]
                .into_iter()
                .collect(),
            ..Self::default()
        }
    }
}

// === impl ReviewRecord ===

impl ReviewRecord {
    /// Builds the record to cache after a review.
    ///
    /// Version entries are accumulated: the record starts from everything the
    /// prior record knew and only then overlays the versions this request
    /// carries, so a request that only mentions a policy does not erase the
    /// previously-known binding versions, and vice versa.
    pub fn merged(
        request: &ReviewRequest,
        last_known: Option<&ReviewRecord>,
        review: &Review,
    ) -> Self {
        let mut record = Self {
            namespace: request.namespace.clone(),
            users: review.users().to_vec(),
            groups: review.groups().to_vec(),
            ..Self::default()
        };

        if let Some(last_known) = last_known {
            record.namespace_resource_version = last_known.namespace_resource_version.clone();
            record.policy_versions = last_known.policy_versions.clone();
            record.binding_versions = last_known.binding_versions.clone();
        }

        if request.namespace_resource_version.is_some() {
            record.namespace_resource_version = request.namespace_resource_version.clone();
        }
        for (uid, version) in &request.policy_versions {
            record.policy_versions.insert(uid.clone(), version.clone());
        }
        for (uid, version) in &request.binding_versions {
            record
                .binding_versions
                .insert(uid.clone(), version.clone());
        }

        record
    }
}
