use crate::{
    record::{skip_review, ReviewRecord, ReviewRequest},
    skip::{NeverSkip, SkipOracle, StatelessSkip, UnionVersioner},
    store::{SharedStores, Stores, WorkingStores},
    watch::WatcherRegistry,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use project_auth_core::{
    CacheWatcher, ClusterPolicyBindingLister, ClusterPolicyLister, LastSyncResourceVersion,
    Namespace, NamespaceInformer, NamespaceLister, PolicyBindingLister, PolicyLister, Reviewer,
    ScopeEvaluator, UserInfo,
};
use std::{
    collections::BTreeSet,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::time;
use tracing::{debug, instrument, warn};

/// Maintains an index of the namespaces each user and group can access.
///
/// The index is eventually consistent: a single-writer reconcile loop
/// re-derives it from the upstream namespace list and the four policy
/// document sources, while readers query concurrently through [`Self::list`].
pub struct AuthorizationCache {
    namespaces: Arc<dyn NamespaceInformer>,
    reviewer: Arc<dyn Reviewer>,

    cluster_policies: Arc<dyn ClusterPolicyLister>,
    cluster_policy_bindings: Arc<dyn ClusterPolicyBindingLister>,
    policies: Arc<dyn PolicyLister>,
    policy_bindings: Arc<dyn PolicyBindingLister>,

    scopes: Arc<dyn ScopeEvaluator>,

    /// The live stores. Incremental cycles mutate them in place; a full
    /// rebuild replaces the value behind the handle in one swap.
    pub(crate) stores: SharedStores,

    /// Single-writer reconciler state. The mutex serializes cycles; the
    /// periodic task from [`Self::run`] is expected to be the only caller.
    reconciler: Mutex<Reconciler>,

    /// Composite upstream token observed by the last completed cycle. Empty
    /// until the first cycle completes under the steady-state oracle.
    last_state: RwLock<String>,

    watchers: WatcherRegistry,
}

/// State owned by the reconcile loop.
struct Reconciler {
    /// All namespaces seen by the previous cycle, kept to detect deletes.
    all_known_namespaces: HashSet<String>,

    /// Resource versions of the cluster-scoped policy documents. Any
    /// difference forces a full rebuild.
    cluster_policy_versions: HashSet<String>,
    cluster_binding_versions: HashSet<String>,

    skip: Box<dyn SkipOracle>,
}

/// Per-cycle bookkeeping: the membership each namespace was already announced
/// with, so watchers hear about a namespace at most once per cycle unless its
/// membership changes again mid-cycle.
#[derive(Default)]
struct Cycle {
    notified: HashMap<String, (BTreeSet<String>, BTreeSet<String>)>,
}

// === impl AuthorizationCache ===

impl AuthorizationCache {
    pub fn new(
        namespaces: Arc<dyn NamespaceInformer>,
        reviewer: Arc<dyn Reviewer>,
        cluster_policies: Arc<dyn ClusterPolicyLister>,
        cluster_policy_bindings: Arc<dyn ClusterPolicyBindingLister>,
        policies: Arc<dyn PolicyLister>,
        policy_bindings: Arc<dyn PolicyBindingLister>,
        scopes: Arc<dyn ScopeEvaluator>,
    ) -> Self {
        Self {
            namespaces,
            reviewer,
            cluster_policies,
            cluster_policy_bindings,
            policies,
            policy_bindings,
            scopes,
            stores: SharedStores::default(),
            reconciler: Mutex::new(Reconciler {
                all_known_namespaces: HashSet::default(),
                cluster_policy_versions: HashSet::default(),
                cluster_binding_versions: HashSet::default(),
                skip: Box::new(NeverSkip),
            }),
            last_state: RwLock::new(String::new()),
            watchers: WatcherRegistry::default(),
        }
    }

    /// Runs the reconcile loop, one [`Self::synchronize`] cycle per `period`,
    /// forever. The first cycle runs immediately.
    pub async fn run(self: Arc<Self>, period: Duration) {
        self.arm_skip_oracle();

        let mut ticks = time::interval(period);
        loop {
            ticks.tick().await;
            // A panicking reviewer must not take the ticker down with it.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.synchronize())) {
                let panic = panic_message(payload.as_ref());
                warn!(%panic, "synchronize panicked");
            }
        }
    }

    /// Switches from the warm-up never-skip oracle to the steady-state
    /// stateless oracle. Done once, when the loop starts.
    pub(crate) fn arm_skip_oracle(&self) {
        self.reconciler.lock().skip = Box::new(StatelessSkip);
    }

    /// Runs one reconcile cycle over the stores.
    ///
    /// Sequential by design: concurrent callers serialize on the reconciler
    /// lock. Transient upstream errors are logged and the cycle continues;
    /// partial progress is preferable to stalling.
    #[instrument(level = "debug", skip(self))]
    pub fn synchronize(&self) {
        let mut rec = self.reconciler.lock();
        let rec = &mut *rec;

        // If none of the upstream sources changed, there is nothing to do.
        let policy_versioners: [&dyn LastSyncResourceVersion; 4] = [
            &*self.cluster_policies,
            &*self.cluster_policy_bindings,
            &*self.policies,
            &*self.policy_bindings,
        ];
        let policy_versioner = UnionVersioner(&policy_versioners);
        let sources: [&dyn LastSyncResourceVersion; 2] = [&*self.namespaces, &policy_versioner];
        let (skip, current_state) = rec
            .skip
            .skip_synchronize(&self.last_state.read(), &sources);
        if skip {
            debug!("upstream versions unchanged; skipping cycle");
            return;
        }

        // A cluster-scoped policy change invalidates every record: rebuild
        // into fresh stores and swap them in at the end of the cycle.
        // Otherwise update the live stores incrementally.
        let full_rebuild = self.invalidate_cache(rec);
        let mut fresh = full_rebuild.then(Stores::default);
        let mut working = match fresh.as_mut() {
            Some(stores) => WorkingStores::Fresh(stores),
            None => WorkingStores::Live(&self.stores),
        };

        let mut cycle = Cycle::default();
        let new_known = self.synchronize_namespaces(&mut working, &mut cycle);
        self.synchronize_policies(&mut working, &mut cycle);
        self.synchronize_policy_bindings(&mut working, &mut cycle);
        self.purge_deleted_namespaces(&rec.all_known_namespaces, &new_known, &mut working, &mut cycle);

        if let Some(stores) = fresh {
            debug!("swapping fully rebuilt stores");
            *self.stores.write() = stores;
        }
        rec.all_known_namespaces = new_known;
        *self.last_state.write() = current_state;
    }

    /// Detects churn in the cluster-scoped policy documents by comparing the
    /// observed resource-version sets against the previous cycle's.
    fn invalidate_cache(&self, rec: &mut Reconciler) -> bool {
        let mut invalidated = false;

        let cluster_policies = match self.cluster_policies.cluster_policies() {
            Ok(cluster_policies) => cluster_policies,
            Err(error) => {
                warn!(%error, "failed to list cluster policies");
                return invalidated;
            }
        };
        let versions: HashSet<String> = cluster_policies
            .into_iter()
            .map(|policy| policy.resource_version)
            .collect();
        if versions != rec.cluster_policy_versions {
            rec.cluster_policy_versions = versions;
            invalidated = true;
        }

        let cluster_bindings = match self.cluster_policy_bindings.cluster_policy_bindings() {
            Ok(cluster_bindings) => cluster_bindings,
            Err(error) => {
                warn!(%error, "failed to list cluster policy bindings");
                return invalidated;
            }
        };
        let versions: HashSet<String> = cluster_bindings
            .into_iter()
            .map(|binding| binding.resource_version)
            .collect();
        if versions != rec.cluster_binding_versions {
            rec.cluster_binding_versions = versions;
            invalidated = true;
        }

        invalidated
    }

    /// Reviews access for every namespace the informer currently lists,
    /// returning the set of names seen. A namespace whose review fails is
    /// still counted as seen, so it is not mistaken for a delete.
    fn synchronize_namespaces(
        &self,
        stores: &mut WorkingStores<'_>,
        cycle: &mut Cycle,
    ) -> HashSet<String> {
        let mut seen = HashSet::default();
        for namespace in self.namespaces.list() {
            seen.insert(namespace.name.clone());
            let request = ReviewRequest::for_namespace(&namespace);
            if let Err(error) = self.sync_request(&request, stores, cycle) {
                warn!(namespace = %namespace.name, %error, "error synchronizing namespace");
            }
        }
        seen
    }

    fn synchronize_policies(&self, stores: &mut WorkingStores<'_>, cycle: &mut Cycle) {
        let policies = match self.policies.policies() {
            Ok(policies) => policies,
            Err(error) => {
                warn!(%error, "failed to list policies");
                return;
            }
        };
        for policy in policies {
            let request = ReviewRequest::for_policy(&policy);
            if let Err(error) = self.sync_request(&request, stores, cycle) {
                warn!(namespace = %request.namespace, %error, "error synchronizing policy");
            }
        }
    }

    fn synchronize_policy_bindings(&self, stores: &mut WorkingStores<'_>, cycle: &mut Cycle) {
        let bindings = match self.policy_bindings.policy_bindings() {
            Ok(bindings) => bindings,
            Err(error) => {
                warn!(%error, "failed to list policy bindings");
                return;
            }
        };
        for binding in bindings {
            let request = ReviewRequest::for_policy_binding(&binding);
            if let Err(error) = self.sync_request(&request, stores, cycle) {
                warn!(namespace = %request.namespace, %error, "error synchronizing policy binding");
            }
        }
    }

    /// Removes every trace of namespaces that vanished upstream and announces
    /// their now-empty membership to the watchers.
    fn purge_deleted_namespaces(
        &self,
        old_known: &HashSet<String>,
        new_known: &HashSet<String>,
        stores: &mut WorkingStores<'_>,
        cycle: &mut Cycle,
    ) {
        stores.mutate(|stores| {
            let stale: Vec<ReviewRecord> = stores
                .reviews
                .values()
                .filter(|record| !new_known.contains(&record.namespace))
                .cloned()
                .collect();
            for record in stale {
                stores.users.revoke(&record.users, &record.namespace);
                stores.groups.revoke(&record.groups, &record.namespace);
                stores.reviews.remove(&record.namespace);
            }
        });

        for namespace in old_known.difference(new_known) {
            self.notify(cycle, namespace, BTreeSet::new(), BTreeSet::new());
        }
    }

    /// Dispatches one review request against the working stores.
    ///
    /// An evaluation error is surfaced only after the partial result has been
    /// cached; such a review is degraded but still useful.
    fn sync_request(
        &self,
        request: &ReviewRequest,
        stores: &mut WorkingStores<'_>,
        cycle: &mut Cycle,
    ) -> Result<()> {
        let last_known = stores.last_known(&request.namespace);
        if skip_review(request, last_known.as_ref()) {
            return Ok(());
        }

        let review = self.reviewer.review(&request.namespace)?;

        let users: BTreeSet<String> = review.users().iter().cloned().collect();
        let groups: BTreeSet<String> = review.groups().iter().cloned().collect();
        let record = ReviewRecord::merged(request, last_known.as_ref(), &review);

        stores.mutate(|stores| {
            if let Some(last_known) = &last_known {
                let users_to_remove: Vec<String> = last_known
                    .users
                    .iter()
                    .filter(|user| !users.contains(*user))
                    .cloned()
                    .collect();
                let groups_to_remove: Vec<String> = last_known
                    .groups
                    .iter()
                    .filter(|group| !groups.contains(*group))
                    .cloned()
                    .collect();
                stores.users.revoke(&users_to_remove, &request.namespace);
                stores.groups.revoke(&groups_to_remove, &request.namespace);
            }
            stores.users.grant(&users, &request.namespace);
            stores.groups.grant(&groups, &request.namespace);
            stores.reviews.insert(request.namespace.clone(), record);
        });

        self.notify(cycle, &request.namespace, users, groups);

        if let Some(message) = review.evaluation_error() {
            return Err(anyhow!(message.to_string()));
        }
        Ok(())
    }

    /// Fans a membership change out to the watchers, suppressing repeat
    /// announcements with unchanged membership within a cycle.
    fn notify(
        &self,
        cycle: &mut Cycle,
        namespace: &str,
        users: BTreeSet<String>,
        groups: BTreeSet<String>,
    ) {
        if let Some((last_users, last_groups)) = cycle.notified.get(namespace) {
            if *last_users == users && *last_groups == groups {
                return;
            }
        }
        self.watchers.notify(namespace, &users, &groups);
        cycle.notified.insert(namespace.to_string(), (users, groups));
    }

    /// Returns the namespaces `user` may list, in name order.
    ///
    /// Namespaces that disappeared between the cache and the informer read
    /// are silently dropped.
    pub fn list(&self, user: &dyn UserInfo) -> Result<Vec<Namespace>> {
        let mut keys = BTreeSet::new();
        {
            let stores = self.stores.read();
            if let Some(namespaces) = stores.users.namespaces(user.name()) {
                keys.extend(namespaces.iter().cloned());
            }
            for group in user.groups() {
                if let Some(namespaces) = stores.groups.namespaces(group) {
                    keys.extend(namespaces.iter().cloned());
                }
            }
        }

        let visible = self
            .scopes
            .visible_namespaces(user.scopes(), &*self.cluster_policies)?;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(namespace) = self.namespaces.get(&key)? {
                if visible.contains(&namespace.name) {
                    items.push(namespace);
                }
            }
        }
        Ok(items)
    }

    /// True once a reconcile cycle has completed under the steady-state
    /// oracle.
    pub fn ready_for_access(&self) -> bool {
        !self.last_state.read().is_empty()
    }

    pub fn add_watcher(&self, watcher: Arc<dyn CacheWatcher>) {
        self.watchers.add(watcher);
    }

    pub fn remove_watcher(&self, watcher: &Arc<dyn CacheWatcher>) {
        self.watchers.remove(watcher);
    }

    /// Shares the cluster policy lister handle the cache itself reads, so
    /// callers evaluate scopes against the same snapshot.
    pub fn cluster_policy_lister(&self) -> Arc<dyn ClusterPolicyLister> {
        self.cluster_policies.clone()
    }
}

impl NamespaceLister for AuthorizationCache {
    fn list(&self, user: &dyn UserInfo) -> Result<Vec<Namespace>> {
        Self::list(self, user)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
