use parking_lot::Mutex;
use project_auth_core::CacheWatcher;
use std::{collections::BTreeSet, sync::Arc};

/// Registered membership watchers.
///
/// Fan-out runs synchronously under the registry lock, which is only
/// reasonable while the watcher count stays in the single digits; watchers
/// must not block.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    watchers: Mutex<Vec<Arc<dyn CacheWatcher>>>,
}

// === impl WatcherRegistry ===

impl WatcherRegistry {
    pub fn add(&self, watcher: Arc<dyn CacheWatcher>) {
        self.watchers.lock().push(watcher);
    }

    /// Removes a watcher by identity, preserving the order of the rest.
    pub fn remove(&self, watcher: &Arc<dyn CacheWatcher>) {
        let mut watchers = self.watchers.lock();
        if let Some(i) = watchers.iter().position(|w| Arc::ptr_eq(w, watcher)) {
            watchers.remove(i);
        }
    }

    pub fn notify(&self, namespace: &str, users: &BTreeSet<String>, groups: &BTreeSet<String>) {
        for watcher in self.watchers.lock().iter() {
            watcher.group_membership_changed(namespace, users, groups);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl CacheWatcher for Recording {
        fn group_membership_changed(
            &self,
            namespace: &str,
            _users: &BTreeSet<String>,
            _groups: &BTreeSet<String>,
        ) {
            self.0.lock().push(namespace.to_string());
        }
    }

    #[test]
    fn notifies_every_registered_watcher() {
        let registry = WatcherRegistry::default();
        let (first, second) = (Arc::new(Recording::default()), Arc::new(Recording::default()));
        registry.add(first.clone());
        registry.add(second.clone());

        registry.notify("ns-a", &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(*first.0.lock(), ["ns-a"]);
        assert_eq!(*second.0.lock(), ["ns-a"]);
    }

    #[test]
    fn removes_by_identity() {
        let registry = WatcherRegistry::default();
        let (first, second) = (Arc::new(Recording::default()), Arc::new(Recording::default()));
        let first: Arc<dyn CacheWatcher> = first;
        registry.add(first.clone());
        registry.add(second.clone());

        registry.remove(&first);
        registry.notify("ns-a", &BTreeSet::new(), &BTreeSet::new());

        assert_eq!(*second.0.lock(), ["ns-a"]);
    }
}
