use crate::record::ReviewRecord;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};

/// The handle through which readers reach the current stores.
///
/// Incremental cycles mutate the stores behind this handle in short
/// write-lock holds; a full rebuild replaces the whole `Stores` value in a
/// single swap.
pub(crate) type SharedStores = Arc<RwLock<Stores>>;

/// The three interlinked indices the reconciler keeps consistent: review
/// records by namespace, and the inverse user and group footprints.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Stores {
    pub reviews: HashMap<String, ReviewRecord>,
    pub users: SubjectIndex,
    pub groups: SubjectIndex,
}

/// Subject name to the ordered set of namespaces the subject can access.
///
/// A subject with an empty namespace set is never stored: `revoke` deletes
/// the record when its last namespace is removed.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SubjectIndex(HashMap<String, BTreeSet<String>>);

/// The reconciler's view of the stores for one cycle: the live handle during
/// incremental cycles, or a private rebuild target that is swapped in once
/// the cycle completes.
pub(crate) enum WorkingStores<'a> {
    Live(&'a SharedStores),
    Fresh(&'a mut Stores),
}

// === impl SubjectIndex ===

impl SubjectIndex {
    pub fn namespaces(&self, subject: &str) -> Option<&BTreeSet<String>> {
        self.0.get(subject)
    }

    /// Adds `namespace` to each subject's footprint, creating records as
    /// needed.
    pub fn grant<'a>(
        &mut self,
        subjects: impl IntoIterator<Item = &'a String>,
        namespace: &str,
    ) {
        for subject in subjects {
            self.0
                .entry(subject.clone())
                .or_default()
                .insert(namespace.to_string());
        }
    }

    /// Removes `namespace` from each subject's footprint, deleting subject
    /// records whose namespace set becomes empty.
    pub fn revoke<'a>(
        &mut self,
        subjects: impl IntoIterator<Item = &'a String>,
        namespace: &str,
    ) {
        for subject in subjects {
            if let Some(namespaces) = self.0.get_mut(subject) {
                namespaces.remove(namespace);
                if namespaces.is_empty() {
                    self.0.remove(subject);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// === impl WorkingStores ===

impl WorkingStores<'_> {
    /// The last cached review of `namespace`, if any. During a rebuild this
    /// reads the fresh stores, so every namespace is reviewed again.
    pub fn last_known(&self, namespace: &str) -> Option<ReviewRecord> {
        match self {
            Self::Live(handle) => handle.read().reviews.get(namespace).cloned(),
            Self::Fresh(stores) => stores.reviews.get(namespace).cloned(),
        }
    }

    /// Applies one batch of mutations. Live batches hold the write lock for
    /// the whole closure, so readers never observe a half-applied update.
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut Stores) -> R) -> R {
        match self {
            Self::Live(handle) => f(&mut handle.write()),
            Self::Fresh(stores) => f(stores),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grant_and_revoke_maintain_footprints() {
        let mut index = SubjectIndex::default();
        let subjects = vec!["alice".to_string(), "bob".to_string()];

        index.grant(&subjects, "ns-a");
        index.grant(&subjects[..1], "ns-b");

        assert_eq!(
            index.namespaces("alice").unwrap().iter().collect::<Vec<_>>(),
            ["ns-a", "ns-b"]
        );
        assert_eq!(
            index.namespaces("bob").unwrap().iter().collect::<Vec<_>>(),
            ["ns-a"]
        );

        index.revoke(&subjects, "ns-a");
        assert_eq!(
            index.namespaces("alice").unwrap().iter().collect::<Vec<_>>(),
            ["ns-b"]
        );
        // Bob's footprint became empty, so his record is gone.
        assert!(index.namespaces("bob").is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn revoking_an_unknown_subject_is_a_noop() {
        let mut index = SubjectIndex::default();
        index.revoke(&vec!["ghost".to_string()], "ns-a");
        assert_eq!(index.len(), 0);
    }
}
