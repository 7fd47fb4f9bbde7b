use project_auth_core::LastSyncResourceVersion;

/// Decides whether a reconcile cycle can be short-circuited given the
/// composite resource-version token of the upstream sources.
pub(crate) trait SkipOracle: Send + Sync {
    /// Returns `(skip, current_state)` for the previous state token and the
    /// current version-carrying sources.
    fn skip_synchronize(
        &self,
        prev_state: &str,
        sources: &[&dyn LastSyncResourceVersion],
    ) -> (bool, String);
}

/// Steady-state oracle: skip iff no source token changed since the previous
/// cycle. Pure in its inputs.
pub(crate) struct StatelessSkip;

/// Warm-up oracle, in effect until the reconcile loop starts: never skips and
/// reports an empty state token, so a manual warm-up cycle always runs and
/// does not mark the cache ready.
pub(crate) struct NeverSkip;

/// Folds several versioned sources into one token.
pub(crate) struct UnionVersioner<'a>(pub(crate) &'a [&'a dyn LastSyncResourceVersion]);

// === impl StatelessSkip ===

impl SkipOracle for StatelessSkip {
    fn skip_synchronize(
        &self,
        prev_state: &str,
        sources: &[&dyn LastSyncResourceVersion],
    ) -> (bool, String) {
        let current_state = sources
            .iter()
            .map(|source| source.last_sync_resource_version())
            .collect::<Vec<_>>()
            .join(",");
        (current_state == prev_state, current_state)
    }
}

// === impl NeverSkip ===

impl SkipOracle for NeverSkip {
    fn skip_synchronize(
        &self,
        _prev_state: &str,
        _sources: &[&dyn LastSyncResourceVersion],
    ) -> (bool, String) {
        (false, String::new())
    }
}

// === impl UnionVersioner ===

impl LastSyncResourceVersion for UnionVersioner<'_> {
    fn last_sync_resource_version(&self) -> String {
        self.0
            .iter()
            .map(|source| source.last_sync_resource_version())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixed(&'static str);

    impl LastSyncResourceVersion for Fixed {
        fn last_sync_resource_version(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn stateless_joins_tokens_with_commas() {
        let (a, b) = (Fixed("12"), Fixed("34"));
        let sources: [&dyn LastSyncResourceVersion; 2] = [&a, &b];

        let (skip, state) = StatelessSkip.skip_synchronize("", &sources);
        assert!(!skip);
        assert_eq!(state, "12,34");

        let (skip, state) = StatelessSkip.skip_synchronize("12,34", &sources);
        assert!(skip);
        assert_eq!(state, "12,34");
    }

    #[test]
    fn stateless_is_pure() {
        let (a, b) = (Fixed("7"), Fixed("8"));
        let sources: [&dyn LastSyncResourceVersion; 2] = [&a, &b];

        let first = StatelessSkip.skip_synchronize("7,9", &sources);
        let second = StatelessSkip.skip_synchronize("7,9", &sources);
        assert_eq!(first, second);
    }

    #[test]
    fn never_skip_reports_empty_state() {
        let a = Fixed("55");
        let sources: [&dyn LastSyncResourceVersion; 1] = [&a];

        let (skip, state) = NeverSkip.skip_synchronize("55", &sources);
        assert!(!skip);
        assert_eq!(state, "");
    }

    #[test]
    fn union_concatenates_member_tokens() {
        let (a, b, c) = (Fixed("1"), Fixed("2"), Fixed("3"));
        let members: [&dyn LastSyncResourceVersion; 3] = [&a, &b, &c];
        assert_eq!(UnionVersioner(&members).last_sync_resource_version(), "123");
    }
}
