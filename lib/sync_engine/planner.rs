use std::collections::HashSet;
use std::future::Future;

use super::error::PlanningError;
use super::types::EntityKey;

/// Split of a target set against what the store already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPlan<K> {
    /// Targets already present; they succeed without an external call.
    pub satisfied: Vec<K>,
    /// Targets that need a fetch, in target order.
    pub fetch: Vec<K>,
}

impl<K> DiffPlan<K> {
    pub fn is_noop(&self) -> bool {
        self.fetch.is_empty()
    }
}

/// Computes `fetch = targets - existing` and `satisfied = targets ∩ existing`.
pub fn plan<K: EntityKey>(targets: &[K], existing: &HashSet<K>) -> DiffPlan<K> {
    let (satisfied, fetch) = targets
        .iter()
        .cloned()
        .partition(|key| existing.contains(key));
    DiffPlan { satisfied, fetch }
}

/// Drops repeated keys, keeping the first occurrence.
pub fn dedupe_keys<K: EntityKey>(keys: Vec<K>) -> Vec<K> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Where a resolved target set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOrigin {
    Explicit,
    Override,
    Store,
}

impl TargetOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Override => "override",
            Self::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTargets<K> {
    pub keys: Vec<K>,
    pub origin: TargetOrigin,
}

/// Target cascade: explicit caller list, then the configured override list, then a store query.
///
/// An explicit list that is empty counts as absent, as does an empty override list.
/// `store_query` is only awaited when both are absent.
pub async fn resolve_targets<K, E, F, Fut>(
    explicit: Option<Vec<K>>,
    override_keys: &[K],
    store_query: F,
) -> Result<ResolvedTargets<K>, PlanningError>
where
    K: EntityKey,
    E: std::fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<K>, E>>,
{
    if let Some(keys) = explicit.filter(|keys| !keys.is_empty()) {
        return Ok(ResolvedTargets {
            keys,
            origin: TargetOrigin::Explicit,
        });
    }

    if !override_keys.is_empty() {
        return Ok(ResolvedTargets {
            keys: override_keys.to_vec(),
            origin: TargetOrigin::Override,
        });
    }

    let keys = store_query()
        .await
        .map_err(|err| PlanningError::TargetResolution(err.to_string()))?;
    Ok(ResolvedTargets {
        keys,
        origin: TargetOrigin::Store,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::{dedupe_keys, plan, resolve_targets, TargetOrigin};
    use crate::sync_engine::error::PlanningError;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn fetch_set_is_targets_minus_existing_in_target_order() {
        let targets = keys(&["A", "B", "C", "D"]);
        let existing: HashSet<String> = keys(&["C", "A", "Z"]).into_iter().collect();

        let plan = plan(&targets, &existing);

        assert_eq!(plan.fetch, keys(&["B", "D"]));
        assert_eq!(plan.satisfied, keys(&["A", "C"]));
        assert!(!plan.is_noop());
    }

    #[test]
    fn fully_satisfied_plan_is_noop() {
        let targets = keys(&["A", "B"]);
        let existing: HashSet<String> = targets.iter().cloned().collect();
        assert!(plan(&targets, &existing).is_noop());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        assert_eq!(
            dedupe_keys(keys(&["B", "A", "B", "C", "A"])),
            keys(&["B", "A", "C"])
        );
    }

    #[tokio::test]
    async fn explicit_targets_win_without_querying_store() {
        let queried = AtomicBool::new(false);
        let resolved = resolve_targets(Some(keys(&["X"])), &keys(&["Y"]), || async {
            queried.store(true, Ordering::SeqCst);
            Ok::<_, String>(keys(&["Z"]))
        })
        .await
        .expect("explicit targets should resolve");

        assert_eq!(resolved.keys, keys(&["X"]));
        assert_eq!(resolved.origin, TargetOrigin::Explicit);
        assert!(!queried.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn override_is_used_when_no_explicit_targets() {
        let resolved = resolve_targets(Some(Vec::new()), &keys(&["Y"]), || async {
            Ok::<_, String>(keys(&["Z"]))
        })
        .await
        .expect("override should resolve");

        assert_eq!(resolved.keys, keys(&["Y"]));
        assert_eq!(resolved.origin, TargetOrigin::Override);
    }

    #[tokio::test]
    async fn store_query_is_the_last_resort() {
        let resolved = resolve_targets(None, &[], || async { Ok::<_, String>(keys(&["Z"])) })
            .await
            .expect("store targets should resolve");
        assert_eq!(resolved.keys, keys(&["Z"]));
        assert_eq!(resolved.origin, TargetOrigin::Store);
    }

    #[tokio::test]
    async fn store_query_failure_is_a_planning_error() {
        let err = resolve_targets::<String, _, _, _>(None, &[], || async {
            Err("connection refused".to_string())
        })
        .await
        .expect_err("store failure should surface");
        assert_eq!(
            err,
            PlanningError::TargetResolution("connection refused".to_string())
        );
    }
}
