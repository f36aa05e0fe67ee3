//! Upgrade oracle
//!
//! Pure decision function producing per (pod, repository) data version
//! targets. All decisions are computed at construction time from the inputs
//! and never change afterwards, so repeated lookups always agree. The
//! oracle performs no I/O and owns no state beyond a single iteration; the
//! orchestrator builds a fresh one every cycle.

use std::collections::{BTreeMap, HashMap};

use crate::manifest::DataRepositoryManifest;
use crate::models::{DataDownloadRequestDetails, PodDataRequestInfo, PodIdentifier, VersionMap};

/// How many pods per (namespace, repository) may hold the rollout target
/// while it is not yet known good: a third of the consumers, rounded up.
fn rollout_cap(consumers: usize) -> usize {
    consumers.div_ceil(3)
}

/// Per-iteration upgrade decisions for every pod in a namespace
pub struct UpgradeOracle {
    decisions: HashMap<PodIdentifier, BTreeMap<String, DataDownloadRequestDetails>>,
}

impl UpgradeOracle {
    /// Compute decisions for all pods.
    ///
    /// Pods are considered in the iteration order of `requests`; the staged
    /// rollout gate counts pods already holding the target version plus the
    /// upgrades granted earlier in the same pass.
    pub fn new(
        manifest: &DataRepositoryManifest,
        known_good: &VersionMap,
        latest: &VersionMap,
        requests: &[PodDataRequestInfo],
    ) -> Self {
        let mut consumers: BTreeMap<&str, usize> = BTreeMap::new();
        let mut in_flight: BTreeMap<&str, usize> = BTreeMap::new();
        for info in requests {
            for repo in &info.data_sources {
                *consumers.entry(repo.as_str()).or_default() += 1;
                if let Some(target) = latest.get(repo.as_str()) {
                    let at_target = info
                        .request_details(repo)
                        .is_some_and(|cur| &cur.hash == target);
                    if at_target {
                        *in_flight.entry(repo.as_str()).or_default() += 1;
                    }
                }
            }
        }

        let mut decisions: HashMap<PodIdentifier, BTreeMap<String, DataDownloadRequestDetails>> =
            HashMap::new();

        for info in requests {
            for repo in &info.data_sources {
                let kg = known_good.get(repo.as_str()).map(String::as_str);
                let lt = latest.get(repo.as_str()).map(String::as_str);
                let current = info.request_details(repo);
                let cur = current.as_ref().map(|details| details.hash.as_str());

                let desired = match (kg, lt, cur) {
                    // Nothing known for this repo, nothing to propose.
                    (None, None, _) => None,
                    // No current request: seed with known-good when we have
                    // one, otherwise stage the pod toward the target.
                    (Some(kg), _, None) => Some(kg),
                    (None, Some(lt), None) => Some(lt),
                    // Already at the rollout target.
                    (_, Some(lt), Some(cur)) if cur == lt => None,
                    // At known-good with a newer target published.
                    (Some(_), Some(lt), Some(cur)) if Some(cur) == kg => Some(lt),
                    // At known-good and no target is known.
                    (Some(_), None, Some(cur)) if Some(cur) == kg => None,
                    // Holding a version that is neither known-good nor the
                    // target: roll back.
                    (Some(kg), _, Some(_)) => Some(kg),
                    (None, Some(_), Some(_)) => None,
                };

                let Some(target) = desired else { continue };

                // The rollout gate bounds how many pods may run the target
                // version while it has not been promoted to known-good.
                let staged_upgrade = Some(target) == lt && kg != lt;
                if staged_upgrade {
                    let cap = rollout_cap(consumers.get(repo.as_str()).copied().unwrap_or(0));
                    let count = in_flight.entry(repo.as_str()).or_default();
                    if *count >= cap {
                        continue;
                    }
                    *count += 1;
                }

                // Known-good and latest values are validated against the
                // manifest by the accessors; a missing entry means the
                // inputs disagree and we propose nothing.
                let Some(entry) = manifest.entry(repo, target) else {
                    continue;
                };

                decisions.entry(info.id.clone()).or_default().insert(
                    repo.clone(),
                    DataDownloadRequestDetails {
                        hash: target.to_string(),
                        path: entry.path.clone(),
                        // Stamped by the orchestrator when the request is
                        // written.
                        unix_timestamp_seconds: 0,
                    },
                );
            }
        }

        Self { decisions }
    }

    /// Proposed new download request for a pod and repository, or `None`
    /// when the current request should stand.
    pub fn get_data_request(
        &self,
        pod: &PodIdentifier,
        repo: &str,
    ) -> Option<DataDownloadRequestDetails> {
        self.decisions.get(pod)?.get(repo).cloned()
    }
}
