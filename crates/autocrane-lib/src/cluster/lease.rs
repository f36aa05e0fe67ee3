//! Lease-based leader election
//!
//! A single elected replica performs all mutating work. A background task
//! claims and renews a `coordination.k8s.io/v1` Lease; the orchestrator
//! loop observes the outcome through a [`LeadershipHandle`] every
//! iteration. A lost renewal demotes the replica to follower without
//! terminating the task; only cancellation ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Observed state of the background lease task
pub trait LeadershipHandle: Send + Sync {
    /// Whether this replica currently holds the lease.
    fn is_leader(&self) -> bool;

    /// Whether the background task has terminated. The task only ends on
    /// cancellation, so termination while running is a fault.
    fn is_completed(&self) -> bool;
}

/// Starts the leader-election background task
pub trait LeaderElector: Send + Sync {
    fn start(
        &self,
        lease_name: &str,
        renewal: Duration,
        cancel: CancellationToken,
    ) -> Arc<dyn LeadershipHandle>;
}

/// Leader elector claiming a Kubernetes Lease object
pub struct KubeLeaderElector {
    client: Client,
    namespace: String,
    identity: String,
}

impl KubeLeaderElector {
    pub fn new(client: Client, namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            identity: identity.into(),
        }
    }
}

struct KubeLeadershipHandle {
    leader: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LeadershipHandle for KubeLeadershipHandle {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn is_completed(&self) -> bool {
        self.task.is_finished()
    }
}

impl LeaderElector for KubeLeaderElector {
    fn start(
        &self,
        lease_name: &str,
        renewal: Duration,
        cancel: CancellationToken,
    ) -> Arc<dyn LeadershipHandle> {
        let leader = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(renew_loop(
            Api::namespaced(self.client.clone(), &self.namespace),
            lease_name.to_string(),
            self.identity.clone(),
            renewal,
            cancel,
            leader.clone(),
        ));
        Arc::new(KubeLeadershipHandle { leader, task })
    }
}

async fn renew_loop(
    leases: Api<Lease>,
    name: String,
    identity: String,
    renewal: Duration,
    cancel: CancellationToken,
    leader: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(renewal);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                leader.store(false, Ordering::SeqCst);
                info!(lease = %name, "Leader election task stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        match try_acquire(&leases, &name, &identity, renewal).await {
            Ok(acquired) => {
                let previous = leader.swap(acquired, Ordering::SeqCst);
                if previous != acquired {
                    if acquired {
                        info!(lease = %name, identity = %identity, "Acquired leadership");
                    } else {
                        info!(lease = %name, identity = %identity, "Lost leadership");
                    }
                }
            }
            Err(e) => {
                leader.store(false, Ordering::SeqCst);
                warn!(lease = %name, error = %e, "Lease renewal failed");
            }
        }
    }
}

/// Whether the lease can be claimed by `identity` at `now`: unheld, held by
/// us, or held by another replica whose renewal has expired.
fn lease_is_claimable(
    spec: &LeaseSpec,
    identity: &str,
    now: DateTime<Utc>,
    fallback_duration_seconds: i64,
) -> bool {
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder.is_empty() || holder == identity {
        return true;
    }
    let duration = spec
        .lease_duration_seconds
        .map(i64::from)
        .unwrap_or(fallback_duration_seconds);
    match &spec.renew_time {
        Some(renewed) => now.signed_duration_since(renewed.0).num_seconds() > duration,
        None => true,
    }
}

async fn try_acquire(
    leases: &Api<Lease>,
    name: &str,
    identity: &str,
    renewal: Duration,
) -> Result<bool> {
    let duration_seconds = (renewal.as_secs().max(1) as i32) * 2;
    let now = Utc::now();

    let Some(existing) = leases.get_opt(name).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                lease_duration_seconds: Some(duration_seconds),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
            }),
        };
        return match leases.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // Another replica created it first.
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        };
    };

    let spec = existing.spec.unwrap_or_default();
    if !lease_is_claimable(&spec, identity, now, i64::from(duration_seconds)) {
        return Ok(false);
    }

    let previous_holder = spec.holder_identity.as_deref().unwrap_or_default();
    let takeover = !previous_holder.is_empty() && previous_holder != identity;
    let transitions = spec.lease_transitions.unwrap_or(0) + i32::from(takeover);
    let acquire_time = if takeover || spec.acquire_time.is_none() {
        Some(MicroTime(now))
    } else {
        spec.acquire_time
    };

    let patch = Lease {
        metadata: ObjectMeta::default(),
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(duration_seconds),
            acquire_time,
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
        }),
    };

    match leases
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        // Lost a concurrent renewal race; stay follower this round.
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: Option<&str>, renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(String::from),
            lease_duration_seconds: Some(duration),
            acquire_time: None,
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            lease_transitions: Some(0),
        }
    }

    #[test]
    fn test_unheld_lease_is_claimable() {
        assert!(lease_is_claimable(&spec(None, 0, 60), "me", Utc::now(), 60));
        assert!(lease_is_claimable(&spec(Some(""), 0, 60), "me", Utc::now(), 60));
    }

    #[test]
    fn test_own_lease_is_always_claimable() {
        assert!(lease_is_claimable(&spec(Some("me"), 0, 60), "me", Utc::now(), 60));
    }

    #[test]
    fn test_fresh_foreign_lease_is_not_claimable() {
        assert!(!lease_is_claimable(&spec(Some("other"), 10, 60), "me", Utc::now(), 60));
    }

    #[test]
    fn test_expired_foreign_lease_is_claimable() {
        assert!(lease_is_claimable(&spec(Some("other"), 120, 60), "me", Utc::now(), 60));
    }

    #[test]
    fn test_foreign_lease_without_renew_time_is_claimable() {
        let mut stale = spec(Some("other"), 0, 60);
        stale.renew_time = None;
        assert!(lease_is_claimable(&stale, "me", Utc::now(), 60));
    }
}
