//! Controller status record
//!
//! The orchestration loop records what it last did: whether it holds the
//! lease, when the manifest was last fetched, how the last iteration went,
//! and whether a terminal condition has been hit. Probe verdicts are
//! derived from that record. A replica stays live until it is about to
//! exit abnormally; followers count as ready warm standbys, while a leader
//! that has never fetched the manifest cannot steer anything and reports
//! not ready.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Whether this replica currently holds the orchestration lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
}

/// Outcome of the most recent completed iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub completed_unix: i64,
    pub namespaces: usize,
    pub pods: usize,
    pub patches: usize,
    pub evictions: usize,
}

/// Probe verdict served on the liveness and readiness endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProbeResult {
    fn passing() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn failing(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

/// Full controller state as served on /statusz
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub role: Role,
    pub started: bool,
    pub consecutive_errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_iteration: Option<IterationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_fetched_unix: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminating: Option<String>,
}

#[derive(Debug, Default)]
struct StatusInner {
    started: bool,
    leader: bool,
    consecutive_errors: u32,
    last_error: Option<String>,
    last_iteration: Option<IterationRecord>,
    manifest_fetched_unix: Option<i64>,
    manifest_error: Option<String>,
    terminating: Option<String>,
}

/// Shared record of the orchestration loop's progress
///
/// Cloning is cheap; all clones observe the same record.
#[derive(Debug, Clone, Default)]
pub struct ControllerStatus {
    inner: Arc<RwLock<StatusInner>>,
}

impl ControllerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The loop passed startup validation and entered its first iteration.
    pub fn mark_started(&self) {
        self.write().started = true;
    }

    pub fn record_leadership(&self, leader: bool) {
        self.write().leader = leader;
    }

    /// The loop is about to exit abnormally; both probes fail from here on.
    pub fn record_terminal(&self, reason: &str) {
        self.write().terminating = Some(reason.to_string());
    }

    pub fn record_manifest_success(&self, fetched_unix: i64) {
        let mut inner = self.write();
        inner.manifest_fetched_unix = Some(fetched_unix);
        inner.manifest_error = None;
    }

    pub fn record_manifest_failure(&self, error: &str) {
        self.write().manifest_error = Some(error.to_string());
    }

    /// A full iteration succeeded, ending any error streak.
    pub fn record_iteration(&self, record: IterationRecord) {
        let mut inner = self.write();
        inner.consecutive_errors = 0;
        inner.last_error = None;
        inner.last_iteration = Some(record);
    }

    /// An iteration failed; `consecutive` is the loop's authoritative
    /// streak counter.
    pub fn record_iteration_error(&self, error: &str, consecutive: u32) {
        let mut inner = self.write();
        inner.consecutive_errors = consecutive;
        inner.last_error = Some(error.to_string());
    }

    /// Live until a terminal condition is recorded.
    pub fn liveness(&self) -> ProbeResult {
        match &self.read().terminating {
            Some(reason) => ProbeResult::failing(format!("terminating: {reason}")),
            None => ProbeResult::passing(),
        }
    }

    /// Ready once the loop has started, unless terminating. A leader with
    /// no successful manifest fetch yet is not ready.
    pub fn readiness(&self) -> ProbeResult {
        let inner = self.read();
        if let Some(reason) = &inner.terminating {
            return ProbeResult::failing(format!("terminating: {reason}"));
        }
        if !inner.started {
            return ProbeResult::failing("orchestration loop has not started".to_string());
        }
        if inner.leader && inner.manifest_fetched_unix.is_none() {
            let detail = inner
                .manifest_error
                .as_deref()
                .unwrap_or("no fetch attempted yet");
            return ProbeResult::failing(format!("manifest never fetched: {detail}"));
        }
        ProbeResult::passing()
    }

    pub fn report(&self) -> StatusReport {
        let inner = self.read();
        StatusReport {
            role: if inner.leader {
                Role::Leader
            } else {
                Role::Follower
            },
            started: inner.started,
            consecutive_errors: inner.consecutive_errors,
            last_error: inner.last_error.clone(),
            last_iteration: inner.last_iteration.clone(),
            manifest_fetched_unix: inner.manifest_fetched_unix,
            manifest_error: inner.manifest_error.clone(),
            terminating: inner.terminating.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusInner> {
        self.inner.read().expect("status lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusInner> {
        self.inner.write().expect("status lock poisoned")
    }
}
