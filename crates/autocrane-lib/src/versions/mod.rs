//! Per-namespace data version state
//!
//! Two maps are maintained for every namespace: the known-good versions a
//! fleet can safely fall back to, and the latest versions the rollout is
//! steering toward. Both are persisted as annotations on a per-namespace
//! sentinel object and refreshed every orchestration iteration.

mod known_good;
mod latest;

pub use known_good::KnownGoodAccessor;
pub use latest::LatestVersionAccessor;

use tracing::warn;

use crate::models::VersionMap;

/// Parse a persisted version map, treating malformed payloads as empty.
fn parse_version_map(raw: Option<String>) -> VersionMap {
    let Some(raw) = raw else {
        return VersionMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Discarding malformed persisted version map");
            VersionMap::new()
        }
    }
}

fn encode_version_map(map: &VersionMap) -> String {
    serde_json::to_string(map).expect("version map serialize")
}
