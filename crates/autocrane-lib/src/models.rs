//! Core data model for AutoCrane

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Annotation keys understood by AutoCrane components.
///
/// Downstream consumers (the download agent, watchdog probes) depend on
/// these exact strings; changing them is a breaking wire change.
pub mod annotations {
    /// Prefix for per-repository download request payloads. The repository
    /// name is appended, e.g. `data.autocrane/req-models`.
    pub const REQUEST_PREFIX: &str = "data.autocrane/req-";

    /// Comma-separated list of data repositories a pod consumes.
    pub const DATA_SOURCES: &str = "data.autocrane/sources";

    /// Folder the download agent drops fetched blobs into.
    pub const DROP_FOLDER: &str = "data.autocrane/drop-folder";

    /// Unix-seconds deadline after which a workload object is garbage
    /// collected.
    pub const EXPIRES: &str = "data.autocrane/expires";

    /// Known-good version map on the per-namespace sentinel object.
    pub const KNOWN_GOOD: &str = "data.autocrane/known-good";

    /// Latest version map on the per-namespace sentinel object.
    pub const LATEST: &str = "data.autocrane/latest";

    /// Prefix for watchdog status annotations written by probes. Values
    /// starting with `error` mark the pod as failing that watchdog.
    pub const WATCHDOG_PREFIX: &str = "status.autocrane/";

    /// Request annotation key for a repository.
    pub fn request_key(repo: &str) -> String {
        format!("{REQUEST_PREFIX}{repo}")
    }
}

/// Identity of a pod within the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodIdentifier {
    pub namespace: String,
    pub name: String,
}

impl PodIdentifier {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single data download request as transported in a pod annotation.
///
/// Serialized as base64-encoded JSON with camelCase field names; the
/// download agent parses the exact same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDownloadRequestDetails {
    /// Version identifier of the blob to fetch.
    pub hash: String,
    /// Repository-relative path of the blob.
    pub path: String,
    /// Time the request was issued, unix seconds.
    pub unix_timestamp_seconds: i64,
}

impl DataDownloadRequestDetails {
    /// Encode as the annotation wire format.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("request details serialize");
        BASE64.encode(json)
    }

    /// Decode from the annotation wire format.
    ///
    /// Malformed payloads yield `None`; the caller treats the request as
    /// unset and re-proposes a target.
    pub fn decode(value: &str) -> Option<Self> {
        let bytes = match BASE64.decode(value.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Request annotation is not valid base64");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(details) => Some(details),
            Err(e) => {
                error!(error = %e, "Request annotation payload is not valid JSON");
                None
            }
        }
    }
}

/// Per-pod data request state read from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDataRequestInfo {
    pub id: PodIdentifier,
    /// Folder the download agent writes into; empty means the pod is not a
    /// data consumer this cycle.
    pub drop_folder: String,
    /// Authoritative enumeration of repositories this pod wants.
    pub data_sources: Vec<String>,
    /// Last-written encoded request per repository.
    pub requests: BTreeMap<String, String>,
}

impl PodDataRequestInfo {
    /// Parsed request details for a repository, if present and well formed.
    pub fn request_details(&self, repo: &str) -> Option<DataDownloadRequestDetails> {
        self.requests
            .get(repo)
            .and_then(|value| DataDownloadRequestDetails::decode(value))
    }
}

/// A concrete unit of work for the download agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataDownloadRequest {
    pub pod: PodIdentifier,
    pub repo: String,
    pub drop_folder: String,
    /// Where the blob is extracted: the drop folder joined with the
    /// sanitized blob path. Empty when no valid target exists yet.
    pub extraction_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<DataDownloadRequestDetails>,
}

/// Mapping of repository name to version string, scoped to a namespace.
pub type VersionMap = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_identifier_display() {
        let pod = PodIdentifier::new("prod", "web-0");
        assert_eq!(pod.to_string(), "prod/web-0");
    }

    #[test]
    fn test_request_details_roundtrip() {
        let details = DataDownloadRequestDetails {
            hash: "v2".to_string(),
            path: "models/weights.tar".to_string(),
            unix_timestamp_seconds: 1_700_000_000,
        };

        let encoded = details.encode();
        let decoded = DataDownloadRequestDetails::decode(&encoded).unwrap();
        assert_eq!(decoded, details);
    }

    #[test]
    fn test_request_details_wire_format_is_camel_case() {
        let details = DataDownloadRequestDetails {
            hash: "v1".to_string(),
            path: "p".to_string(),
            unix_timestamp_seconds: 7,
        };

        let json = BASE64.decode(details.encode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["hash"], "v1");
        assert_eq!(value["path"], "p");
        assert_eq!(value["unixTimestampSeconds"], 7);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(DataDownloadRequestDetails::decode("not-base64!!!").is_none());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let encoded = BASE64.encode(b"{not json");
        assert!(DataDownloadRequestDetails::decode(&encoded).is_none());
    }

    #[test]
    fn test_request_details_from_pod_info() {
        let details = DataDownloadRequestDetails {
            hash: "v3".to_string(),
            path: "maps/tiles.bin".to_string(),
            unix_timestamp_seconds: 42,
        };
        let mut info = PodDataRequestInfo {
            id: PodIdentifier::new("prod", "web-0"),
            drop_folder: "/data".to_string(),
            data_sources: vec!["maps".to_string()],
            requests: BTreeMap::new(),
        };
        info.requests.insert("maps".to_string(), details.encode());

        assert_eq!(info.request_details("maps"), Some(details));
        assert_eq!(info.request_details("absent"), None);
    }

    #[test]
    fn test_request_key() {
        assert_eq!(annotations::request_key("maps"), "data.autocrane/req-maps");
    }
}
