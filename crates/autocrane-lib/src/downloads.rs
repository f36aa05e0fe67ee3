//! Download request factory
//!
//! The contract the download agent implements against: one request per
//! declared data source, with the extraction location derived from the
//! pod's drop folder and the sanitized blob path. Lives here rather than
//! in the agent so both sides share one definition of the wire shape.

use std::path::Path;

use crate::models::{DataDownloadRequest, PodDataRequestInfo};

/// Derive the download requests for one pod.
///
/// A pod with an empty drop folder is not a data consumer and yields no
/// requests. Declared sources whose annotation is missing or malformed
/// still yield a request, with no details and an empty extraction
/// location, signalling a desired repo with no valid target yet.
pub fn build_download_requests(info: &PodDataRequestInfo) -> Vec<DataDownloadRequest> {
    if info.drop_folder.is_empty() {
        return Vec::new();
    }

    info.data_sources
        .iter()
        .map(|repo| {
            let details = info.request_details(repo);
            let extraction_location = details
                .as_ref()
                .map(|d| {
                    Path::new(&info.drop_folder)
                        .join(sanitize_blob_path(&d.path))
                        .to_string_lossy()
                        .into_owned()
                })
                .unwrap_or_default();

            DataDownloadRequest {
                pod: info.id.clone(),
                repo: repo.clone(),
                drop_folder: info.drop_folder.clone(),
                extraction_location,
                details,
            }
        })
        .collect()
}

/// Flatten a blob path into a single file-system component.
fn sanitize_blob_path(path: &str) -> String {
    path.replace(std::path::MAIN_SEPARATOR, "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataDownloadRequestDetails, PodIdentifier};
    use std::collections::BTreeMap;

    fn consumer(drop_folder: &str, sources: &[&str]) -> PodDataRequestInfo {
        PodDataRequestInfo {
            id: PodIdentifier::new("prod", "web-0"),
            drop_folder: drop_folder.to_string(),
            data_sources: sources.iter().map(|s| s.to_string()).collect(),
            requests: BTreeMap::new(),
        }
    }

    #[test]
    fn test_empty_drop_folder_yields_nothing() {
        let info = consumer("", &["maps"]);
        assert!(build_download_requests(&info).is_empty());
    }

    #[test]
    fn test_declared_source_without_request_yields_placeholder() {
        let info = consumer("/data", &["maps"]);
        let requests = build_download_requests(&info);

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].repo, "maps");
        assert!(requests[0].details.is_none());
        assert!(requests[0].extraction_location.is_empty());
    }

    #[test]
    fn test_extraction_location_flattens_blob_path() {
        let mut info = consumer("/data", &["maps"]);
        let details = DataDownloadRequestDetails {
            hash: "v2".to_string(),
            path: format!("maps{0}tiles{0}v2.tar", std::path::MAIN_SEPARATOR),
            unix_timestamp_seconds: 1,
        };
        info.requests.insert("maps".to_string(), details.encode());

        let requests = build_download_requests(&info);
        assert_eq!(requests.len(), 1);
        let expected = Path::new("/data")
            .join("maps_tiles_v2.tar")
            .to_string_lossy()
            .into_owned();
        assert_eq!(requests[0].extraction_location, expected);
        assert_eq!(requests[0].details.as_ref().unwrap().hash, "v2");
    }

    #[test]
    fn test_one_request_per_declared_source() {
        let mut info = consumer("/data", &["maps", "models"]);
        let details = DataDownloadRequestDetails {
            hash: "v1".to_string(),
            path: "models-v1.tar".to_string(),
            unix_timestamp_seconds: 1,
        };
        info.requests.insert("models".to_string(), details.encode());

        let requests = build_download_requests(&info);
        assert_eq!(requests.len(), 2);
        assert!(requests[0].details.is_none());
        assert!(requests[1].details.is_some());
    }
}
