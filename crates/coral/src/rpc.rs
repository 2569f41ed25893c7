//! Host side of the file-based guest signalling channel.
//!
//! Guest code cannot call the host; it writes JSON request files into the
//! reserved request directory instead (see the guest `subagent` builtin).
//! After every execution the host scans that directory, turns unseen files
//! into typed [`SpawnRequest`]s, and surfaces them alongside the execution
//! result. Consumption is idempotent per request id: the id is recorded as
//! a tombstone and the file removed, so a request observed once is never
//! re-surfaced — not by a racing scan, and not by re-running the command
//! that produced it.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::storage::Backend;

/// Reserved directory scanned for request files. The guest-side constant
/// lives with the `subagent` builtin; integration tests pin the two
/// together.
pub const REQUEST_DIR: &str = "/.rpc/requests";

/// Mount prefix carrying the signalling channel inside every sandbox.
pub(crate) const RPC_MOUNT: &str = "/.rpc";

/// A typed request recovered from a guest-written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Unique id, chosen by the guest.
    pub id: String,
    /// Requested method, e.g. `"spawn"`.
    pub method: String,
    /// Method-specific argument bag.
    pub args: serde_json::Value,
    /// ISO-8601 creation timestamp, as written by the guest.
    pub timestamp: String,
}

/// Scanner owning the consumed-id tombstone set for one sandbox.
#[derive(Debug, Default)]
pub struct RpcChannel {
    consumed: Mutex<HashSet<String>>,
}

impl RpcChannel {
    /// Create a channel with no consumed requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the request directory and consume every request not seen
    /// before, in filename order.
    ///
    /// Malformed files are logged and dropped — they never fail the
    /// surrounding execute call — and are tombstoned like consumed ones so
    /// they are not re-parsed on every scan.
    pub async fn scan(&self, backend: &dyn Backend) -> Vec<SpawnRequest> {
        let entries = match backend.ls(REQUEST_DIR).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "request directory scan failed");
                return Vec::new();
            }
        };

        let mut requests = Vec::new();

        for entry in entries {
            if entry.is_dir || !entry.path.ends_with(".json") {
                continue;
            }

            // Tombstone on the filename stem first so a concurrent scan
            // cannot double-deliver while this one is still parsing.
            let stem = entry
                .path
                .rsplit('/')
                .next()
                .unwrap_or(entry.path.as_str())
                .trim_end_matches(".json")
                .to_string();
            {
                let mut consumed = match self.consumed.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !consumed.insert(stem) {
                    continue;
                }
            }

            let body = match backend.read(&entry.path, None, None).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "unreadable request file dropped");
                    continue;
                }
            };

            match serde_json::from_str::<SpawnRequest>(&body) {
                Ok(request) => {
                    tracing::debug!(id = %request.id, method = %request.method, "consumed spawn request");
                    // Remove the file so the tombstone is belt-and-braces;
                    // a backend that cannot delete still gets single
                    // delivery from the id set.
                    if let Err(e) = backend.delete(&entry.path).await {
                        tracing::warn!(path = %entry.path, error = %e, "failed to remove consumed request file");
                    }
                    requests.push(request);
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "malformed request file dropped");
                    let _ = backend.delete(&entry.path).await;
                }
            }
        }

        requests
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn request_json(id: &str, task: &str) -> String {
        serde_json::to_string_pretty(&serde_json::json!({
            "id": id,
            "method": "spawn",
            "args": { "task": task },
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_scan_empty() {
        let backend = MemoryBackend::new();
        let channel = RpcChannel::new();
        assert!(channel.scan(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_consumes_request() {
        let backend = MemoryBackend::new();
        backend
            .write(
                &format!("{REQUEST_DIR}/req-1.json"),
                &request_json("req-1", "summarize"),
            )
            .await
            .unwrap();

        let channel = RpcChannel::new();
        let requests = channel.scan(&backend).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "req-1");
        assert_eq!(requests[0].method, "spawn");
        assert_eq!(requests[0].args["task"], "summarize");

        // The file is gone and the request is never re-surfaced.
        assert!(backend.ls(REQUEST_DIR).await.unwrap().is_empty());
        assert!(channel.scan(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_delivery_even_if_file_persists() {
        let backend = MemoryBackend::new();
        let path = format!("{REQUEST_DIR}/sticky.json");
        backend
            .write(&path, &request_json("sticky", "task"))
            .await
            .unwrap();

        let channel = RpcChannel::new();
        assert_eq!(channel.scan(&backend).await.len(), 1);

        // Simulate the file surviving (or being re-created identically):
        // the tombstone still suppresses redelivery.
        backend
            .write(&path, &request_json("sticky", "task"))
            .await
            .unwrap();
        assert!(channel.scan(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_dropped() {
        let backend = MemoryBackend::new();
        backend
            .write(&format!("{REQUEST_DIR}/bad.json"), "{ not json")
            .await
            .unwrap();
        backend
            .write(
                &format!("{REQUEST_DIR}/good.json"),
                &request_json("good", "t"),
            )
            .await
            .unwrap();

        let channel = RpcChannel::new();
        let requests = channel.scan(&backend).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "good");
    }

    #[tokio::test]
    async fn test_non_json_files_ignored() {
        let backend = MemoryBackend::new();
        backend
            .write(&format!("{REQUEST_DIR}/notes.txt"), "scratch")
            .await
            .unwrap();

        let channel = RpcChannel::new();
        assert!(channel.scan(&backend).await.is_empty());
        // Non-request files are left alone.
        assert_eq!(backend.ls(REQUEST_DIR).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requests_in_filename_order() {
        let backend = MemoryBackend::new();
        for id in ["a", "b", "c"] {
            backend
                .write(
                    &format!("{REQUEST_DIR}/{id}.json"),
                    &request_json(id, "t"),
                )
                .await
                .unwrap();
        }

        let channel = RpcChannel::new();
        let ids: Vec<String> = channel
            .scan(&backend)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_guest_constant_matches() {
        assert_eq!(REQUEST_DIR, coral_shell::RPC_REQUEST_DIR);
    }
}
