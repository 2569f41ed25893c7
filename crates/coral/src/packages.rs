//! Package provisioning for sandbox environments.
//!
//! A package is a named file set described by a JSON manifest. Sandboxes
//! name the packages they want; the registry resolves each name through a
//! documented chain — local path overrides, then custom URL overrides,
//! then the default remote registry — and writes every file in the
//! manifest into the sandbox's backend before the first command runs.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Backend;

/// Base URL packages are fetched from when no override applies. The
/// manifest for package `name` is expected at `{base}/{name}.json`.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.coral-vm.dev/packages";

/// Package resolution or provisioning failure. Aborts sandbox creation
/// with the underlying cause attached; there is no silent fallback beyond
/// the documented local -> custom -> registry chain.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The manifest could not be fetched or read.
    #[error("failed to fetch package {name}: {reason}")]
    Fetch {
        /// Package name as requested.
        name: String,
        /// Underlying cause, as text.
        reason: String,
    },
    /// The manifest was fetched but is not a valid package description.
    #[error("invalid manifest for package {name}: {reason}")]
    InvalidManifest {
        /// Package name as requested.
        name: String,
        /// Underlying cause, as text.
        reason: String,
    },
    /// A manifest file could not be written into the sandbox backend.
    #[error("failed to provision {path} from package {name}: {reason}")]
    Provision {
        /// Package name as requested.
        name: String,
        /// Guest path that failed to write.
        path: String,
        /// Underlying cause, as text.
        reason: String,
    },
}

/// A package: a named set of files to place into the guest tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name.
    pub name: String,
    /// Guest path -> file content.
    pub files: BTreeMap<String, String>,
}

/// Resolves package names to manifests and provisions them into backends.
pub struct PackageRegistry {
    base_url: String,
    custom: HashMap<String, String>,
    local: HashMap<String, PathBuf>,
    client: reqwest::Client,
}

impl std::fmt::Debug for PackageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageRegistry")
            .field("base_url", &self.base_url)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("local", &self.local.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PackageRegistry {
    /// Create a registry with the default remote base URL and the given
    /// per-name overrides.
    pub fn new(custom: HashMap<String, String>, local: HashMap<String, PathBuf>) -> Self {
        Self::with_base_url(DEFAULT_REGISTRY_URL, custom, local)
    }

    /// Create a registry against a specific remote base URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        custom: HashMap<String, String>,
        local: HashMap<String, PathBuf>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            custom,
            local,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve one package name to its manifest.
    ///
    /// Resolution order: local path override, custom URL override, then
    /// the remote registry.
    pub async fn resolve(&self, name: &str) -> Result<PackageManifest, PackageError> {
        let body = if let Some(path) = self.local.get(name) {
            tracing::debug!(package = name, path = %path.display(), "resolving package from local path");
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PackageError::Fetch {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?
        } else {
            let url = self
                .custom
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("{}/{}.json", self.base_url, name));
            tracing::debug!(package = name, %url, "fetching package manifest");
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| PackageError::Fetch {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            response.text().await.map_err(|e| PackageError::Fetch {
                name: name.to_string(),
                reason: e.to_string(),
            })?
        };

        serde_json::from_str(&body).map_err(|e| PackageError::InvalidManifest {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolve and install the named packages into a backend.
    pub async fn provision(
        &self,
        names: &[String],
        backend: &dyn Backend,
    ) -> Result<(), PackageError> {
        for name in names {
            let manifest = self.resolve(name).await?;
            for (path, content) in &manifest.files {
                backend
                    .write(path, content)
                    .await
                    .map_err(|e| PackageError::Provision {
                        name: name.clone(),
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
            }
            tracing::info!(
                package = %manifest.name,
                files = manifest.files.len(),
                "provisioned package"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{Backend, MemoryBackend};
    use std::io::Write as _;

    fn manifest_json() -> String {
        serde_json::to_string_pretty(&serde_json::json!({
            "name": "toolkit",
            "files": {
                "/opt/toolkit/README": "toolkit files\n",
                "/opt/toolkit/config.json": "{}\n",
            }
        }))
        .unwrap()
    }

    fn local_registry(name: &str, file: &std::path::Path) -> PackageRegistry {
        let mut local = HashMap::new();
        local.insert(name.to_string(), file.to_path_buf());
        PackageRegistry::new(HashMap::new(), local)
    }

    #[tokio::test]
    async fn test_local_package_provisions_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(manifest_json().as_bytes()).unwrap();

        let registry = local_registry("toolkit", file.path());
        let backend = MemoryBackend::new();
        registry
            .provision(&["toolkit".to_string()], &backend)
            .await
            .unwrap();

        assert_eq!(
            backend.read("/opt/toolkit/README", None, None).await.unwrap(),
            "toolkit files\n"
        );
        assert_eq!(backend.ls("/opt/toolkit").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_local_package_fails() {
        let registry = local_registry("ghost", std::path::Path::new("/no/such/manifest.json"));
        let err = registry.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, PackageError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_invalid_manifest_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a manifest").unwrap();

        let registry = local_registry("broken", file.path());
        let err = registry.resolve("broken").await.unwrap_err();
        assert!(matches!(err, PackageError::InvalidManifest { .. }));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let manifest: PackageManifest = serde_json::from_str(&manifest_json()).unwrap();
        assert_eq!(manifest.name, "toolkit");
        assert_eq!(manifest.files.len(), 2);
    }
}
