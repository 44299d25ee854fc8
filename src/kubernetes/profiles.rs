// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster profile discovery from kubeconfig contexts and mounted credentials

use crate::config::Config;
use crate::constants::data_keys;
use crate::error::{ImporterError, Result};
use crate::kubernetes::client::config_for_context;
use kube::config::Kubeconfig;
use kube::Config as KConfig;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A named remote cluster connection
#[derive(Clone)]
pub struct ClusterProfile {
    pub name: String,
    pub default_namespace: String,
    pub config: KConfig,
}

impl std::fmt::Debug for ClusterProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterProfile")
            .field("name", &self.name)
            .field("default_namespace", &self.default_namespace)
            .field("server", &self.config.cluster_url.to_string())
            .finish()
    }
}

/// Credentials of an imported service account mounted as a volume
#[derive(Debug, Clone, PartialEq)]
pub struct MountedProfile {
    pub name: String,
    pub server: String,
    pub namespace: String,
    pub token_path: PathBuf,
    pub ca_path: Option<PathBuf>,
}

/// Load every cluster profile available to the process.
///
/// Kubeconfig contexts come first and win over mounted credentials with the
/// same name.
pub async fn load_profiles(config: &Config) -> Result<Vec<ClusterProfile>> {
    let mut profiles = Vec::new();

    if let Some(kubeconfig) = read_kubeconfig(config.remote_kubeconfig.as_deref())? {
        profiles.extend(profiles_from_kubeconfig(&kubeconfig, config.request_timeout).await?);
    }

    let mut seen: HashSet<String> = profiles.iter().map(|p| p.name.clone()).collect();
    for mounted in read_mounted_profiles(&config.imports_dir)? {
        if !seen.insert(mounted.name.clone()) {
            warn!(
                "Mounted credentials for {} shadowed by kubeconfig context of the same name",
                mounted.name
            );
            continue;
        }
        profiles.push(mounted.into_profile(config.request_timeout).await?);
    }

    info!("Loaded {} cluster profiles", profiles.len());
    Ok(profiles)
}

fn read_kubeconfig(path: Option<&Path>) -> Result<Option<Kubeconfig>> {
    match path {
        Some(path) => Kubeconfig::read_from(path).map(Some).map_err(|e| {
            ImporterError::KubeconfigError(format!(
                "Failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        }),
        None => match Kubeconfig::read() {
            Ok(kubeconfig) => Ok(Some(kubeconfig)),
            Err(e) => {
                debug!("No default kubeconfig available: {}", e);
                Ok(None)
            }
        },
    }
}

/// One profile per kubeconfig context, named after the context
pub async fn profiles_from_kubeconfig(
    kubeconfig: &Kubeconfig,
    timeout: Duration,
) -> Result<Vec<ClusterProfile>> {
    let mut profiles = Vec::with_capacity(kubeconfig.contexts.len());

    for context in &kubeconfig.contexts {
        let config = config_for_context(kubeconfig, &context.name, timeout).await?;
        profiles.push(ClusterProfile {
            name: context.name.clone(),
            default_namespace: config.default_namespace.clone(),
            config,
        });
    }

    Ok(profiles)
}

/// Scan `dir` for sub-directories holding imported credentials
pub fn read_mounted_profiles(dir: &Path) -> Result<Vec<MountedProfile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No mounted imports at {}", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(ImporterError::KubeconfigError(format!(
                "Failed to read {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut profiles = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        // Kubelet projects volumes through `..data` symlinks
        let name = entry.file_name().to_string_lossy().to_string();
        if !path.is_dir() || name.starts_with('.') {
            continue;
        }

        match read_mounted_profile(&name, &path) {
            Ok(profile) => profiles.push(profile),
            Err(e) => warn!("Ignoring mounted import {}: {}", name, e),
        }
    }

    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

fn read_mounted_profile(name: &str, dir: &Path) -> Result<MountedProfile> {
    let read = |key: &str| -> Result<String> {
        fs::read_to_string(dir.join(key))
            .map(|s| s.trim().to_string())
            .map_err(|e| ImporterError::KubeconfigError(format!("missing {}: {}", key, e)))
    };

    let server = read(data_keys::SERVER)?;
    url::Url::parse(&server)
        .map_err(|e| ImporterError::KubeconfigError(format!("invalid server {}: {}", server, e)))?;

    let token_path = dir.join(data_keys::TOKEN);
    if !token_path.is_file() {
        return Err(ImporterError::KubeconfigError("missing token".to_string()));
    }

    let ca_path = dir.join(data_keys::CA_CRT);
    Ok(MountedProfile {
        name: name.to_string(),
        server,
        namespace: read(data_keys::NAMESPACE).unwrap_or_else(|_| "default".to_string()),
        token_path,
        ca_path: ca_path.is_file().then_some(ca_path),
    })
}

impl MountedProfile {
    /// Express the mounted credentials as a single-context kubeconfig
    pub fn to_kubeconfig(&self) -> Result<Kubeconfig> {
        let mut cluster = serde_json::json!({ "server": self.server });
        if let Some(ca) = &self.ca_path {
            cluster["certificate-authority"] = ca.display().to_string().into();
        }

        let document = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": self.name, "cluster": cluster }],
            "users": [{
                "name": self.name,
                "user": { "tokenFile": self.token_path.display().to_string() }
            }],
            "contexts": [{
                "name": self.name,
                "context": {
                    "cluster": self.name,
                    "user": self.name,
                    "namespace": self.namespace
                }
            }],
            "current-context": self.name
        });

        serde_json::from_value(document).map_err(|e| {
            ImporterError::KubeconfigError(format!(
                "Failed to build kubeconfig for {}: {}",
                self.name, e
            ))
        })
    }

    pub async fn into_profile(self, timeout: Duration) -> Result<ClusterProfile> {
        let kubeconfig = self.to_kubeconfig()?;
        let config = config_for_context(&kubeconfig, &self.name, timeout).await?;
        Ok(ClusterProfile {
            name: self.name,
            default_namespace: config.default_namespace.clone(),
            config,
        })
    }
}
