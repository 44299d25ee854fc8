// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry of live clients for the configured remote clusters

use crate::error::{ImporterError, Result};
use crate::kubernetes::profiles::ClusterProfile;
use kube::Client;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

/// A remote cluster the operator can read credentials from
#[derive(Clone)]
pub struct RemoteCluster {
    pub name: String,
    pub default_namespace: String,
    /// API server URL handed to workloads through the mirrored secret
    pub server: String,
    pub client: Client,
}

impl RemoteCluster {
    pub fn new(
        name: impl Into<String>,
        default_namespace: impl Into<String>,
        server: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            default_namespace: default_namespace.into(),
            server: server.into(),
            client,
        }
    }
}

/// Immutable set of remote cluster clients, built once at startup and
/// shared read-only by every worker.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    clusters: HashMap<String, RemoteCluster>,
}

impl ClusterRegistry {
    /// Build one client per profile. No network I/O happens here; a broken
    /// cluster shows up on first use.
    pub fn from_profiles(profiles: Vec<ClusterProfile>) -> Result<Self> {
        let mut clusters = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let server = profile.config.cluster_url.to_string();
            let client = Client::try_from(profile.config).map_err(|e| {
                ImporterError::KubeconfigError(format!(
                    "Failed to create client for cluster {}: {}",
                    profile.name, e
                ))
            })?;
            info!("Registered cluster {} at {}", profile.name, server);
            clusters.push(RemoteCluster::new(
                profile.name,
                profile.default_namespace,
                server,
                client,
            ));
        }
        Ok(Self::from_clusters(clusters))
    }

    pub fn from_clusters(clusters: impl IntoIterator<Item = RemoteCluster>) -> Self {
        Self {
            clusters: clusters.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Look up the client for a named cluster
    pub fn resolve(&self, name: &str) -> Result<&RemoteCluster> {
        self.clusters
            .get(name)
            .ok_or_else(|| ImporterError::NotConfigured(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.clusters.keys().map(String::as_str).collect()
    }

    /// Validate the cluster names referenced by existing imports.
    ///
    /// Having no cluster at all while imports reference some is fatal; single
    /// unknown names only become NotConfigured failures on their imports.
    pub fn check_references<'a>(&self, referenced: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let referenced: BTreeSet<&str> = referenced.into_iter().collect();
        if referenced.is_empty() {
            return Ok(());
        }

        if self.is_empty() {
            return Err(ImporterError::InvalidConfig(format!(
                "no cluster profiles configured, but imports reference {:?}",
                referenced
            )));
        }

        for name in referenced.iter().filter(|n| !self.clusters.contains_key(**n)) {
            warn!("Cluster {} is referenced by imports but not configured", name);
        }
        Ok(())
    }
}
