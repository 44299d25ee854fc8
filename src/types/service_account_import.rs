// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Object names are limited to 253 characters (DNS subdomain)
const MAX_NAME_LEN: usize = 253;
const NAME_HASH_LEN: usize = 8;

/// Declares that the credential of a service account living in a remote
/// cluster should be mirrored into a local secret.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(
    group = "multicluster.admiralty.io",
    version = "v1alpha1",
    kind = "ServiceAccountImport"
)]
#[kube(namespaced)]
#[kube(status = "ServiceAccountImportStatus")]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountImportSpec {
    /// Name of the cluster profile the service account lives in
    pub cluster_name: String,
    /// Remote namespace, defaults to the cluster profile's default namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Remote service account name
    pub name: String,
    /// Local namespace for the mirrored secret, defaults to the import's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum ImportCondition {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for ImportCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportCondition::Pending => "Pending",
            ImportCondition::Ready => "Ready",
            ImportCondition::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Written only by the reconciler. `reason` and `message` are serialized as
/// null when empty so a merge patch clears stale values.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountImportStatus {
    #[serde(default)]
    pub condition: ImportCondition,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Namespace the mirrored secret was last written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,
}

impl ServiceAccountImportStatus {
    /// True when both statuses say the same thing, ignoring the sync time
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.condition == other.condition
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
            && self.secret_name == other.secret_name
            && self.secret_namespace == other.secret_namespace
    }
}

/// Identity of an import, used for failure tracking and back-references
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportKey {
    pub namespace: String,
    pub name: String,
}

impl ImportKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn for_import(import: &ServiceAccountImport) -> Self {
        Self::new(import.namespace().unwrap_or_default(), import.name_any())
    }

    /// Parse the `namespace/name` form used in back-reference annotations
    pub fn parse(value: &str) -> Option<Self> {
        let (namespace, name) = value.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    /// Name of the mirrored secret, stable across reconciliations and
    /// distinct for same-named imports in different namespaces.
    pub fn mirrored_secret_name(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let hash = format!("{:x}", digest);
        let suffix = &hash[..NAME_HASH_LEN];

        let max_prefix = MAX_NAME_LEN - NAME_HASH_LEN - 1;
        let prefix: String = self.name.chars().take(max_prefix).collect();
        let prefix = prefix.trim_end_matches(['-', '.']);
        format!("{}-{}", prefix, suffix)
    }
}

impl fmt::Display for ImportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl ServiceAccountImport {
    pub fn key(&self) -> ImportKey {
        ImportKey::for_import(self)
    }

    /// Local namespace the mirrored secret is written to
    pub fn target_namespace(&self) -> String {
        self.spec
            .target_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Remote namespace, falling back to the cluster's default namespace
    pub fn source_namespace(&self, cluster_default: &str) -> String {
        self.spec
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| cluster_default.to_string())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
