// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Materializes fetched credentials as local secrets.

use crate::constants::{annotations, labels, retry::MAX_CONFLICT_ATTEMPTS, OPERATOR_NAME};
use crate::error::{ImporterError, Result};
use crate::types::ImportKey;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, PostParams, Preconditions},
    Api, Client, ResourceExt,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Where and for whom a credential is mirrored
#[derive(Debug, Clone)]
pub struct MirrorTarget {
    pub namespace: String,
    pub name: String,
    pub owner: ImportKey,
    /// Only set when the secret lives next to its import
    pub owner_ref: Option<OwnerReference>,
    /// `cluster/namespace/serviceaccount` of the remote credential
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
    /// The secret exists but belongs to someone else and was left alone
    NotOwned,
}

/// Hex sha256 over the sorted data map
pub fn content_hash(data: &BTreeMap<String, ByteString>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update((value.0.len() as u64).to_le_bytes());
        hasher.update(&value.0);
    }
    format!("{:x}", hasher.finalize())
}

/// Back-reference of a secret to its import, if it is one of ours
pub fn owner_of(secret: &Secret) -> Option<ImportKey> {
    let managed = secret.labels().get(labels::MANAGED_BY).map(String::as_str) == Some(OPERATOR_NAME);
    if !managed {
        return None;
    }
    secret
        .annotations()
        .get(annotations::IMPORT)
        .and_then(|v| ImportKey::parse(v))
}

fn write_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

fn managed_selector() -> ListParams {
    ListParams::default().labels(&format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME))
}

/// Writes and removes mirrored secrets in the local cluster
#[derive(Clone)]
pub struct CredentialMirror {
    client: Client,
}

impl CredentialMirror {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Upsert the mirrored secret. Skips the write when the stored data
    /// already hashes to the desired content; refuses to touch a secret
    /// that is not owned by `target.owner`.
    #[instrument(skip(self, target, data), fields(secret = %format!("{}/{}", target.namespace, target.name)))]
    pub async fn sync(
        &self,
        target: &MirrorTarget,
        data: BTreeMap<String, ByteString>,
    ) -> Result<SyncOutcome> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &target.namespace);
        let what = format!("secret {}/{}", target.namespace, target.name);
        let hash = content_hash(&data);

        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            let existing = secrets
                .get_opt(&target.name)
                .await
                .map_err(|e| ImporterError::from_api(e, &what))?;

            let result = match existing {
                None => {
                    let secret = build_secret(target, data.clone(), &hash, None);
                    secrets
                        .create(&write_params(), &secret)
                        .await
                        .map(|_| SyncOutcome::Created)
                }
                Some(current) => {
                    if owner_of(&current).as_ref() != Some(&target.owner) {
                        return Err(ImporterError::NameCollision {
                            namespace: target.namespace.clone(),
                            name: target.name.clone(),
                            owner: current
                                .annotations()
                                .get(annotations::IMPORT)
                                .cloned()
                                .unwrap_or_else(|| "<unmanaged>".to_string()),
                        });
                    }

                    if is_current(&current, &hash) {
                        debug!("Mirrored secret is up to date");
                        return Ok(SyncOutcome::Unchanged);
                    }

                    let secret = build_secret(target, data.clone(), &hash, current.resource_version());
                    secrets
                        .replace(&target.name, &write_params(), &secret)
                        .await
                        .map(|_| SyncOutcome::Updated)
                }
            };

            match result {
                Ok(outcome) => {
                    info!("Mirrored secret {:?}", outcome);
                    return Ok(outcome);
                }
                Err(kube::Error::Api(resp)) if resp.code == 409 => {
                    debug!("Write conflict on attempt {}, re-reading", attempt);
                }
                Err(e) => return Err(ImporterError::from_api(e, &what)),
            }
        }

        Err(ImporterError::Conflict(format!(
            "{} kept changing after {} attempts",
            what, MAX_CONFLICT_ATTEMPTS
        )))
    }

    /// Delete the mirrored secret if it belongs to `owner`
    #[instrument(skip(self))]
    pub async fn remove(&self, namespace: &str, name: &str, owner: &ImportKey) -> Result<RemoveOutcome> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("secret {}/{}", namespace, name);

        let Some(current) = secrets
            .get_opt(name)
            .await
            .map_err(|e| ImporterError::from_api(e, &what))?
        else {
            return Ok(RemoveOutcome::Absent);
        };

        if owner_of(&current).as_ref() != Some(owner) {
            warn!("Not removing {}, it is not owned by {}", what, owner);
            return Ok(RemoveOutcome::NotOwned);
        }

        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: current.uid(),
                resource_version: None,
            }),
            ..Default::default()
        };
        match secrets.delete(name, &params).await {
            Ok(_) => {
                info!("Removed mirrored secret {}", what);
                Ok(RemoveOutcome::Removed)
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(RemoveOutcome::Absent),
            Err(e) => Err(ImporterError::from_api(e, &what)),
        }
    }

    /// Remove every mirrored secret owned by `owner`, wherever it lives
    #[instrument(skip(self), fields(import = %owner))]
    pub async fn remove_owned(&self, owner: &ImportKey) -> Result<usize> {
        let mut removed = 0;
        for secret in self.managed_secrets().await? {
            if owner_of(&secret).as_ref() != Some(owner) {
                continue;
            }
            let namespace = secret.namespace().unwrap_or_default();
            if self.remove(&namespace, &secret.name_any(), owner).await? == RemoveOutcome::Removed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Owners referenced by every mirrored secret in the cluster
    pub async fn managed_owners(&self) -> Result<Vec<ImportKey>> {
        let mut owners: Vec<ImportKey> = self
            .managed_secrets()
            .await?
            .iter()
            .filter_map(owner_of)
            .collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    async fn managed_secrets(&self) -> Result<Vec<Secret>> {
        let secrets: Api<Secret> = Api::all(self.client.clone());
        Ok(secrets
            .list(&managed_selector())
            .await
            .map_err(|e| ImporterError::from_api(e, "mirrored secrets"))?
            .items)
    }
}

/// The stored data must hash to the desired content, so hand edits are
/// overwritten on the next sync even when the annotation still matches.
fn is_current(current: &Secret, desired_hash: &str) -> bool {
    let recorded = current.annotations().get(annotations::CONTENT_HASH).map(String::as_str);
    let stored = current.data.as_ref().map(content_hash);
    recorded == Some(desired_hash) && stored.as_deref() == Some(desired_hash)
}

fn build_secret(
    target: &MirrorTarget,
    data: BTreeMap<String, ByteString>,
    hash: &str,
    resource_version: Option<String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(BTreeMap::from([(
                labels::MANAGED_BY.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                (annotations::IMPORT.to_string(), target.owner.to_string()),
                (annotations::CONTENT_HASH.to_string(), hash.to_string()),
                (annotations::SOURCE.to_string(), target.source.clone()),
            ])),
            owner_references: target.owner_ref.clone().map(|r| vec![r]),
            resource_version,
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}
