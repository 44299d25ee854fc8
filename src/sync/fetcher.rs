// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reads the bound credential of a service account from a remote cluster.

use crate::constants::{annotations, data_keys, SERVICE_ACCOUNT_TOKEN_TYPE};
use crate::error::{ImporterError, Result};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::ByteString;
use kube::{api::ListParams, Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Credential read from the source cluster. Never stored anywhere except in
/// the mirrored secret.
#[derive(Clone, PartialEq)]
pub struct RemoteCredential {
    pub token: Vec<u8>,
    pub ca_crt: Option<Vec<u8>>,
    /// Namespace the token is bound to
    pub namespace: String,
    /// Name of the remote secret the credential was read from
    pub source_secret: String,
}

impl std::fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("token", &"<redacted>")
            .field("ca_crt", &self.ca_crt.as_ref().map(|ca| ca.len()))
            .field("namespace", &self.namespace)
            .field("source_secret", &self.source_secret)
            .finish()
    }
}

impl RemoteCredential {
    /// Data of the mirrored secret; `server` lets workloads build a client
    /// configuration from the secret alone.
    pub fn to_secret_data(&self, server: &str) -> BTreeMap<String, ByteString> {
        let mut data = BTreeMap::new();
        data.insert(data_keys::TOKEN.to_string(), ByteString(self.token.clone()));
        if let Some(ca) = &self.ca_crt {
            data.insert(data_keys::CA_CRT.to_string(), ByteString(ca.clone()));
        }
        data.insert(
            data_keys::NAMESPACE.to_string(),
            ByteString(self.namespace.as_bytes().to_vec()),
        );
        data.insert(
            data_keys::SERVER.to_string(),
            ByteString(server.as_bytes().to_vec()),
        );
        data
    }
}

/// Fetch the current credential of `namespace/name` from a remote cluster.
///
/// A service account whose token has not been generated yet is reported as
/// NotFound so the caller retries until it appears.
#[instrument(skip(client))]
pub async fn fetch_credential(client: &Client, namespace: &str, name: &str) -> Result<RemoteCredential> {
    let what = format!("service account {}/{}", namespace, name);
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    let account = accounts
        .get(name)
        .await
        .map_err(|e| ImporterError::from_api(e, &what))?;
    let account_uid = account.uid();

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    // Secrets referenced by the account itself
    let referenced: Vec<String> = account
        .secrets
        .iter()
        .flatten()
        .filter_map(|r| r.name.clone())
        .collect();
    for secret_name in referenced {
        let secret = secrets
            .get_opt(&secret_name)
            .await
            .map_err(|e| ImporterError::from_api(e, &format!("secret {}/{}", namespace, secret_name)))?;
        match secret {
            Some(secret) => {
                if let Some(credential) = credential_from_secret(&secret, name, account_uid.as_deref()) {
                    return Ok(credential);
                }
            }
            None => debug!("Referenced secret {} does not exist (yet)", secret_name),
        }
    }

    // Token secrets that point back at the account
    let params = ListParams::default().fields(&format!("type={}", SERVICE_ACCOUNT_TOKEN_TYPE));
    let mut candidates = secrets
        .list(&params)
        .await
        .map_err(|e| ImporterError::from_api(e, &format!("secrets in {}", namespace)))?
        .items;
    candidates.sort_by_key(|s| s.name_any());

    candidates
        .iter()
        .find_map(|secret| credential_from_secret(secret, name, account_uid.as_deref()))
        .ok_or_else(|| {
            ImporterError::NotFound(format!(
                "credential for {} has not been generated yet",
                what
            ))
        })
}

/// Extract a usable credential from a token secret bound to `account`.
fn credential_from_secret(
    secret: &Secret,
    account: &str,
    account_uid: Option<&str>,
) -> Option<RemoteCredential> {
    if secret.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
        return None;
    }

    let annotations = secret.annotations();
    if annotations.get(annotations::SERVICE_ACCOUNT_NAME).map(String::as_str) != Some(account) {
        return None;
    }

    // A uid mismatch means the secret belongs to a deleted account of the same name
    if let (Some(expected), Some(actual)) = (account_uid, annotations.get(annotations::SERVICE_ACCOUNT_UID)) {
        if expected != actual {
            debug!("Skipping stale token secret {}", secret.name_any());
            return None;
        }
    }

    let data = secret.data.as_ref()?;
    let token = data.get(data_keys::TOKEN).filter(|t| !t.0.is_empty())?;

    Some(RemoteCredential {
        token: token.0.clone(),
        ca_crt: data.get(data_keys::CA_CRT).map(|ca| ca.0.clone()),
        namespace: data
            .get(data_keys::NAMESPACE)
            .and_then(|ns| String::from_utf8(ns.0.clone()).ok())
            .unwrap_or_else(|| secret.namespace().unwrap_or_default()),
        source_secret: secret.name_any(),
    })
}
