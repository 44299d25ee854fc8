// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-import reconciliation: resolve the remote cluster, fetch the
//! credential, mirror it locally and report the outcome on the import.
//!
//! Every pass re-derives the desired state from the current declaration, so
//! a lost or duplicated trigger costs at most one redundant no-op sync.

use crate::constants::OPERATOR_NAME;
use crate::error::{ImporterError, Result};
use crate::kubernetes::ClusterRegistry;
use crate::sync::backoff::FailureTracker;
use crate::sync::fetcher::fetch_credential;
use crate::sync::mirror::{CredentialMirror, MirrorTarget};
use crate::types::{ImportCondition, ImportKey, ServiceAccountImport, ServiceAccountImportStatus};
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action,
    Api, Client, Resource,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Timing knobs of the reconciler
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    /// Re-sync period of a Ready import, catches remote rotation
    pub resync_interval: Duration,
    /// Upper bound of every single API call
    pub request_timeout: Duration,
}

pub struct Reconciler {
    client: Client,
    registry: Arc<ClusterRegistry>,
    mirror: CredentialMirror,
    settings: ReconcileSettings,
    failures: FailureTracker<ImportKey>,
}

impl Reconciler {
    pub fn new(client: Client, registry: Arc<ClusterRegistry>, settings: ReconcileSettings) -> Self {
        Self {
            mirror: CredentialMirror::new(client.clone()),
            client,
            registry,
            settings,
            failures: FailureTracker::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drive a live import toward its desired state. Failures are recorded
    /// on the status before they are returned.
    #[instrument(skip_all, fields(import = %import.key()))]
    pub async fn apply(&self, import: &ServiceAccountImport) -> Result<Action> {
        let key = import.key();
        let imports: Api<ServiceAccountImport> = Api::namespaced(self.client.clone(), &key.namespace);
        let secret_name = key.mirrored_secret_name();
        let target_namespace = import.target_namespace();
        let previous = import.status.clone().unwrap_or_default();

        let synced = match self.mirror_credential(&key, import, &target_namespace, &secret_name).await {
            Ok(()) => {
                self.remove_moved_secret(&key, &previous, &target_namespace, &secret_name)
                    .await
            }
            Err(e) => Err(e),
        };

        let err = match synced {
            Ok(()) => {
                let status = ServiceAccountImportStatus {
                    condition: ImportCondition::Ready,
                    reason: None,
                    message: None,
                    last_sync_time: Some(chrono::Utc::now().to_rfc3339()),
                    observed_generation: import.metadata.generation,
                    secret_name: Some(secret_name),
                    secret_namespace: Some(target_namespace),
                };
                self.write_status(&imports, import, status).await?;
                self.failures.reset(&key);
                return Ok(Action::requeue(self.settings.resync_interval));
            }
            Err(err) => err,
        };

        warn!("Reconciliation failed: {}", err);
        let status = if err.is_terminal_for_status() {
            ServiceAccountImportStatus {
                condition: ImportCondition::Failed,
                reason: Some(err.reason().to_string()),
                message: Some(err.to_string()),
                observed_generation: import.metadata.generation,
                ..previous.clone()
            }
        } else {
            // Transient: keep the condition, record why we are retrying
            ServiceAccountImportStatus {
                reason: Some(err.reason().to_string()),
                message: Some(err.to_string()),
                ..previous.clone()
            }
        };

        if !status.same_outcome(&previous) || import.status.is_none() {
            if let Err(e) = self.write_status(&imports, import, status).await {
                warn!("Failed to record failure on status: {}", e);
            }
        }

        if matches!(err, ImporterError::NotConfigured(_)) {
            self.remove_stale_secrets(&key, import).await;
        }

        Err(err)
    }

    /// Remove the mirrored secret of a deleted import, wherever it was
    /// written. Only namespaces the import points at are touched.
    #[instrument(skip_all, fields(import = %import.key()))]
    pub async fn cleanup(&self, import: &ServiceAccountImport) -> Result<Action> {
        let key = import.key();
        let name = key.mirrored_secret_name();

        for namespace in secret_namespaces(import) {
            let outcome = self
                .bounded(self.mirror.remove(&namespace, &name, &key))
                .await?
                .map_err(local_write_error)?;
            debug!("Cleanup of {}/{}: {:?}", namespace, name, outcome);
        }

        info!("Import deleted, mirrored secret removed");
        self.failures.reset(&key);
        Ok(Action::await_change())
    }

    /// Next attempt for a failed reconciliation of `key`
    pub fn error_action(&self, key: &ImportKey, err: &ImporterError) -> Action {
        match self.failures.next_delay(key, err.retry_class()) {
            Some(delay) => {
                info!("Retrying {} in {:?} ({})", key, delay, err.reason());
                Action::requeue(delay)
            }
            None => {
                info!("Not retrying {} until it changes ({})", key, err.reason());
                Action::await_change()
            }
        }
    }

    /// Remove secrets left by imports of `namespace` that no longer exist
    /// and return the owners that are still declared. Listing mirrored
    /// secrets needs cluster-wide read access, without it the sweep is
    /// skipped.
    pub async fn sweep_orphans(&self, namespace: &str) -> Vec<ImportKey> {
        let owners = match self.bounded(self.mirror.managed_owners()).await.and_then(|r| r) {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Skipping startup sweep, cannot list mirrored secrets: {}", e);
                return Vec::new();
            }
        };

        let imports: Api<ServiceAccountImport> = Api::namespaced(self.client.clone(), namespace);
        let mut live = Vec::new();
        for owner in owners.into_iter().filter(|key| key.namespace == namespace) {
            match self.bounded(imports.get_opt(&owner.name)).await {
                Ok(Ok(Some(_))) => live.push(owner),
                Ok(Ok(None)) => match self.bounded(self.mirror.remove_owned(&owner)).await.and_then(|r| r) {
                    Ok(removed) => info!("Removed {} secret(s) of deleted import {}", removed, owner),
                    Err(e) => warn!("Failed to remove secrets of deleted import {}: {}", owner, e),
                },
                Ok(Err(e)) => warn!("Failed to look up import {}: {}", owner, e),
                Err(e) => warn!("Failed to look up import {}: {}", owner, e),
            }
        }
        debug!("Startup sweep found {} live import(s) owning secrets", live.len());
        live
    }

    /// Resolve, fetch and mirror. The returned error is already classified.
    async fn mirror_credential(
        &self,
        key: &ImportKey,
        import: &ServiceAccountImport,
        target_namespace: &str,
        secret_name: &str,
    ) -> Result<()> {
        let cluster = self.registry.resolve(&import.spec.cluster_name)?;
        let source_namespace = import.source_namespace(&cluster.default_namespace);

        let credential = self
            .bounded(fetch_credential(&cluster.client, &source_namespace, &import.spec.name))
            .await?
            .map_err(|e| with_cluster(e, &cluster.name))?;
        debug!("Fetched credential from {}/{}", source_namespace, credential.source_secret);

        let owner_ref = if import.metadata.namespace.as_deref() == Some(target_namespace) {
            import.controller_owner_ref(&())
        } else {
            None
        };
        let target = MirrorTarget {
            namespace: target_namespace.to_string(),
            name: secret_name.to_string(),
            owner: key.clone(),
            owner_ref,
            source: format!("{}/{}/{}", cluster.name, source_namespace, import.spec.name),
        };

        let outcome = self
            .bounded(self.mirror.sync(&target, credential.to_secret_data(&cluster.server)))
            .await?
            .map_err(local_write_error)?;
        debug!("Mirror outcome: {:?}", outcome);
        Ok(())
    }

    /// Drop the copy left in the previous namespace after `targetNamespace`
    /// changed
    async fn remove_moved_secret(
        &self,
        key: &ImportKey,
        previous: &ServiceAccountImportStatus,
        target_namespace: &str,
        name: &str,
    ) -> Result<()> {
        let Some(old) = previous
            .secret_namespace
            .as_deref()
            .filter(|old| *old != target_namespace)
        else {
            return Ok(());
        };

        let outcome = self
            .bounded(self.mirror.remove(old, name, key))
            .await?
            .map_err(local_write_error)?;
        info!("Target namespace moved from {}, old secret: {:?}", old, outcome);
        Ok(())
    }

    /// The cluster reference is permanently invalid: drop what we mirrored
    async fn remove_stale_secrets(&self, key: &ImportKey, import: &ServiceAccountImport) {
        let name = key.mirrored_secret_name();
        for namespace in secret_namespaces(import) {
            match self.bounded(self.mirror.remove(&namespace, &name, key)).await {
                Ok(Ok(outcome)) => debug!("Stale secret cleanup: {:?}", outcome),
                Ok(Err(e)) | Err(e) => {
                    warn!("Failed to remove stale secret {}/{}: {}", namespace, name, e)
                }
            }
        }
    }

    /// Patch the status subresource. Status writes do not bump the
    /// generation, so they never re-trigger the controller.
    async fn write_status(
        &self,
        imports: &Api<ServiceAccountImport>,
        import: &ServiceAccountImport,
        status: ServiceAccountImportStatus,
    ) -> Result<()> {
        let name = import.metadata.name.clone().unwrap_or_default();
        let condition = status.condition;
        let patch = serde_json::json!({ "status": status });
        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };

        self.bounded(imports.patch_status(&name, &params, &Patch::Merge(&patch)))
            .await?
            .map_err(|e| ImporterError::from_api(e, "import status"))?;
        debug!("Status set to {}", condition);
        Ok(())
    }

    /// Run an API call under the per-call timeout
    async fn bounded<T>(&self, call: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.settings.request_timeout, call)
            .await
            .map_err(|_| {
                ImporterError::Unavailable(format!(
                    "call timed out after {:?}",
                    self.settings.request_timeout
                ))
            })
    }
}

/// Namespaces that may hold the import's mirrored secret
fn secret_namespaces(import: &ServiceAccountImport) -> Vec<String> {
    let mut namespaces = vec![import.target_namespace()];
    if let Some(recorded) = import.status.as_ref().and_then(|s| s.secret_namespace.clone()) {
        if !namespaces.contains(&recorded) {
            namespaces.push(recorded);
        }
    }
    namespaces
}

/// Prefix remote errors with the cluster they came from
fn with_cluster(err: ImporterError, cluster: &str) -> ImporterError {
    match err {
        ImporterError::NotFound(m) => ImporterError::NotFound(format!("cluster {}: {}", cluster, m)),
        ImporterError::Forbidden(m) => ImporterError::Forbidden(format!("cluster {}: {}", cluster, m)),
        ImporterError::Unavailable(m) => {
            ImporterError::Unavailable(format!("cluster {}: {}", cluster, m))
        }
        other => other,
    }
}

/// Local writes only fail permanently on a name collision; anything else
/// the local API server says is retried fast.
fn local_write_error(err: ImporterError) -> ImporterError {
    match err {
        ImporterError::NameCollision { .. } | ImporterError::Conflict(_) => err,
        ImporterError::Unavailable(_) => err,
        other => ImporterError::Unavailable(format!("local cluster: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::RemoteCluster;
    use crate::test_utils::{
        deleted_json, forbidden_json, import_json, list_json, service_account_json, status_json,
        token_secret_json, MockService,
    };
    use serde_json::{json, Value};

    const STATUS_PATH: &str =
        "/apis/multicluster.admiralty.io/v1alpha1/namespaces/team-a/serviceaccountimports/import-db/status";
    const SECRETS_PATH: &str = "/api/v1/namespaces/team-a/secrets";
    const SA_PATH: &str = "/api/v1/namespaces/infra/serviceaccounts/db-reader";
    const TOKEN_PATH: &str = "/api/v1/namespaces/infra/secrets/db-reader-token-abcde";

    fn key() -> ImportKey {
        ImportKey::new("team-a", "import-db")
    }

    fn secret_path(namespace: &str) -> String {
        format!("/api/v1/namespaces/{}/secrets/{}", namespace, key().mirrored_secret_name())
    }

    fn import(cluster: &str) -> ServiceAccountImport {
        serde_json::from_str(&import_json("team-a", "import-db", cluster, 1)).unwrap()
    }

    fn settings() -> ReconcileSettings {
        ReconcileSettings {
            resync_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn local_mock(cluster: &str) -> MockService {
        MockService::new().on_patch(STATUS_PATH, 200, &import_json("team-a", "import-db", cluster, 1))
    }

    fn sa_json() -> String {
        service_account_json("infra", "db-reader", &["db-reader-token-abcde"])
    }

    fn token_json() -> String {
        token_secret_json("infra", "db-reader-token-abcde", "db-reader", Some("c2VjcmV0LXRva2Vu"))
    }

    fn remote_mock() -> MockService {
        MockService::new()
            .on_get(SA_PATH, 200, &sa_json())
            .on_get(TOKEN_PATH, 200, &token_json())
    }

    /// A mirrored secret carrying the back-reference to `owner`
    fn owned_secret(namespace: &str, name: &str, owner: &str) -> Value {
        let mut secret: Value =
            serde_json::from_str(&token_secret_json(namespace, name, "x", None)).unwrap();
        secret["metadata"]["labels"] = json!({
            "app.kubernetes.io/managed-by": "service-account-importer"
        });
        secret["metadata"]["annotations"] = json!({
            "multicluster.admiralty.io/service-account-import": owner
        });
        secret
    }

    fn reconciler(local: &MockService, remote: Option<&MockService>) -> Reconciler {
        let clusters = remote.map(|remote| {
            RemoteCluster::new("prod", "default", "https://prod.example.com", remote.clone().into_client())
        });
        Reconciler::new(
            local.clone().into_client(),
            Arc::new(ClusterRegistry::from_clusters(clusters)),
            settings(),
        )
    }

    fn status_patches(local: &MockService) -> Vec<Value> {
        local
            .requests_with("PATCH")
            .into_iter()
            .filter(|r| r.path == STATUS_PATH)
            .map(|r| r.json()["status"].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_reachable_cluster_yields_ready_and_secret() {
        let created = token_secret_json("team-a", &key().mirrored_secret_name(), "x", None);
        let local = local_mock("prod").on_post(SECRETS_PATH, 201, &created);
        let remote = remote_mock();

        let action = reconciler(&local, Some(&remote)).apply(&import("prod")).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let posts = local.requests_with("POST");
        assert_eq!(posts.len(), 1);
        let secret = posts[0].json();
        assert_eq!(secret["metadata"]["name"], key().mirrored_secret_name());
        assert_eq!(secret["metadata"]["namespace"], "team-a");
        assert_eq!(secret["data"]["token"], "c2VjcmV0LXRva2Vu");
        assert_eq!(secret["metadata"]["ownerReferences"][0]["kind"], "ServiceAccountImport");

        let statuses = status_patches(&local);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["condition"], "Ready");
        assert_eq!(statuses[0]["observedGeneration"], 1);
        assert_eq!(statuses[0]["secretName"], key().mirrored_secret_name());
        assert_eq!(statuses[0]["secretNamespace"], "team-a");
        assert!(statuses[0]["lastSyncTime"].is_string());
        assert!(statuses[0]["message"].is_null());
    }

    #[tokio::test]
    async fn test_unconfigured_cluster_fails_without_secret() {
        let local = local_mock("prod");
        let reconciler = reconciler(&local, None);

        let err = reconciler.apply(&import("prod")).await.unwrap_err();

        assert!(matches!(err, ImporterError::NotConfigured(_)));
        assert_eq!(reconciler.error_action(&key(), &err), Action::await_change());
        assert!(local.requests_with("POST").is_empty());
        assert!(local.requests_with("PUT").is_empty());

        let statuses = status_patches(&local);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["condition"], "Failed");
        assert_eq!(statuses[0]["reason"], "NotConfigured");
        assert!(statuses[0]["message"].as_str().unwrap().contains("\"prod\""));
    }

    #[tokio::test]
    async fn test_forbidden_fetch_fails_with_account_in_message() {
        let local = local_mock("prod");
        let remote = MockService::new().on_get(SA_PATH, 403, &forbidden_json("serviceaccounts", "db-reader"));
        let reconciler = reconciler(&local, Some(&remote));

        let err = reconciler.apply(&import("prod")).await.unwrap_err();

        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(30)));
        let statuses = status_patches(&local);
        assert_eq!(statuses[0]["condition"], "Failed");
        assert_eq!(statuses[0]["reason"], "Forbidden");
        let message = statuses[0]["message"].as_str().unwrap();
        assert!(message.contains("infra/db-reader"), "{}", message);
        assert!(message.contains("prod"), "{}", message);
        assert_eq!(local.write_count(), 1, "only the status is written");
    }

    #[tokio::test]
    async fn test_missing_account_retries_at_slow_cadence() {
        let local = local_mock("prod");
        let remote = MockService::new();
        let reconciler = reconciler(&local, Some(&remote));

        let err = reconciler.apply(&import("prod")).await.unwrap_err();
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(30)));
        let err = reconciler.apply(&import("prod")).await.unwrap_err();
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(60)));
        assert_eq!(status_patches(&local)[0]["reason"], "NotFound");
    }

    #[tokio::test]
    async fn test_unavailable_keeps_condition_and_backs_off_fast() {
        let local = local_mock("prod");
        let remote = MockService::new().on_get(SA_PATH, 500, &status_json(500, "InternalError", "boom"));
        let reconciler = reconciler(&local, Some(&remote));

        let err = reconciler.apply(&import("prod")).await.unwrap_err();

        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(1)));
        let statuses = status_patches(&local);
        assert_eq!(statuses[0]["condition"], "Pending");
        assert_eq!(statuses[0]["reason"], "Unavailable");
    }

    #[tokio::test]
    async fn test_local_write_denied_is_retried_fast_without_failing() {
        let local = local_mock("prod").on_post(SECRETS_PATH, 403, &forbidden_json("secrets", "import-db"));
        let remote = remote_mock();
        let reconciler = reconciler(&local, Some(&remote));

        let err = reconciler.apply(&import("prod")).await.unwrap_err();

        assert!(matches!(err, ImporterError::Unavailable(_)), "{:?}", err);
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(1)));
        let statuses = status_patches(&local);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["condition"], "Pending");
        assert_eq!(statuses[0]["reason"], "Unavailable");
        assert!(statuses[0]["message"].as_str().unwrap().contains("local cluster"));
    }

    #[tokio::test]
    async fn test_name_collision_fails_and_leaves_secret_alone() {
        let foreign = token_secret_json("team-a", &key().mirrored_secret_name(), "someone-else", None);
        let local = local_mock("prod").on_get(&secret_path("team-a"), 200, &foreign);
        let remote = remote_mock();
        let reconciler = reconciler(&local, Some(&remote));

        let err = reconciler.apply(&import("prod")).await.unwrap_err();

        assert!(matches!(err, ImporterError::NameCollision { .. }));
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(30)));
        assert_eq!(local.write_count(), 1, "only the status is written");
        let statuses = status_patches(&local);
        assert_eq!(statuses[0]["condition"], "Failed");
        assert_eq!(statuses[0]["reason"], "NameCollision");
    }

    #[tokio::test]
    async fn test_recovery_clears_failure_and_resets_backoff() {
        let created = token_secret_json("team-a", &key().mirrored_secret_name(), "x", None);
        let local = local_mock("prod").on_post(SECRETS_PATH, 201, &created);
        let remote = MockService::new().on_get(SA_PATH, 403, &forbidden_json("serviceaccounts", "db-reader"));
        let reconciler = reconciler(&local, Some(&remote));

        let mut failed = import("prod");
        failed.status = Some(ServiceAccountImportStatus {
            condition: ImportCondition::Failed,
            reason: Some("Forbidden".to_string()),
            message: Some("access denied".to_string()),
            observed_generation: Some(1),
            ..Default::default()
        });

        let err = reconciler.apply(&failed).await.unwrap_err();
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(30)));
        let err = reconciler.apply(&failed).await.unwrap_err();
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(60)));

        // Access granted on the remote side
        remote.set("GET", SA_PATH, 200, &sa_json());
        remote.set("GET", TOKEN_PATH, 200, &token_json());

        let action = reconciler.apply(&failed).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let ready = status_patches(&local).pop().unwrap();
        assert_eq!(ready["condition"], "Ready");
        assert!(ready.as_object().unwrap().contains_key("reason"));
        assert!(ready["reason"].is_null());
        assert!(ready["message"].is_null());

        // The next failure starts from the first backoff step again
        remote.set("GET", SA_PATH, 403, &forbidden_json("serviceaccounts", "db-reader"));
        let err = reconciler.apply(&failed).await.unwrap_err();
        assert_eq!(reconciler.error_action(&key(), &err), Action::requeue(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_moved_target_namespace_removes_old_secret() {
        let name = key().mirrored_secret_name();
        let local = local_mock("prod")
            .on_post("/api/v1/namespaces/team-b/secrets", 201, &token_secret_json("team-b", &name, "x", None))
            .on_get(&secret_path("team-a"), 200, &owned_secret("team-a", &name, "team-a/import-db").to_string())
            .on_delete(&secret_path("team-a"), 200, &deleted_json());
        let remote = remote_mock();

        let mut moved = import("prod");
        moved.spec.target_namespace = Some("team-b".to_string());
        moved.status = Some(ServiceAccountImportStatus {
            condition: ImportCondition::Ready,
            secret_name: Some(name.clone()),
            secret_namespace: Some("team-a".to_string()),
            ..Default::default()
        });

        reconciler(&local, Some(&remote)).apply(&moved).await.unwrap();

        let posts = local.requests_with("POST");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].json()["metadata"]["namespace"], "team-b");
        assert!(posts[0].json()["metadata"]["ownerReferences"].is_null());

        let deletes = local.requests_with("DELETE");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].path, secret_path("team-a"));

        assert_eq!(status_patches(&local)[0]["secretNamespace"], "team-b");
    }

    #[tokio::test]
    async fn test_cleanup_removes_secrets_without_listing_cluster() {
        let name = key().mirrored_secret_name();
        let local = MockService::new()
            .on_get(&secret_path("team-b"), 200, &owned_secret("team-b", &name, "team-a/import-db").to_string())
            .on_delete(&secret_path("team-b"), 200, &deleted_json())
            .on_get(&secret_path("team-a"), 200, &owned_secret("team-a", &name, "team-a/import-db").to_string())
            .on_delete(&secret_path("team-a"), 200, &deleted_json());

        let mut deleting = import("prod");
        deleting.spec.target_namespace = Some("team-b".to_string());
        deleting.status = Some(ServiceAccountImportStatus {
            secret_namespace: Some("team-a".to_string()),
            ..Default::default()
        });

        let action = reconciler(&local, None).cleanup(&deleting).await.unwrap();

        assert_eq!(action, Action::await_change());
        let deleted: Vec<String> = local.requests_with("DELETE").into_iter().map(|r| r.path).collect();
        assert_eq!(deleted, vec![secret_path("team-b"), secret_path("team-a")]);
        assert!(local.requests().iter().all(|r| r.path != "/api/v1/secrets"));
        assert!(status_patches(&local).is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_leaves_foreign_secret() {
        let name = key().mirrored_secret_name();
        let local = MockService::new().on_get(
            &secret_path("team-a"),
            200,
            &owned_secret("team-a", &name, "team-a/other").to_string(),
        );

        reconciler(&local, None).cleanup(&import("prod")).await.unwrap();

        assert!(local.requests_with("DELETE").is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans_and_reports_live_imports() {
        let orphan = key().mirrored_secret_name();
        let live = ImportKey::new("team-a", "import-live");
        let secrets = vec![
            owned_secret("team-a", &orphan, "team-a/import-db"),
            owned_secret("team-a", &live.mirrored_secret_name(), "team-a/import-live"),
            owned_secret("team-b", "other-1234abcd", "team-b/other"),
        ];
        let local = MockService::new()
            .on_get("/api/v1/secrets", 200, &list_json("SecretList", secrets))
            .on_get(
                "/apis/multicluster.admiralty.io/v1alpha1/namespaces/team-a/serviceaccountimports/import-live",
                200,
                &import_json("team-a", "import-live", "prod", 1),
            )
            .on_get(&secret_path("team-a"), 200, &owned_secret("team-a", &orphan, "team-a/import-db").to_string())
            .on_delete(&secret_path("team-a"), 200, &deleted_json());

        let owners = reconciler(&local, None).sweep_orphans("team-a").await;

        assert_eq!(owners, vec![live]);
        let deletes = local.requests_with("DELETE");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].path, secret_path("team-a"));
    }

    #[tokio::test]
    async fn test_sweep_is_skipped_without_cluster_wide_access() {
        let local = MockService::new().on_get("/api/v1/secrets", 403, &forbidden_json("secrets", ""));

        let owners = reconciler(&local, None).sweep_orphans("team-a").await;

        assert!(owners.is_empty());
        assert_eq!(local.write_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_reconciliation_converges_without_rewrites() {
        let secret_name = key().mirrored_secret_name();
        let local = local_mock("prod").on_post(
            SECRETS_PATH,
            201,
            &token_secret_json("team-a", &secret_name, "x", None),
        );
        let remote = remote_mock();
        let reconciler = reconciler(&local, Some(&remote));

        reconciler.apply(&import("prod")).await.unwrap();

        // Serve back the secret exactly as it was created
        let mut stored = local.requests_with("POST")[0].json();
        stored["apiVersion"] = "v1".into();
        stored["kind"] = "Secret".into();
        local.set("GET", &secret_path("team-a"), 200, &stored.to_string());

        let action = reconciler.apply(&import("prod")).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(local.requests_with("POST").len(), 1);
        assert!(local.requests_with("PUT").is_empty());
        assert_eq!(status_patches(&local).len(), 2);
    }

    #[test]
    fn test_with_cluster_prefixes_remote_errors() {
        let err = with_cluster(ImporterError::Forbidden("access denied".to_string()), "prod");
        assert_eq!(err.to_string(), "cluster prod: access denied");

        let err = with_cluster(ImporterError::Conflict("x".to_string()), "prod");
        assert!(matches!(err, ImporterError::Conflict(_)));
    }

    #[test]
    fn test_local_write_error_keeps_collision_and_conflict() {
        let err = local_write_error(ImporterError::Forbidden("denied".to_string()));
        assert!(matches!(err, ImporterError::Unavailable(_)));
        assert!(!err.is_terminal_for_status());

        let err = local_write_error(ImporterError::NotFound("gone".to_string()));
        assert!(matches!(err, ImporterError::Unavailable(_)));

        let err = local_write_error(ImporterError::Conflict("busy".to_string()));
        assert!(matches!(err, ImporterError::Conflict(_)));
    }
}
