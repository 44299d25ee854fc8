// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::{api::ListParams, Api};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use service_account_importer::config::Config;
use service_account_importer::kubernetes::{
    create_local_client, load_profiles, wait_for_import_crd, ClusterRegistry,
};
use service_account_importer::reconcilers::ImportReconciler;
use service_account_importer::sync::{ReconcileSettings, Reconciler};
use service_account_importer::types::ServiceAccountImport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting service-account-importer");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={}, workers={}, resync={:?}",
        config.namespace, config.workers, config.resync_interval
    );

    // Local client, never built from imported credentials
    let client = create_local_client(config.request_timeout).await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for ServiceAccountImport CRD to become available...");
    wait_for_import_crd(&client).await?;

    let registry = ClusterRegistry::from_profiles(load_profiles(&config).await?)?;
    info!("Remote clusters ({}): {:?}", registry.len(), registry.names());

    // Refuse to start when imports exist but no cluster can serve them
    let imports: Api<ServiceAccountImport> = Api::namespaced(client.clone(), &config.namespace);
    let existing = imports.list(&ListParams::default()).await?;
    registry.check_references(existing.items.iter().map(|i| i.spec.cluster_name.as_str()))?;

    let reconciler = Reconciler::new(
        client,
        Arc::new(registry),
        ReconcileSettings {
            resync_interval: config.resync_interval,
            request_timeout: config.request_timeout,
        },
    );

    info!("Starting import controller...");
    ImportReconciler::new(reconciler, config.namespace, config.workers, config.queue_capacity)
        .run()
        .await?;

    info!("Shut down cleanly");
    Ok(())
}
