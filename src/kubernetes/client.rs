// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Local and remote cluster client creation

use crate::error::{ImporterError, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KConfig};
use std::time::Duration;
use tracing::{debug, info};

/// Create the client the operator itself runs with.
///
/// Uses the standard in-cluster / KUBECONFIG inference only. Imported
/// credentials mounted into the pod are never considered here, so the
/// process cannot end up authenticating with a credential it manages.
pub async fn create_local_client(timeout: Duration) -> Result<Client> {
    let mut config = KConfig::infer()
        .await
        .map_err(|e| ImporterError::KubeconfigError(format!("Failed to infer config: {}", e)))?;
    apply_timeouts(&mut config, timeout);

    info!(
        "Local cluster {} (default namespace {})",
        config.cluster_url, config.default_namespace
    );

    Client::try_from(config)
        .map_err(|e| ImporterError::KubeconfigError(format!("Failed to create client: {}", e)))
}

/// Build a client configuration for one context of a kubeconfig
pub async fn config_for_context(
    kubeconfig: &Kubeconfig,
    context: &str,
    timeout: Duration,
) -> Result<KConfig> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };

    let mut config = KConfig::from_custom_kubeconfig(kubeconfig.clone(), &options)
        .await
        .map_err(|e| {
            ImporterError::KubeconfigError(format!(
                "Failed to create config for context {}: {}",
                context, e
            ))
        })?;
    apply_timeouts(&mut config, timeout);

    debug!("Context {} points at {}", context, config.cluster_url);
    Ok(config)
}

/// Parse a kubeconfig document
pub fn parse_kubeconfig(kubeconfig: &str) -> Result<Kubeconfig> {
    serde_yaml::from_str(kubeconfig)
        .map_err(|e| ImporterError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))
}

/// Bound every request so a hung cluster cannot stall a worker forever
fn apply_timeouts(config: &mut KConfig, timeout: Duration) {
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    config.write_timeout = Some(timeout);
}
