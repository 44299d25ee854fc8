// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::defaults;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace whose ServiceAccountImports are watched. Required, no default.
    pub namespace: String,
    /// Number of parallel reconciliation workers
    pub workers: usize,
    /// Capacity of the trigger channel feeding the controller
    pub queue_capacity: usize,
    /// Interval between re-syncs of a Ready import
    pub resync_interval: Duration,
    /// Upper bound for every single API call
    pub request_timeout: Duration,
    /// Kubeconfig whose contexts become cluster profiles
    pub remote_kubeconfig: Option<PathBuf>,
    /// Directory of mounted imported credentials that become cluster profiles
    pub imports_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .context("WATCH_NAMESPACE environment variable not set")?;
        validate_namespace(&namespace)?;

        let workers = parse_or(&lookup, "WORKERS", defaults::WORKERS)?;
        if workers == 0 {
            bail!("WORKERS must be at least 1");
        }

        let queue_capacity = parse_or(&lookup, "QUEUE_CAPACITY", defaults::QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be at least 1");
        }

        let resync_secs = parse_or(&lookup, "RESYNC_INTERVAL_SECS", defaults::RESYNC_INTERVAL_SECS)?;
        let timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", defaults::REQUEST_TIMEOUT_SECS)?;
        if resync_secs == 0 || timeout_secs == 0 {
            bail!("RESYNC_INTERVAL_SECS and REQUEST_TIMEOUT_SECS must be positive");
        }

        Ok(Config {
            namespace,
            workers,
            queue_capacity,
            resync_interval: Duration::from_secs(resync_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            remote_kubeconfig: lookup("REMOTE_KUBECONFIG")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            imports_dir: lookup("SERVICE_ACCOUNT_IMPORTS_DIR")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(defaults::IMPORTS_DIR)),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Check that a namespace is a valid DNS-1123 label
fn validate_namespace(namespace: &str) -> Result<()> {
    let valid_chars = namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !namespace.starts_with('-') && !namespace.ends_with('-');

    if namespace.is_empty() || namespace.len() > 63 || !valid_chars || !valid_edges {
        bail!("WATCH_NAMESPACE {:?} is not a valid namespace name", namespace);
    }
    Ok(())
}
