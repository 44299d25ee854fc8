// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("cluster \"{0}\" is not configured")]
    NotConfigured(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("secret {namespace}/{name} already exists and is owned by {owner}")]
    NameCollision {
        namespace: String,
        name: String,
        owner: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ImporterError>;

/// How the reconciler should schedule the next attempt after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Wait for the declaration to change
    Never,
    /// Capped exponential backoff at a slow cadence
    Slow,
    /// Capped exponential backoff
    Fast,
}

impl ImporterError {
    /// Classify a Kubernetes API error returned while talking to `what`.
    pub fn from_api(err: kube::Error, what: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => {
                ImporterError::NotFound(format!("{} not found", what))
            }
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
                ImporterError::Forbidden(format!("access to {} denied: {}", what, resp.message))
            }
            kube::Error::Api(resp) if resp.code == 409 => {
                ImporterError::Conflict(format!("{}: {}", what, resp.message))
            }
            _ => ImporterError::Unavailable(format!("failed to reach {}: {}", what, err)),
        }
    }

    /// Status reason recorded on the import for this error
    pub fn reason(&self) -> &'static str {
        match self {
            ImporterError::NotConfigured(_) => "NotConfigured",
            ImporterError::NotFound(_) => "NotFound",
            ImporterError::Forbidden(_) => "Forbidden",
            ImporterError::Conflict(_) => "Conflict",
            ImporterError::NameCollision { .. } => "NameCollision",
            ImporterError::InvalidConfig(_) => "InvalidConfig",
            ImporterError::KubeError(_)
            | ImporterError::KubeconfigError(_)
            | ImporterError::Unavailable(_) => "Unavailable",
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            ImporterError::NotConfigured(_) | ImporterError::InvalidConfig(_) => RetryClass::Never,
            ImporterError::NotFound(_)
            | ImporterError::Forbidden(_)
            | ImporterError::NameCollision { .. } => RetryClass::Slow,
            ImporterError::KubeError(_)
            | ImporterError::KubeconfigError(_)
            | ImporterError::Unavailable(_)
            | ImporterError::Conflict(_) => RetryClass::Fast,
        }
    }

    /// Whether this error moves the import into the Failed condition
    pub fn is_terminal_for_status(&self) -> bool {
        self.retry_class() != RetryClass::Fast
    }
}
