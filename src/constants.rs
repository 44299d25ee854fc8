// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys written on mirrored secrets
pub mod annotations {
    /// Back-reference to the owning import, formatted `namespace/name`
    pub const IMPORT: &str = "multicluster.admiralty.io/service-account-import";
    /// Hex sha256 of the mirrored data
    pub const CONTENT_HASH: &str = "multicluster.admiralty.io/content-hash";
    /// Remote origin, formatted `cluster/namespace/serviceaccount`
    pub const SOURCE: &str = "multicluster.admiralty.io/source";

    /// Set by the token controller on service-account token secrets
    pub const SERVICE_ACCOUNT_NAME: &str = "kubernetes.io/service-account.name";
    pub const SERVICE_ACCOUNT_UID: &str = "kubernetes.io/service-account.uid";
}

/// Kubernetes label keys written on mirrored secrets
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// The operator name used as field manager and managed-by label value
pub const OPERATOR_NAME: &str = "service-account-importer";

/// Finalizer holding an import until its mirrored secret is removed
pub const FINALIZER: &str = "multicluster.admiralty.io/service-account-import";

/// Keys of the mirrored secret's data
pub mod data_keys {
    pub const TOKEN: &str = "token";
    pub const CA_CRT: &str = "ca.crt";
    pub const NAMESPACE: &str = "namespace";
    pub const SERVER: &str = "server";
}

pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Retry cadences used by the reconciler
pub mod retry {
    /// Transient failures (network, API server, write conflicts)
    pub const FAST_INITIAL_SECS: u64 = 1;
    pub const FAST_MAX_SECS: u64 = 300;
    /// Failures that need a fix on the remote side (RBAC, missing account)
    pub const SLOW_INITIAL_SECS: u64 = 30;
    pub const SLOW_MAX_SECS: u64 = 900;
    /// Optimistic-concurrency attempts per mirror write
    pub const MAX_CONFLICT_ATTEMPTS: u32 = 5;
}

/// Defaults for environment configuration
pub mod defaults {
    pub const WORKERS: usize = 4;
    pub const QUEUE_CAPACITY: usize = 256;
    pub const RESYNC_INTERVAL_SECS: u64 = 300;
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
    pub const IMPORTS_DIR: &str = "/var/run/secrets/admiralty.io/serviceaccountimports";
}
