// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Credential synchronization: fetching, mirroring and the per-import
//! reconciliation that drives both.

pub mod backoff;
pub mod fetcher;
pub mod mirror;
pub mod reconcile;

pub use fetcher::{fetch_credential, RemoteCredential};
pub use mirror::{CredentialMirror, MirrorTarget, RemoveOutcome, SyncOutcome};
pub use reconcile::{ReconcileSettings, Reconciler};
