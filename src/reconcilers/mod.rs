// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes controllers driving reconciliation.

pub mod import;

pub use import::ImportReconciler;
