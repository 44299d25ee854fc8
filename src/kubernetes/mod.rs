// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, client creation and the remote
//! cluster registry.

pub mod client;
pub mod crd;
pub mod profiles;
pub mod registry;

pub use client::create_local_client;
pub use crd::wait_for_import_crd;
pub use profiles::{load_profiles, ClusterProfile};
pub use registry::{ClusterRegistry, RemoteCluster};
