// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types.

pub mod service_account_import;

pub use service_account_import::{
    ImportCondition, ImportKey, ServiceAccountImport, ServiceAccountImportSpec,
    ServiceAccountImportStatus,
};
