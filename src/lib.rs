// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # ds-operator - Directory Service Operator for Kubernetes
//!
//! ds-operator reconciles `DirectoryService` custom resources into running,
//! administered directory server instances.
//!
//! ## Overview
//!
//! For every `DirectoryService` the operator:
//!
//! - Maintains a headless `Service` exposing the directory ports
//! - Declares a recurring backup task on the directory server over LDAP
//! - Keeps administrative account passwords equal to values held in Secrets
//! - Reports progress and failures through the status subresource
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic and its supporting machinery
//! - [`ldap`] - Administrative sessions against a directory server
//! - [`cluster_api`] - The orchestration-API verbs the reconciler uses
//! - [`context`] - Shared state handed to every reconciliation
//! - [`config`] - Command-line and environment configuration
//! - [`ds_errors`] - Error taxonomy and classification
//!
//! ## Example
//!
//! ```rust,no_run
//! use ds_operator::crd::{AdminCredentials, BackupSpec, DirectoryServiceSpec, TaskConflictPolicy};
//!
//! let spec = DirectoryServiceSpec {
//!     ports: None,
//!     admin: AdminCredentials {
//!         bind_dn: "uid=admin".to_string(),
//!         secret_name: "ds-passwords".to_string(),
//!         key: "dirmanager.pw".to_string(),
//!     },
//!     endpoint: None,
//!     backup: Some(BackupSpec {
//!         task_id: "NightlyBackup".to_string(),
//!         schedule: "00 02 * * *".to_string(),
//!         location: "/var/backup".to_string(),
//!         description: None,
//!         conflict_policy: TaskConflictPolicy::Report,
//!     }),
//!     passwords: vec![],
//! };
//! ```

pub mod cluster_api;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod ds_errors;
pub mod labels;
pub mod ldap;
pub mod metrics;
pub mod reconcilers;
pub mod status_reasons;
pub mod validation;

#[cfg(test)]
pub(crate) mod fakes;
