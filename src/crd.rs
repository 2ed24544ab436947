// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for a managed directory server instance.
//!
//! A [`DirectoryService`] declares the desired state of one directory server
//! deployment: which well-known ports are exposed through its headless service,
//! which Secret holds the administrative credential, the recurring backup task
//! the server should carry, and which administrative accounts have their
//! passwords managed.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: directory.forgerock.io/v1alpha1
//! kind: DirectoryService
//! metadata:
//!   name: ds-idrepo
//!   namespace: identity
//! spec:
//!   admin:
//!     secretName: ds-passwords
//!   backup:
//!     taskId: NightlyBackup
//!     schedule: "00 02 * * *"
//!     location: /var/backup
//!   passwords:
//!     - uid: am-identity-bind-account
//!       secretName: am-passwords
//!       key: bind-password
//! ```

use crate::constants::{
    ADMIN_PORT, DEFAULT_ADMIN_BIND_DN, DEFAULT_ADMIN_SECRET_KEY, DEFAULT_BACKUP_TASK_ID,
    HTTP_PORT, LDAPS_PORT, LDAP_PORT, REPLICATION_PORT,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition represents an observation of a resource's current state.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. The operator maintains a single `Ready` condition.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// A well-known directory server port that can be exposed by the managed service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DirectoryPort {
    /// Administration connector (4444)
    Admin,
    /// Plain LDAP (1389)
    Ldap,
    /// LDAP over TLS (1636)
    Ldaps,
    /// Inter-replica replication (8989)
    Replication,
    /// Management HTTP (8080)
    Http,
}

impl DirectoryPort {
    /// All ports in canonical order.
    pub const ALL: [DirectoryPort; 5] = [
        DirectoryPort::Admin,
        DirectoryPort::Ldap,
        DirectoryPort::Ldaps,
        DirectoryPort::Replication,
        DirectoryPort::Http,
    ];

    /// Port number.
    #[must_use]
    pub fn number(self) -> u16 {
        match self {
            DirectoryPort::Admin => ADMIN_PORT,
            DirectoryPort::Ldap => LDAP_PORT,
            DirectoryPort::Ldaps => LDAPS_PORT,
            DirectoryPort::Replication => REPLICATION_PORT,
            DirectoryPort::Http => HTTP_PORT,
        }
    }

    /// Service port name.
    #[must_use]
    pub fn port_name(self) -> &'static str {
        match self {
            DirectoryPort::Admin => "tcp-admin",
            DirectoryPort::Ldap => "tcp-ldap",
            DirectoryPort::Ldaps => "tcp-ldaps",
            DirectoryPort::Replication => "tcp-replication",
            DirectoryPort::Http => "http",
        }
    }
}

/// Reference to the Secret holding the administrative credential.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentials {
    /// DN used to bind as the administrator.
    #[serde(default = "default_admin_bind_dn")]
    pub bind_dn: String,

    /// Name of the Secret (same namespace) holding the admin password.
    pub secret_name: String,

    /// Key within the Secret.
    #[serde(default = "default_admin_secret_key")]
    pub key: String,
}

fn default_admin_bind_dn() -> String {
    DEFAULT_ADMIN_BIND_DN.to_string()
}

fn default_admin_secret_key() -> String {
    DEFAULT_ADMIN_SECRET_KEY.to_string()
}

/// What to do when a recurring task with the desired identifier already exists
/// on the server with a different schedule or location.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum TaskConflictPolicy {
    /// Leave the server task untouched and report the conflict in status.
    #[default]
    Report,
    /// Delete the existing task and create it again with the desired attributes.
    Replace,
}

/// Recurring backup task declared on the directory server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Task identifier, unique within the server's recurring task container.
    #[serde(default = "default_backup_task_id")]
    pub task_id: String,

    /// Five-field cron expression, e.g. `00 02 * * *`.
    pub schedule: String,

    /// Backup storage location on the server.
    pub location: String,

    /// Human-readable description stored on the task entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Conflict handling when the task exists with different attributes.
    #[serde(default)]
    pub conflict_policy: TaskConflictPolicy,
}

fn default_backup_task_id() -> String {
    DEFAULT_BACKUP_TASK_ID.to_string()
}

/// An administrative account whose password is kept equal to a Secret value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedPassword {
    /// `uid` of the account under `ou=admins,ou=identities`.
    pub uid: String,

    /// Secret (same namespace) holding the desired password.
    pub secret_name: String,

    /// Key within the Secret.
    pub key: String,
}

/// `DirectoryService` declares a managed directory server instance.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "directory.forgerock.io",
    version = "v1alpha1",
    kind = "DirectoryService",
    namespaced,
    shortname = "ds",
    doc = "DirectoryService declares a directory server instance whose network service, recurring backup task and administrative passwords are reconciled by the operator.",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "DirectoryServiceStatus")]
#[serde(rename_all = "camelCase")]
pub struct DirectoryServiceSpec {
    /// Ports exposed by the headless service. Defaults to all well-known ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<DirectoryPort>>,

    /// Administrative credential used to open admin sessions.
    pub admin: AdminCredentials,

    /// LDAP URL override. Defaults to the plain LDAP port of the managed service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Recurring backup task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,

    /// Administrative accounts whose passwords are managed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passwords: Vec<ManagedPassword>,
}

impl DirectoryServiceSpec {
    /// Ports to expose in canonical order, de-duplicated.
    #[must_use]
    pub fn exposed_ports(&self) -> Vec<DirectoryPort> {
        match &self.ports {
            None => DirectoryPort::ALL.to_vec(),
            Some(requested) => DirectoryPort::ALL
                .into_iter()
                .filter(|port| requested.contains(port))
                .collect(),
        }
    }

    /// Whether reconciling this spec needs an admin session at all.
    #[must_use]
    pub fn needs_admin_session(&self) -> bool {
        self.backup.is_some() || !self.passwords.is_empty()
    }
}

/// Lifecycle phase of a `DirectoryService`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    /// Observed, no convergence attempted yet (or waiting to retry).
    #[default]
    Pending,
    /// Convergence in progress for the current generation.
    Converging,
    /// Service and administrative state converged.
    Ready,
    /// Terminal failure for the current generation, or retry budget exhausted.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Converging => "Converging",
            Phase::Ready => "Ready",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// `DirectoryService` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// `metadata.generation` last converged successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_task_id: Option<String>,

    /// DN to salted fingerprint of the password last applied to it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credential_fingerprints: BTreeMap<String, String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
