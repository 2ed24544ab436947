// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the directory service operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the `DirectoryService` CRD
pub const API_GROUP: &str = "directory.forgerock.io";

/// API version for the `DirectoryService` CRD
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "directory.forgerock.io/v1alpha1";

/// Kind name for `DirectoryService` resource
pub const KIND_DIRECTORY_SERVICE: &str = "DirectoryService";

/// Kind name for core `Service` resources (used for metrics labels)
pub const KIND_SERVICE: &str = "Service";

/// Field manager used for all writes made by the operator
pub const FIELD_MANAGER: &str = "ds-operator";

// ============================================================================
// Directory Server Well-Known Ports
// ============================================================================

/// Administration connector port
pub const ADMIN_PORT: u16 = 4444;

/// Plain LDAP port
pub const LDAP_PORT: u16 = 1389;

/// LDAP over TLS port
pub const LDAPS_PORT: u16 = 1636;

/// Inter-replica replication port
pub const REPLICATION_PORT: u16 = 8989;

/// Management HTTP port
pub const HTTP_PORT: u16 = 8080;

// ============================================================================
// Directory Protocol Constants
// ============================================================================

/// Default bind DN for the administrative account
pub const DEFAULT_ADMIN_BIND_DN: &str = "uid=admin";

/// Default key holding the admin password inside the referenced Secret
pub const DEFAULT_ADMIN_SECRET_KEY: &str = "dirmanager.pw";

/// Search base for administrative identities
pub const ADMIN_IDENTITIES_BASE: &str = "ou=admins,ou=identities";

/// Container holding recurring tasks on the directory server
pub const RECURRING_TASKS_BASE: &str = "cn=Recurring Tasks,cn=Tasks";

/// Object class carried by backup tasks
pub const BACKUP_TASK_OBJECT_CLASS: &str = "ds-task-backup";

/// Server-side implementation class for backup tasks
pub const BACKUP_TASK_CLASS_NAME: &str = "org.opends.server.tasks.BackupTask";

/// Task state written for recurring tasks
pub const TASK_STATE_RECURRING: &str = "RECURRING";

/// Default recurring backup task identifier
pub const DEFAULT_BACKUP_TASK_ID: &str = "NightlyBackup";

/// LDAP result code: invalid credentials
pub const LDAP_RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP result code: constraint violation (e.g. password policy rejection)
pub const LDAP_RC_CONSTRAINT_VIOLATION: u32 = 19;

/// LDAP result code: inappropriate authentication
pub const LDAP_RC_INAPPROPRIATE_AUTH: u32 = 48;

/// LDAP result code: insufficient access rights
pub const LDAP_RC_INSUFFICIENT_ACCESS: u32 = 50;

/// LDAP result code: no such object
pub const LDAP_RC_NO_SUCH_OBJECT: u32 = 32;

/// LDAP result code: entry already exists
pub const LDAP_RC_ENTRY_ALREADY_EXISTS: u32 = 68;

// ============================================================================
// Timeouts
// ============================================================================

/// Default timeout for dialing and binding to the directory server
pub const DEFAULT_LDAP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single directory operation
pub const DEFAULT_LDAP_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Default page size for paged searches
pub const DEFAULT_LDAP_PAGE_SIZE: i32 = 500;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors that escape the reconciler (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Periodic resync for instances in a settled phase (5 minutes)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Number of transient failures tolerated before an instance is marked Failed
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 8;

/// First delay of the per-instance reconcile backoff (2 seconds)
pub const RECONCILE_BACKOFF_BASE_MILLIS: u64 = 2000;

/// Upper bound of the per-instance reconcile backoff (5 minutes)
pub const RECONCILE_BACKOFF_CAP_SECS: u64 = 300;

/// Delay used to re-run a reconcile that was coalesced while another was in flight
pub const COALESCED_REQUEUE_MILLIS: u64 = 500;

/// Default maximum number of concurrent reconciliations
pub const DEFAULT_CONCURRENCY: u16 = 8;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Default bind address for metrics HTTP server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
