// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the directory service operator.
//!
//! This module provides specialized error types for:
//! - Administrative sessions against the directory server (connect, bind, search,
//!   password modify, add/delete entry)
//! - Convergence of the managed headless `Service`
//! - Recurring backup task scheduling
//! - Administrative password rotation
//! - Desired-state validation
//!
//! Every error can be classified with [`ErrorClass`]. The reconciler alone uses the
//! class to decide between backoff, an immediate terminal status, or waiting for a
//! spec change. Each error also maps to a `CamelCase` status reason.

use crate::constants::{
    LDAP_RC_CONSTRAINT_VIOLATION, LDAP_RC_INAPPROPRIATE_AUTH, LDAP_RC_INSUFFICIENT_ACCESS,
    LDAP_RC_INVALID_CREDENTIALS,
};
use thiserror::Error;

/// How the reconciler must react to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or API unavailability. Retried with exponential backoff.
    Transient,
    /// Rejected credentials or forbidden writes. Needs external remediation.
    Authentication,
    /// Existing state diverges from desired state and no policy resolves it.
    Conflict,
    /// Desired state cannot be satisfied as written. Terminal for the generation.
    InvalidSpec,
}

impl ErrorClass {
    /// Short label used for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Conflict => "conflict",
            ErrorClass::InvalidSpec => "invalid_spec",
        }
    }
}

/// Failure reported by an orchestration-API call.
///
/// `code` is the HTTP status code, or `None` when the request never produced a
/// response (transport failure, timeout).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ApiError {
    pub code: Option<u16>,
    pub reason: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == Some(404)
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.code == Some(409)
    }

    /// Classify by HTTP status code.
    ///
    /// 429, 5xx, 404 (object vanished between read and write), 409 (lost an
    /// optimistic-concurrency race) and transport errors are transient.
    /// 401 and 403 are authentication failures. Other 4xx mean the object we
    /// derived from the desired state was rejected.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self.code {
            None | Some(404 | 409 | 429) => ErrorClass::Transient,
            Some(401 | 403) => ErrorClass::Authentication,
            Some(code) if code >= 500 => ErrorClass::Transient,
            Some(_) => ErrorClass::InvalidSpec,
        }
    }
}

impl From<&kube::Error> for ApiError {
    fn from(err: &kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ApiError::new(Some(response.code), response.message.clone()),
            other => ApiError::new(None, other.to_string()),
        }
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        ApiError::from(&err)
    }
}

/// Errors raised by an administrative session against the directory server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Dialing the endpoint failed (refused, unreachable, DNS, TLS).
    #[error("Cannot connect to directory server at {endpoint}: {reason}")]
    ConnectFailure { endpoint: String, reason: String },

    /// The server rejected the bind.
    #[error("Bind as '{bind_dn}' to {endpoint} rejected (result code {code}): {reason}")]
    BindFailure {
        endpoint: String,
        bind_dn: String,
        code: u32,
        reason: String,
    },

    #[error("Search under '{base}' with filter {filter} failed: {reason}")]
    SearchFailure {
        base: String,
        filter: String,
        code: Option<u32>,
        reason: String,
    },

    #[error("Password modify for '{dn}' failed: {reason}")]
    ModifyFailure {
        dn: String,
        code: Option<u32>,
        reason: String,
    },

    /// The recurring task entry already exists (LDAP result code 68).
    #[error("Recurring task '{task_id}' already exists")]
    DuplicateTask { task_id: String },

    #[error("Adding entry '{dn}' failed: {reason}")]
    AddFailure {
        dn: String,
        code: Option<u32>,
        reason: String,
    },

    #[error("Deleting entry '{dn}' failed: {reason}")]
    DeleteFailure {
        dn: String,
        code: Option<u32>,
        reason: String,
    },

    /// An operation exceeded its timeout.
    #[error("Directory operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The session was already closed.
    #[error("Administrative session is closed")]
    Closed,
}

impl SessionError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BindFailure { .. } => ErrorClass::Authentication,
            Self::DuplicateTask { .. } => ErrorClass::Conflict,
            Self::SearchFailure { code, .. }
            | Self::ModifyFailure { code, .. }
            | Self::AddFailure { code, .. }
            | Self::DeleteFailure { code, .. } => class_for_result_code(*code),
            Self::ConnectFailure { .. } | Self::Timeout { .. } | Self::Closed => {
                ErrorClass::Transient
            }
        }
    }

    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::ConnectFailure { .. } => "DirectoryUnreachable",
            Self::BindFailure { .. } => "AuthenticationFailed",
            Self::SearchFailure { .. } => "SearchFailed",
            Self::ModifyFailure { .. } => "PasswordModifyFailed",
            Self::DuplicateTask { .. } => "TaskAlreadyExists",
            Self::AddFailure { .. } => "AddEntryFailed",
            Self::DeleteFailure { .. } => "DeleteEntryFailed",
            Self::Timeout { .. } => "DirectoryTimeout",
            Self::Closed => "SessionClosed",
        }
    }
}

/// Classify an LDAP result code returned by a non-bind operation.
fn class_for_result_code(code: Option<u32>) -> ErrorClass {
    match code {
        Some(LDAP_RC_INVALID_CREDENTIALS | LDAP_RC_INAPPROPRIATE_AUTH | LDAP_RC_INSUFFICIENT_ACCESS) => {
            ErrorClass::Authentication
        }
        Some(LDAP_RC_CONSTRAINT_VIOLATION) => ErrorClass::InvalidSpec,
        _ => ErrorClass::Transient,
    }
}

/// Errors raised while converging the managed `Service`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvergenceError {
    /// An orchestration-API call failed.
    #[error("Service {service}: {operation} failed: {source}")]
    ApiFailure {
        service: String,
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// A field that cannot be patched has drifted.
    #[error("Service {service}: immutable field {field} is '{observed}', expected '{expected}'")]
    ImmutableFieldDrift {
        service: String,
        field: &'static str,
        observed: String,
        expected: String,
    },

    /// The service is controlled by another owner.
    #[error("Service {service} is controlled by {owner}, not by this DirectoryService")]
    OwnershipConflict { service: String, owner: String },

    /// The patch was applied but the observed object still differs.
    #[error("Service {service} still differs from desired state after patch: {fields}")]
    DriftPersisted { service: String, fields: String },
}

impl ConvergenceError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ApiFailure { source, .. } => source.class(),
            Self::ImmutableFieldDrift { .. } | Self::OwnershipConflict { .. } => {
                ErrorClass::Conflict
            }
            Self::DriftPersisted { .. } => ErrorClass::Transient,
        }
    }

    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::ApiFailure { .. } => "ServiceConvergenceFailed",
            Self::ImmutableFieldDrift { .. } => "ServiceImmutableFieldDrift",
            Self::OwnershipConflict { .. } => "ServiceOwnershipConflict",
            Self::DriftPersisted { .. } => "ServiceDriftPersisted",
        }
    }
}

/// Errors raised by the recurring task scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The task exists with a different schedule or location.
    #[error(
        "Recurring task '{task_id}' exists with schedule '{observed_schedule}' and location \
         '{observed_location}', desired '{desired_schedule}' at '{desired_location}'"
    )]
    TaskConflict {
        task_id: String,
        observed_schedule: String,
        observed_location: String,
        desired_schedule: String,
        desired_location: String,
    },
}

impl SchedulerError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Session(err) => err.class(),
            Self::TaskConflict { .. } => ErrorClass::Conflict,
        }
    }

    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Session(err) => err.status_reason(),
            Self::TaskConflict { .. } => "BackupTaskConflict",
        }
    }
}

/// Errors raised while rotating administrative passwords.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Identity uid={uid} not found under ou=admins,ou=identities")]
    IdentityNotFound { uid: String },
}

impl CredentialError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Session(err) => err.class(),
            Self::IdentityNotFound { .. } => ErrorClass::InvalidSpec,
        }
    }

    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Session(err) => err.status_reason(),
            Self::IdentityNotFound { .. } => "IdentityNotFound",
        }
    }
}

/// Desired-state validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid backup schedule '{schedule}': {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Field {field} must not be empty")]
    EmptyField { field: String },

    #[error("Managed password for uid={uid} is declared more than once")]
    DuplicatePasswordUid { uid: String },
}

/// Top-level error for one reconciliation of a `DirectoryService`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// A referenced Secret or key is missing.
    #[error("Secret {namespace}/{secret} has no key '{key}'")]
    CredentialUnavailable {
        namespace: String,
        secret: String,
        key: String,
    },

    /// A Kubernetes API call made directly by the reconciler failed.
    #[error("Kubernetes API call '{operation}' failed: {source}")]
    Api {
        operation: String,
        #[source]
        source: ApiError,
    },

    /// Transient failures exceeded the retry budget.
    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },
}

impl ReconcileError {
    #[must_use]
    pub fn api(operation: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            operation: operation.into(),
            source,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::CredentialUnavailable { .. } => ErrorClass::InvalidSpec,
            Self::Convergence(err) => err.class(),
            Self::Session(err) => err.class(),
            Self::Scheduler(err) => err.class(),
            Self::Credential(err) => err.class(),
            Self::Api { source, .. } => source.class(),
            Self::RetryBudgetExhausted { .. } => ErrorClass::Transient,
        }
    }

    /// Returns true if the reconciler should back off and retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns the Kubernetes status reason code for this error.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationFailed",
            Self::Convergence(err) => err.status_reason(),
            Self::Session(err) => err.status_reason(),
            Self::Scheduler(err) => err.status_reason(),
            Self::Credential(err) => err.status_reason(),
            Self::CredentialUnavailable { .. } => "CredentialUnavailable",
            Self::Api { source, .. } => match source.class() {
                ErrorClass::Authentication => "Forbidden",
                _ => "KubernetesApiError",
            },
            Self::RetryBudgetExhausted { .. } => "RetryBudgetExhausted",
        }
    }
}

#[cfg(test)]
#[path = "ds_errors_tests.rs"]
mod ds_errors_tests;
