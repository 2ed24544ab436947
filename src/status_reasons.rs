// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition reasons for `DirectoryService` resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status. Failure reasons come from the error taxonomy in
//! [`crate::ds_errors`]; this module holds the reasons for non-error transitions.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   phase: Ready
//!   lastReconciledGeneration: 4
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: Converged
//!       message: "Service ds-idrepo and backup task NightlyBackup converged"
//! ```

/// The single condition type maintained on every `DirectoryService`.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition status values.
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// Service, backup task and passwords match the desired state.
pub const REASON_CONVERGED: &str = "Converged";

/// A new generation was observed and convergence started.
pub const REASON_PROGRESSING: &str = "Progressing";

/// A transient failure occurred; the instance will be retried with backoff.
pub const REASON_RETRYING: &str = "Retrying";
