// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `DirectoryService` status writer.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (always `Ready` here)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the condition changed
//!
//! # Optimistic concurrency
//!
//! Status is written as a JSON merge patch that carries the
//! `metadata.resourceVersion` observed at the start of the reconciliation. If
//! another writer got there first the API server answers 409 and nothing is
//! clobbered; the reconciler treats that as transient and re-reads.

use crate::cluster_api::ClusterApi;
use crate::crd::{Condition, DirectoryService, DirectoryServiceStatus, Phase};
use crate::ds_errors::ApiError;
use crate::status_reasons::CONDITION_TYPE_READY;
use chrono::Utc;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Create a new Kubernetes condition with the current timestamp.
///
/// # Example
///
/// ```rust,no_run
/// # use ds_operator::reconcilers::status::create_condition;
/// let condition = create_condition("Ready", "True", "Converged", "Service ds-idrepo converged");
/// assert_eq!(condition.r#type, "Ready");
/// assert_eq!(condition.status, "True");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Update or add a condition in a mutable conditions list (in-memory, no API call).
///
/// Preserves `lastTransitionTime` when the status value does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    new.iter().all(|new_cond| {
        current.iter().any(|curr| {
            curr.r#type == new_cond.r#type
                && curr.status == new_cond.status
                && curr.reason == new_cond.reason
                && curr.message == new_cond.message
        })
    })
}

/// Collects status changes for one `DirectoryService` during a reconciliation
/// and writes them in a single optimistic-concurrency patch.
///
/// ```rust,ignore
/// let mut status = DirectoryServiceStatusUpdater::new(&ds);
/// status.set_phase(Phase::Converging);
/// status.set_ready_condition("False", "Progressing", "Converging generation 3");
/// status.apply(api).await?;
/// ```
pub struct DirectoryServiceStatusUpdater {
    namespace: String,
    name: String,
    resource_version: Option<String>,
    current_status: Option<DirectoryServiceStatus>,
    new_status: DirectoryServiceStatus,
}

impl DirectoryServiceStatusUpdater {
    /// Start from the status the instance currently carries.
    #[must_use]
    pub fn new(ds: &DirectoryService) -> Self {
        let current_status = ds.status.clone();
        let new_status = current_status.clone().unwrap_or_default();

        Self {
            namespace: ds.namespace().unwrap_or_default(),
            name: ds.name_any(),
            resource_version: ds.resource_version(),
            current_status,
            new_status,
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.new_status.phase = Some(phase);
    }

    pub fn set_ready_condition(&mut self, status: &str, reason: &str, message: &str) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            CONDITION_TYPE_READY,
            status,
            reason,
            message,
        );
    }

    pub fn set_last_error(&mut self, error: Option<String>) {
        self.new_status.last_error = error;
    }

    pub fn set_last_reconciled_generation(&mut self, generation: Option<i64>) {
        self.new_status.last_reconciled_generation = generation;
    }

    pub fn set_service_name(&mut self, service_name: Option<String>) {
        self.new_status.service_name = service_name;
    }

    pub fn set_backup_task_id(&mut self, task_id: Option<String>) {
        self.new_status.backup_task_id = task_id;
    }

    /// Replace the recorded credential fingerprints.
    pub fn set_credential_fingerprints(
        &mut self,
        fingerprints: std::collections::BTreeMap<String, String>,
    ) {
        self.new_status.credential_fingerprints = fingerprints;
    }

    #[must_use]
    pub fn status(&self) -> &DirectoryServiceStatus {
        &self.new_status
    }

    /// Whether the collected status differs semantically from the current one.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let Some(current) = &self.current_status else {
            return true;
        };
        let new = &self.new_status;

        current.phase != new.phase
            || current.last_reconciled_generation != new.last_reconciled_generation
            || current.last_error != new.last_error
            || current.service_name != new.service_name
            || current.backup_task_id != new.backup_task_id
            || current.credential_fingerprints != new.credential_fingerprints
            || !conditions_equal(&current.conditions, &new.conditions)
    }

    /// The merge patch that moves the current status to the collected one.
    ///
    /// Optional fields are always present so that clearing one writes `null`.
    /// Fingerprints removed since the last write are nulled individually.
    #[must_use]
    pub fn patch(&self) -> Value {
        let new = &self.new_status;

        let mut fingerprints: Map<String, Value> = new
            .credential_fingerprints
            .iter()
            .map(|(dn, fp)| (dn.clone(), Value::String(fp.clone())))
            .collect();
        if let Some(current) = &self.current_status {
            for dn in current.credential_fingerprints.keys() {
                if !new.credential_fingerprints.contains_key(dn) {
                    fingerprints.insert(dn.clone(), Value::Null);
                }
            }
        }

        let mut patch = json!({
            "status": {
                "phase": new.phase,
                "lastReconciledGeneration": new.last_reconciled_generation,
                "lastError": new.last_error,
                "conditions": new.conditions,
                "serviceName": new.service_name,
                "backupTaskId": new.backup_task_id,
                "credentialFingerprints": fingerprints,
            }
        });
        if let Some(rv) = &self.resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        patch
    }

    /// Write the collected status if it changed.
    ///
    /// Returns the updated object, or `None` when no write was needed.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] from the status patch (409 if the object moved on).
    pub async fn apply(&self, api: &dyn ClusterApi) -> Result<Option<DirectoryService>, ApiError> {
        if !self.has_changes() {
            debug!(
                namespace = %self.namespace,
                name = %self.name,
                "DirectoryService status unchanged, skipping update"
            );
            return Ok(None);
        }

        let updated = api
            .patch_directory_service_status(&self.namespace, &self.name, &self.patch())
            .await?;

        debug!(
            namespace = %self.namespace,
            name = %self.name,
            phase = ?self.new_status.phase,
            "Updated DirectoryService status"
        );
        Ok(Some(updated))
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
