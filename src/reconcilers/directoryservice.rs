// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `DirectoryService` reconciliation logic.
//!
//! One reconciliation walks the instance through these steps:
//!
//! 1. Skip instances that are being deleted; owner references let the API
//!    server garbage-collect the managed `Service`.
//! 2. Validate the spec. An invalid spec marks the instance `Failed` until the
//!    spec changes.
//! 3. Mark a not-yet-reconciled generation `Converging`, unless a previous
//!    pass already left it `Converging` or `Pending`.
//! 4. Converge the headless `Service`.
//! 5. Re-read the instance and stop quietly if it was deleted or replaced
//!    while the service was being converged.
//! 6. Resolve the admin credential and any managed passwords from Secrets.
//! 7. Open one admin session and run the backup scheduler, then password
//!    rotation. The instance is re-checked before each of the two, so a
//!    deletion during the session stops further writes.
//! 8. Mark the instance `Ready` for its generation and requeue for resync.
//!
//! Failures are classified once, here. Transient ones put the instance in
//! `Pending` and requeue with a per-instance exponential backoff until the
//! retry budget runs out. Authentication failures and conflicts mark it `Failed`
//! immediately and wait for the next resync.

use crate::cluster_api::ClusterApi;
use crate::constants::{
    COALESCED_REQUEUE_MILLIS, ERROR_REQUEUE_DURATION_SECS, KIND_DIRECTORY_SERVICE, LDAP_PORT,
};
use crate::context::Context;
use crate::crd::{DirectoryService, Phase};
use crate::ds_errors::{ErrorClass, ReconcileError};
use crate::ldap::with_session;
use crate::metrics;
use crate::reconcilers::backup::{ensure_backup_task, BackupTask};
use crate::reconcilers::credentials::{rotate_passwords, ResolvedPassword};
use crate::reconcilers::retry::BudgetDecision;
use crate::reconcilers::service::converge_service;
use crate::reconcilers::status::DirectoryServiceStatusUpdater;
use crate::status_reasons::{
    CONDITION_FALSE, CONDITION_TRUE, REASON_CONVERGED, REASON_PROGRESSING, REASON_RETRYING,
};
use crate::validation::validate_spec;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// `namespace/name` key used for single-flight and the retry budget.
#[must_use]
pub fn instance_key(ds: &DirectoryService) -> String {
    format!("{}/{}", ds.namespace().unwrap_or_default(), ds.name_any())
}

/// LDAP URL of the instance's admin endpoint.
///
/// Defaults to the plain LDAP port behind the managed service.
#[must_use]
pub fn admin_endpoint(ds: &DirectoryService) -> String {
    ds.spec.endpoint.clone().unwrap_or_else(|| {
        format!(
            "ldap://{}.{}.svc.cluster.local:{LDAP_PORT}",
            ds.name_any(),
            ds.namespace().unwrap_or_default()
        )
    })
}

/// Everything the `Ready` status write needs.
struct Converged {
    backup_task_id: Option<String>,
    fingerprints: BTreeMap<String, String>,
}

/// Why a reconciliation stopped before reaching `Ready`.
enum Halt {
    /// Deleted, being deleted, or replaced by a new object with the same name.
    Gone,
    /// The spec changed under us; the new generation needs its own pass.
    Superseded,
    Failed(ReconcileError),
}

impl From<ReconcileError> for Halt {
    fn from(err: ReconcileError) -> Self {
        Halt::Failed(err)
    }
}

/// Controller entry point.
///
/// Enforces at most one reconciliation per instance. A request that arrives
/// while one is running is folded into a single follow-up run.
///
/// # Errors
///
/// Returns an error only when a status write fails; see
/// [`reconcile_directoryservice`].
pub async fn reconcile(
    ds: Arc<DirectoryService>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let key = instance_key(&ds);

    let Some(guard) = ctx.flights.try_begin(&key) else {
        debug!(instance = %key, "Reconciliation already in flight, coalescing");
        metrics::record_requeue(KIND_DIRECTORY_SERVICE, "coalesced");
        return Ok(Action::await_change());
    };

    let result = reconcile_directoryservice(Arc::clone(&ctx), (*ds).clone()).await;

    if guard.finish() {
        debug!(instance = %key, "Re-running coalesced reconciliation");
        return result.map(|_| Action::requeue(Duration::from_millis(COALESCED_REQUEUE_MILLIS)));
    }
    result
}

/// Requeue policy for errors that escape [`reconcile`].
pub fn error_policy(ds: Arc<DirectoryService>, err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!(instance = %instance_key(&ds), error = %err, "Reconciliation failed");
    metrics::record_error(err.class().as_str(), err.status_reason());
    metrics::record_requeue(KIND_DIRECTORY_SERVICE, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Reconcile one `DirectoryService`.
///
/// Failures of the converge steps are recorded in status and turned into a
/// requeue decision; they are not returned.
///
/// # Errors
///
/// Returns [`ReconcileError::Api`] when the status write itself fails (for
/// instance a 409 because the object moved on).
pub async fn reconcile_directoryservice(
    ctx: Arc<Context>,
    ds: DirectoryService,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let key = instance_key(&ds);

    if ds.metadata.deletion_timestamp.is_some() {
        debug!(instance = %key, "DirectoryService is being deleted, nothing to do");
        metrics::record_reconciliation_outcome(KIND_DIRECTORY_SERVICE, "deleted", start.elapsed());
        return Ok(Action::await_change());
    }

    info!(
        instance = %key,
        generation = ?ds.metadata.generation,
        "Reconciling DirectoryService"
    );

    let mut current = ds;
    let (action, outcome) = match converge(&ctx, &mut current).await {
        Ok(converged) => mark_ready(&ctx, &current, converged).await?,
        Err(Halt::Gone) => {
            info!(instance = %key, "DirectoryService went away mid-reconcile, stopping");
            (Action::await_change(), "aborted")
        }
        Err(Halt::Superseded) => {
            debug!(instance = %key, "Spec changed mid-reconcile, starting over");
            (
                Action::requeue(Duration::from_millis(COALESCED_REQUEUE_MILLIS)),
                "superseded",
            )
        }
        Err(Halt::Failed(err)) => handle_failure(&ctx, &current, &err).await?,
    };

    metrics::record_reconciliation_outcome(KIND_DIRECTORY_SERVICE, outcome, start.elapsed());
    Ok(action)
}

/// Steps 2 to 7. `current` always holds the freshest copy of the instance.
async fn converge(
    ctx: &Context,
    current: &mut DirectoryService,
) -> Result<Converged, Halt> {
    let namespace = current.namespace().unwrap_or_default();
    let name = current.name_any();
    let generation = current.metadata.generation;

    validate_spec(&current.spec).map_err(ReconcileError::from)?;

    let last_reconciled = current
        .status
        .as_ref()
        .and_then(|s| s.last_reconciled_generation);
    let phase = current.status.as_ref().and_then(|s| s.phase);
    // Retries leave Pending alone so a backoff pass writes nothing new.
    if last_reconciled != generation
        && !matches!(phase, Some(Phase::Pending | Phase::Converging))
    {
        let mut status = DirectoryServiceStatusUpdater::new(current);
        status.set_phase(Phase::Converging);
        status.set_ready_condition(
            CONDITION_FALSE,
            REASON_PROGRESSING,
            &format!("Converging generation {}", generation.unwrap_or_default()),
        );
        if let Some(updated) = status
            .apply(ctx.api.as_ref())
            .await
            .map_err(|e| ReconcileError::api("patch DirectoryService status", e))?
        {
            *current = updated;
        }
    }

    let outcome = converge_service(ctx.api.as_ref(), current)
        .await
        .map_err(ReconcileError::from)?;
    debug!(
        namespace = %namespace,
        name = %name,
        action = ?outcome.action,
        "Service converged"
    );

    let fresh = ctx
        .api
        .get_directory_service(&namespace, &name)
        .await
        .map_err(|e| ReconcileError::api("get DirectoryService", e))?
        .ok_or(Halt::Gone)?;
    if fresh.metadata.deletion_timestamp.is_some() || fresh.metadata.uid != current.metadata.uid {
        return Err(Halt::Gone);
    }
    if fresh.metadata.generation != generation {
        return Err(Halt::Superseded);
    }
    *current = fresh;

    let admin = &current.spec.admin;
    let admin_password = ctx
        .api
        .get_secret_value(&namespace, &admin.secret_name, &admin.key)
        .await
        .map_err(|e| ReconcileError::api("get Secret", e))?
        .ok_or_else(|| ReconcileError::CredentialUnavailable {
            namespace: namespace.clone(),
            secret: admin.secret_name.clone(),
            key: admin.key.clone(),
        })?;

    let recorded = current
        .status
        .as_ref()
        .map(|s| s.credential_fingerprints.clone())
        .unwrap_or_default();

    if !current.spec.needs_admin_session() {
        return Ok(Converged {
            backup_task_id: None,
            fingerprints: BTreeMap::new(),
        });
    }

    let mut passwords = Vec::with_capacity(current.spec.passwords.len());
    for managed in &current.spec.passwords {
        let password = ctx
            .api
            .get_secret_value(&namespace, &managed.secret_name, &managed.key)
            .await
            .map_err(|e| ReconcileError::api("get Secret", e))?
            .ok_or_else(|| ReconcileError::CredentialUnavailable {
                namespace: namespace.clone(),
                secret: managed.secret_name.clone(),
                key: managed.key.clone(),
            })?;
        passwords.push(ResolvedPassword {
            uid: managed.uid.clone(),
            password,
        });
    }

    let params = ctx.session_params(
        admin_endpoint(current),
        admin.bind_dn.clone(),
        admin_password,
    );
    let backup = current.spec.backup.clone();
    let uid = current.metadata.uid.clone();
    let salt = uid.clone().unwrap_or_default();
    let api = Arc::clone(&ctx.api);

    let (backup_task_id, fingerprints) =
        with_session(ctx.connector.as_ref(), &params, move |session| {
            Box::pin(async move {
                if !still_present(api.as_ref(), &namespace, &name, uid.as_deref()).await? {
                    return Ok(None);
                }
                let task_id = match &backup {
                    Some(spec) => {
                        let task = BackupTask::from(spec);
                        ensure_backup_task(session, &task, spec.conflict_policy).await?;
                        Some(task.task_id)
                    }
                    None => None,
                };

                if !passwords.is_empty()
                    && !still_present(api.as_ref(), &namespace, &name, uid.as_deref()).await?
                {
                    return Ok(None);
                }
                let rotation = rotate_passwords(session, &passwords, &salt, &recorded).await?;
                Ok::<_, ReconcileError>(Some((task_id, rotation.fingerprints)))
            })
        })
        .await?
        .ok_or(Halt::Gone)?;

    Ok(Converged {
        backup_task_id,
        fingerprints,
    })
}

/// Whether `namespace/name` still exists, is not being deleted and is the
/// object with `uid`.
async fn still_present(
    api: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    uid: Option<&str>,
) -> Result<bool, ReconcileError> {
    let fresh = api
        .get_directory_service(namespace, name)
        .await
        .map_err(|e| ReconcileError::api("get DirectoryService", e))?;
    Ok(fresh.is_some_and(|ds| {
        ds.metadata.deletion_timestamp.is_none() && ds.metadata.uid.as_deref() == uid
    }))
}

async fn mark_ready(
    ctx: &Context,
    current: &DirectoryService,
    converged: Converged,
) -> Result<(Action, &'static str), ReconcileError> {
    let key = instance_key(current);

    let mut status = DirectoryServiceStatusUpdater::new(current);
    status.set_phase(Phase::Ready);
    status.set_ready_condition(
        CONDITION_TRUE,
        REASON_CONVERGED,
        &format!("Service {} and administrative state converged", current.name_any()),
    );
    status.set_last_error(None);
    status.set_last_reconciled_generation(current.metadata.generation);
    status.set_service_name(Some(current.name_any()));
    status.set_backup_task_id(converged.backup_task_id);
    status.set_credential_fingerprints(converged.fingerprints);
    match status.apply(ctx.api.as_ref()).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            ctx.retry_budget.reset(&key);
            info!(instance = %key, "DirectoryService deleted before it was marked ready");
            return Ok((Action::await_change(), "aborted"));
        }
        Err(e) => return Err(ReconcileError::api("patch DirectoryService status", e)),
    }

    ctx.retry_budget.reset(&key);
    info!(instance = %key, generation = ?current.metadata.generation, "DirectoryService ready");
    metrics::record_requeue(KIND_DIRECTORY_SERVICE, "resync");
    Ok((Action::requeue(ctx.config.resync_interval()), "ready"))
}

/// Record a failed reconciliation in status and decide when to look again.
async fn handle_failure(
    ctx: &Context,
    current: &DirectoryService,
    err: &ReconcileError,
) -> Result<(Action, &'static str), ReconcileError> {
    let key = instance_key(current);
    let class = err.class();
    metrics::record_error(class.as_str(), err.status_reason());

    let mut status = DirectoryServiceStatusUpdater::new(current);
    let (action, outcome) = if class == ErrorClass::Transient {
        match ctx.retry_budget.record_failure(&key) {
            BudgetDecision::Retry { attempt, delay } => {
                warn!(
                    instance = %key,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Transient failure, backing off"
                );
                status.set_phase(Phase::Pending);
                status.set_ready_condition(CONDITION_FALSE, REASON_RETRYING, &err.to_string());
                status.set_last_error(Some(err.to_string()));
                metrics::record_requeue(KIND_DIRECTORY_SERVICE, "backoff");
                (Action::requeue(delay), "retrying")
            }
            BudgetDecision::Exhausted { attempts } => {
                let exhausted = ReconcileError::RetryBudgetExhausted {
                    attempts,
                    last_error: err.to_string(),
                };
                error!(instance = %key, error = %exhausted, "Retry budget exhausted");
                status.set_phase(Phase::Failed);
                status.set_ready_condition(
                    CONDITION_FALSE,
                    exhausted.status_reason(),
                    &exhausted.to_string(),
                );
                status.set_last_error(Some(exhausted.to_string()));
                metrics::record_requeue(KIND_DIRECTORY_SERVICE, "resync");
                (Action::requeue(ctx.config.resync_interval()), "failed")
            }
        }
    } else {
        ctx.retry_budget.reset(&key);
        error!(
            instance = %key,
            class = class.as_str(),
            error = %err,
            "Reconciliation failed, not retrying"
        );
        status.set_phase(Phase::Failed);
        status.set_ready_condition(CONDITION_FALSE, err.status_reason(), &err.to_string());
        status.set_last_error(Some(err.to_string()));

        // Only a spec change can fix a spec that fails validation.
        if matches!(err, ReconcileError::Validation(_)) {
            (Action::await_change(), "failed")
        } else {
            metrics::record_requeue(KIND_DIRECTORY_SERVICE, "resync");
            (Action::requeue(ctx.config.resync_interval()), "failed")
        }
    };

    match status.apply(ctx.api.as_ref()).await {
        Ok(_) => Ok((action, outcome)),
        Err(e) if e.is_not_found() => Ok((Action::await_change(), "aborted")),
        Err(e) => Err(ReconcileError::api("patch DirectoryService status", e)),
    }
}

#[cfg(test)]
#[path = "directoryservice_tests.rs"]
mod directoryservice_tests;
