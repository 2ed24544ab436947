// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Recurring backup task scheduling.
//!
//! The directory server keeps recurring tasks as entries under
//! `cn=Recurring Tasks,cn=Tasks`. A backup task looks like this:
//!
//! ```text
//! dn: ds-recurring-task-id=NightlyBackup,cn=Recurring Tasks,cn=Tasks
//! objectClass: top
//! objectClass: ds-task
//! objectClass: ds-recurring-task
//! objectClass: ds-task-backup
//! description: Nightly backup at 2 AM
//! ds-backup-location: bak
//! ds-recurring-task-id: NightlyBackup
//! ds-recurring-task-schedule: 00 02 * * *
//! ds-task-class-name: org.opends.server.tasks.BackupTask
//! ds-task-id: NightlyBackup
//! ds-task-state: RECURRING
//! ```
//!
//! [`ensure_backup_task`] makes sure exactly one such entry exists for the
//! desired identifier. It searches first and only adds when nothing with that
//! identifier is present, so a repeated call never creates a second task. A
//! task that exists with a different schedule or location is handled according
//! to [`TaskConflictPolicy`].
//!
//! The schedule is passed to the server verbatim. Validation happens earlier,
//! in the reconciler; the scheduler itself accepts any string.

use crate::constants::{
    BACKUP_TASK_CLASS_NAME, BACKUP_TASK_OBJECT_CLASS, RECURRING_TASKS_BASE, TASK_STATE_RECURRING,
};
use crate::crd::{BackupSpec, TaskConflictPolicy};
use crate::ds_errors::{SchedulerError, SessionError};
use crate::ldap::{AdminSession, Entry};
use crate::metrics;
use tracing::{debug, info, warn};

const ATTR_OBJECT_CLASS: &str = "objectClass";
const ATTR_DESCRIPTION: &str = "description";
const ATTR_BACKUP_LOCATION: &str = "ds-backup-location";
const ATTR_RECURRING_TASK_ID: &str = "ds-recurring-task-id";
const ATTR_RECURRING_TASK_SCHEDULE: &str = "ds-recurring-task-schedule";
const ATTR_TASK_CLASS_NAME: &str = "ds-task-class-name";
const ATTR_TASK_ID: &str = "ds-task-id";
const ATTR_TASK_STATE: &str = "ds-task-state";

/// Desired recurring backup task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupTask {
    pub task_id: String,
    pub schedule: String,
    pub location: String,
    pub description: String,
}

impl BackupTask {
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        schedule: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let task_id = task_id.into();
        let description = format!("Recurring backup {task_id}");
        Self {
            task_id,
            schedule: schedule.into(),
            location: location.into(),
            description,
        }
    }
}

impl From<&BackupSpec> for BackupTask {
    fn from(spec: &BackupSpec) -> Self {
        let mut task = BackupTask::new(&spec.task_id, &spec.schedule, &spec.location);
        if let Some(description) = &spec.description {
            task.description.clone_from(description);
        }
        task
    }
}

/// What [`ensure_backup_task`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskAction {
    Created,
    Unchanged,
    /// The existing task diverged and was deleted and re-created.
    Replaced,
}

impl TaskAction {
    fn as_str(self) -> &'static str {
        match self {
            TaskAction::Created => "created",
            TaskAction::Unchanged => "unchanged",
            TaskAction::Replaced => "replaced",
        }
    }
}

/// Comparison of the observed tasks against the desired one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskPlan {
    Create,
    InSync,
    Diverged {
        observed_schedule: String,
        observed_location: String,
    },
}

/// Attributes of the task entry as sent in the add request.
#[must_use]
pub fn backup_task_attributes(task: &BackupTask) -> Vec<(String, Vec<String>)> {
    let single = |name: &str, value: &str| (name.to_string(), vec![value.to_string()]);

    vec![
        (
            ATTR_OBJECT_CLASS.to_string(),
            ["top", "ds-task", "ds-recurring-task", BACKUP_TASK_OBJECT_CLASS]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        ),
        single(ATTR_DESCRIPTION, &task.description),
        single(ATTR_BACKUP_LOCATION, &task.location),
        single(ATTR_RECURRING_TASK_ID, &task.task_id),
        single(ATTR_TASK_ID, &task.task_id),
        single(ATTR_TASK_STATE, TASK_STATE_RECURRING),
        single(ATTR_RECURRING_TASK_SCHEDULE, &task.schedule),
        single(ATTR_TASK_CLASS_NAME, BACKUP_TASK_CLASS_NAME),
    ]
}

/// Decide what to do given the backup tasks currently on the server.
#[must_use]
pub fn plan_backup_task(observed: &[Entry], desired: &BackupTask) -> TaskPlan {
    let Some(existing) = observed
        .iter()
        .find(|e| e.first(ATTR_RECURRING_TASK_ID) == Some(desired.task_id.as_str()))
    else {
        return TaskPlan::Create;
    };

    let observed_schedule = existing.first(ATTR_RECURRING_TASK_SCHEDULE).unwrap_or_default();
    let observed_location = existing.first(ATTR_BACKUP_LOCATION).unwrap_or_default();

    if observed_schedule == desired.schedule && observed_location == desired.location {
        TaskPlan::InSync
    } else {
        TaskPlan::Diverged {
            observed_schedule: observed_schedule.to_string(),
            observed_location: observed_location.to_string(),
        }
    }
}

async fn observe(session: &mut AdminSession) -> Result<Vec<Entry>, SessionError> {
    session
        .search(
            RECURRING_TASKS_BASE,
            &format!("({ATTR_OBJECT_CLASS}={BACKUP_TASK_OBJECT_CLASS})"),
            &[
                ATTR_RECURRING_TASK_ID,
                ATTR_RECURRING_TASK_SCHEDULE,
                ATTR_BACKUP_LOCATION,
                ATTR_TASK_STATE,
            ],
        )
        .await
}

async fn resolve_divergence(
    session: &mut AdminSession,
    task: &BackupTask,
    policy: TaskConflictPolicy,
    observed_schedule: String,
    observed_location: String,
) -> Result<TaskAction, SchedulerError> {
    match policy {
        TaskConflictPolicy::Report => {
            warn!(
                task_id = %task.task_id,
                observed_schedule = %observed_schedule,
                desired_schedule = %task.schedule,
                "Recurring backup task exists with different attributes"
            );
            metrics::record_backup_task_action("conflict");
            Err(SchedulerError::TaskConflict {
                task_id: task.task_id.clone(),
                observed_schedule,
                observed_location,
                desired_schedule: task.schedule.clone(),
                desired_location: task.location.clone(),
            })
        }
        TaskConflictPolicy::Replace => {
            info!(
                task_id = %task.task_id,
                observed_schedule = %observed_schedule,
                desired_schedule = %task.schedule,
                "Replacing diverged recurring backup task"
            );
            session.delete_task(&task.task_id).await?;
            session
                .add_task(&task.task_id, &backup_task_attributes(task))
                .await?;
            Ok(TaskAction::Replaced)
        }
    }
}

/// Make sure the recurring backup task exists on the server.
///
/// # Errors
///
/// - [`SchedulerError::TaskConflict`] if the task diverged and the policy is
///   [`TaskConflictPolicy::Report`]
/// - [`SchedulerError::Session`] for directory failures
pub async fn ensure_backup_task(
    session: &mut AdminSession,
    task: &BackupTask,
    policy: TaskConflictPolicy,
) -> Result<TaskAction, SchedulerError> {
    let observed = observe(session).await?;

    let action = match plan_backup_task(&observed, task) {
        TaskPlan::InSync => {
            debug!(task_id = %task.task_id, "Recurring backup task already scheduled");
            TaskAction::Unchanged
        }
        TaskPlan::Diverged {
            observed_schedule,
            observed_location,
        } => {
            resolve_divergence(session, task, policy, observed_schedule, observed_location).await?
        }
        TaskPlan::Create => {
            match session
                .add_task(&task.task_id, &backup_task_attributes(task))
                .await
            {
                Ok(()) => {
                    info!(
                        task_id = %task.task_id,
                        schedule = %task.schedule,
                        location = %task.location,
                        "Scheduled recurring backup task"
                    );
                    TaskAction::Created
                }
                // Someone else added it between our search and our add.
                Err(SessionError::DuplicateTask { .. }) => {
                    let observed = observe(session).await?;
                    match plan_backup_task(&observed, task) {
                        TaskPlan::InSync => TaskAction::Unchanged,
                        TaskPlan::Diverged {
                            observed_schedule,
                            observed_location,
                        } => {
                            resolve_divergence(
                                session,
                                task,
                                policy,
                                observed_schedule,
                                observed_location,
                            )
                            .await?
                        }
                        TaskPlan::Create => {
                            return Err(SessionError::DuplicateTask {
                                task_id: task.task_id.clone(),
                            }
                            .into())
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    metrics::record_backup_task_action(action.as_str());
    Ok(action)
}

#[cfg(test)]
#[path = "backup_tests.rs"]
mod backup_tests;
