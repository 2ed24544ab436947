// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `backup.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{BackupSpec, TaskConflictPolicy};
    use crate::ds_errors::{ErrorClass, SchedulerError, SessionError};
    use crate::fakes::{DirectoryCall, FakeDirectory};
    use crate::ldap::{with_session, AdminSession, Entry, ProtocolError, SessionParams};
    use crate::reconcilers::backup::{
        backup_task_attributes, ensure_backup_task, plan_backup_task, BackupTask, TaskAction,
        TaskPlan,
    };
    use std::time::Duration;

    const ADMIN_DN: &str = "uid=admin";
    const ADMIN_PW: &str = "s3cret";
    const TASK_DN: &str = "ds-recurring-task-id=NightlyBackup,cn=Recurring Tasks,cn=Tasks";

    fn params() -> SessionParams {
        SessionParams {
            url: "ldap://ds-idrepo.identity.svc.cluster.local:1389".to_string(),
            bind_dn: ADMIN_DN.to_string(),
            credential: ADMIN_PW.to_string(),
            connect_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(2),
            page_size: 100,
        }
    }

    async fn session(directory: &FakeDirectory) -> AdminSession {
        AdminSession::connect(directory, &params()).await.unwrap()
    }

    fn nightly() -> BackupTask {
        BackupTask::new("NightlyBackup", "00 02 * * *", "bak")
    }

    fn existing_task(schedule: &str, location: &str) -> Entry {
        Entry::new(TASK_DN)
            .with_attr("objectClass", &["top", "ds-task", "ds-recurring-task", "ds-task-backup"])
            .with_attr("ds-recurring-task-id", &["NightlyBackup"])
            .with_attr("ds-recurring-task-schedule", &[schedule])
            .with_attr("ds-backup-location", &[location])
    }

    #[test]
    fn test_task_from_spec_uses_default_description() {
        let spec = BackupSpec {
            task_id: "NightlyBackup".to_string(),
            schedule: "00 02 * * *".to_string(),
            location: "bak".to_string(),
            description: None,
            conflict_policy: TaskConflictPolicy::Report,
        };
        let task = BackupTask::from(&spec);
        assert_eq!(task.description, "Recurring backup NightlyBackup");

        let described = BackupTask::from(&BackupSpec {
            description: Some("Nightly backup at 2 AM".to_string()),
            ..spec
        });
        assert_eq!(described.description, "Nightly backup at 2 AM");
    }

    #[test]
    fn test_task_attributes() {
        let attrs = backup_task_attributes(&nightly());
        let get = |name: &str| {
            attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(
            get("objectClass"),
            vec!["top", "ds-task", "ds-recurring-task", "ds-task-backup"]
        );
        assert_eq!(get("ds-recurring-task-id"), vec!["NightlyBackup"]);
        assert_eq!(get("ds-task-id"), vec!["NightlyBackup"]);
        assert_eq!(get("ds-recurring-task-schedule"), vec!["00 02 * * *"]);
        assert_eq!(get("ds-backup-location"), vec!["bak"]);
        assert_eq!(get("ds-task-state"), vec!["RECURRING"]);
        assert_eq!(get("ds-task-class-name"), vec!["org.opends.server.tasks.BackupTask"]);
    }

    #[test]
    fn test_plan() {
        assert_eq!(plan_backup_task(&[], &nightly()), TaskPlan::Create);
        assert_eq!(
            plan_backup_task(&[existing_task("00 02 * * *", "bak")], &nightly()),
            TaskPlan::InSync
        );
        assert_eq!(
            plan_backup_task(&[existing_task("25 * * * *", "/var/tmp")], &nightly()),
            TaskPlan::Diverged {
                observed_schedule: "25 * * * *".to_string(),
                observed_location: "/var/tmp".to_string(),
            }
        );
    }

    /// Tasks with other identifiers do not count
    #[test]
    fn test_plan_ignores_other_tasks() {
        let other = Entry::new("ds-recurring-task-id=Weekly,cn=Recurring Tasks,cn=Tasks")
            .with_attr("ds-recurring-task-id", &["Weekly"])
            .with_attr("ds-recurring-task-schedule", &["00 03 * * 0"]);
        assert_eq!(plan_backup_task(&[other], &nightly()), TaskPlan::Create);
    }

    #[tokio::test]
    async fn test_creates_missing_task() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        let mut s = session(&directory).await;

        let action = ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Report)
            .await
            .unwrap();
        s.close().await;

        assert_eq!(action, TaskAction::Created);
        let entry = directory.entry(TASK_DN).unwrap();
        assert_eq!(entry.first("ds-recurring-task-schedule"), Some("00 02 * * *"));
    }

    /// The scheduler passes the schedule through without interpreting it
    #[tokio::test]
    async fn test_schedule_is_passed_verbatim() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        let mut s = session(&directory).await;
        let task = BackupTask::new("NightlyBackup", "02:00 daily", "bak");

        let action = ensure_backup_task(&mut s, &task, TaskConflictPolicy::Report)
            .await
            .unwrap();
        s.close().await;

        assert_eq!(action, TaskAction::Created);
        assert_eq!(
            directory.entry(TASK_DN).unwrap().first("ds-recurring-task-schedule"),
            Some("02:00 daily")
        );
    }

    #[tokio::test]
    async fn test_repeat_call_adds_nothing() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        let mut s = session(&directory).await;

        ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Report)
            .await
            .unwrap();
        let again = ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Report)
            .await
            .unwrap();
        s.close().await;

        assert_eq!(again, TaskAction::Unchanged);
        assert_eq!(directory.adds().len(), 1);
        assert_eq!(directory.entries_under("cn=Recurring Tasks,cn=Tasks").len(), 1);
    }

    #[tokio::test]
    async fn test_diverged_task_is_reported() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        directory.insert_entry(existing_task("25 * * * *", "/var/tmp"));
        let mut s = session(&directory).await;

        let err = ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Report)
            .await
            .unwrap_err();
        s.close().await;

        match &err {
            SchedulerError::TaskConflict {
                observed_schedule,
                desired_schedule,
                ..
            } => {
                assert_eq!(observed_schedule, "25 * * * *");
                assert_eq!(desired_schedule, "00 02 * * *");
            }
            other => panic!("expected TaskConflict, got {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(directory.adds().is_empty());
        assert_eq!(directory.count(|c| matches!(c, DirectoryCall::Delete(_))), 0);
    }

    #[tokio::test]
    async fn test_diverged_task_is_replaced() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        directory.insert_entry(existing_task("25 * * * *", "/var/tmp"));
        let mut s = session(&directory).await;

        let action = ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Replace)
            .await
            .unwrap();
        s.close().await;

        assert_eq!(action, TaskAction::Replaced);
        let entry = directory.entry(TASK_DN).unwrap();
        assert_eq!(entry.first("ds-recurring-task-schedule"), Some("00 02 * * *"));
        assert_eq!(entry.first("ds-backup-location"), Some("bak"));
    }

    /// An add that loses the race is reconciled against what won
    #[tokio::test]
    async fn test_concurrent_schedulers_create_one_task() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        directory.delay("search", Duration::from_millis(50));

        let params = params();
        let run = || {
            with_session(&directory, &params, |session| {
                Box::pin(async move {
                    ensure_backup_task(session, &nightly(), TaskConflictPolicy::Report).await
                })
            })
        };
        let (a, b) = futures::join!(run(), run());

        let mut actions = vec![a.unwrap(), b.unwrap()];
        actions.sort_by_key(|a| format!("{a:?}"));
        assert_eq!(actions, vec![TaskAction::Created, TaskAction::Unchanged]);
        assert_eq!(directory.entries_under("cn=Recurring Tasks,cn=Tasks").len(), 1);
        assert_eq!(directory.opened(), directory.closed());
    }

    #[tokio::test]
    async fn test_add_failure_is_session_error() {
        let directory = FakeDirectory::with_admin(ADMIN_DN, ADMIN_PW);
        directory.fail_next(
            "add",
            ProtocolError::Result {
                code: 50,
                message: "Insufficient Access Rights".to_string(),
            },
        );
        let mut s = session(&directory).await;

        let err = ensure_backup_task(&mut s, &nightly(), TaskConflictPolicy::Report)
            .await
            .unwrap_err();
        s.close().await;

        assert!(matches!(
            err,
            SchedulerError::Session(SessionError::AddFailure { code: Some(50), .. })
        ));
        assert_eq!(err.class(), ErrorClass::Authentication);
    }
}
