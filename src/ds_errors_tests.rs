// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `ds_errors.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_api_error_classification() {
        assert_eq!(ApiError::new(None, "connection reset").class(), ErrorClass::Transient);
        assert_eq!(ApiError::new(Some(429), "slow down").class(), ErrorClass::Transient);
        assert_eq!(ApiError::new(Some(503), "unavailable").class(), ErrorClass::Transient);
        assert_eq!(ApiError::new(Some(409), "conflict").class(), ErrorClass::Transient);
        assert_eq!(ApiError::new(Some(404), "gone").class(), ErrorClass::Transient);
        assert_eq!(ApiError::new(Some(403), "forbidden").class(), ErrorClass::Authentication);
        assert_eq!(ApiError::new(Some(401), "unauthorized").class(), ErrorClass::Authentication);
        assert_eq!(ApiError::new(Some(422), "invalid").class(), ErrorClass::InvalidSpec);
    }

    #[test]
    fn test_bind_failure_is_authentication_not_transient() {
        let err = ReconcileError::from(SessionError::BindFailure {
            endpoint: "ldap://ds:1389".into(),
            bind_dn: "uid=admin".into(),
            code: 49,
            reason: "Invalid Credentials".into(),
        });

        assert_eq!(err.class(), ErrorClass::Authentication);
        assert!(!err.is_transient());
        assert_eq!(err.status_reason(), "AuthenticationFailed");
    }

    #[test]
    fn test_connect_failure_and_timeout_are_transient() {
        let connect = SessionError::ConnectFailure {
            endpoint: "ldap://ds:1389".into(),
            reason: "connection refused".into(),
        };
        let timeout = SessionError::Timeout {
            operation: "search".into(),
            timeout_ms: 100,
        };

        assert_eq!(connect.class(), ErrorClass::Transient);
        assert_eq!(timeout.class(), ErrorClass::Transient);
        assert_eq!(connect.status_reason(), "DirectoryUnreachable");
    }

    #[test]
    fn test_operation_result_codes() {
        let forbidden = SessionError::ModifyFailure {
            dn: "uid=x".into(),
            code: Some(50),
            reason: "Insufficient Access Rights".into(),
        };
        let policy = SessionError::ModifyFailure {
            dn: "uid=x".into(),
            code: Some(19),
            reason: "password too short".into(),
        };
        let busy = SessionError::AddFailure {
            dn: "ds-recurring-task-id=x".into(),
            code: Some(51),
            reason: "busy".into(),
        };

        assert_eq!(forbidden.class(), ErrorClass::Authentication);
        assert_eq!(policy.class(), ErrorClass::InvalidSpec);
        assert_eq!(busy.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_task_conflict_is_conflict() {
        let err = ReconcileError::from(SchedulerError::TaskConflict {
            task_id: "NightlyBackup".into(),
            observed_schedule: "00 03 * * *".into(),
            observed_location: "/bak".into(),
            desired_schedule: "00 02 * * *".into(),
            desired_location: "/bak".into(),
        });

        assert_eq!(err.class(), ErrorClass::Conflict);
        assert_eq!(err.status_reason(), "BackupTaskConflict");
        assert!(err.to_string().contains("NightlyBackup"));
    }

    #[test]
    fn test_scheduler_session_errors_keep_their_class() {
        let err = SchedulerError::from(SessionError::Timeout {
            operation: "add".into(),
            timeout_ms: 10,
        });
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.status_reason(), "DirectoryTimeout");
    }

    #[test]
    fn test_validation_and_missing_secret_are_invalid_spec() {
        let validation = ReconcileError::from(ValidationError::EmptyField {
            field: "spec.admin.secretName".into(),
        });
        let secret = ReconcileError::CredentialUnavailable {
            namespace: "identity".into(),
            secret: "ds-passwords".into(),
            key: "dirmanager.pw".into(),
        };

        assert_eq!(validation.class(), ErrorClass::InvalidSpec);
        assert_eq!(secret.class(), ErrorClass::InvalidSpec);
        assert_eq!(secret.status_reason(), "CredentialUnavailable");
    }

    #[test]
    fn test_forbidden_api_write_reason() {
        let err = ReconcileError::api("patch status", ApiError::new(Some(403), "forbidden"));
        assert_eq!(err.class(), ErrorClass::Authentication);
        assert_eq!(err.status_reason(), "Forbidden");
    }

    #[test]
    fn test_convergence_errors() {
        let api = ConvergenceError::ApiFailure {
            service: "identity/ds".into(),
            operation: "create",
            source: ApiError::new(Some(500), "boom"),
        };
        let owner = ConvergenceError::OwnershipConflict {
            service: "identity/ds".into(),
            owner: "StatefulSet/other".into(),
        };

        assert_eq!(api.class(), ErrorClass::Transient);
        assert_eq!(owner.class(), ErrorClass::Conflict);
        assert_eq!(owner.status_reason(), "ServiceOwnershipConflict");
    }

    #[test]
    fn test_error_class_labels() {
        assert_eq!(ErrorClass::Transient.as_str(), "transient");
        assert_eq!(ErrorClass::InvalidSpec.as_str(), "invalid_spec");
    }
}
