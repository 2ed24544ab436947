// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `context.rs`

#[cfg(test)]
mod tests {
    use crate::config::OperatorConfig;
    use crate::context::Context;
    use crate::fakes::{FakeClusterApi, FakeDirectory};
    use crate::reconcilers::retry::BudgetDecision;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(config: OperatorConfig) -> Context {
        Context::new(
            Arc::new(FakeClusterApi::new()),
            Arc::new(FakeDirectory::default()),
            config,
        )
    }

    #[test]
    fn test_session_params_carry_configured_limits() {
        let ctx = context(OperatorConfig {
            ldap_connect_timeout_secs: 3,
            ldap_operation_timeout_secs: 7,
            ldap_page_size: 50,
            ..OperatorConfig::default()
        });

        let params = ctx.session_params(
            "ldap://ds-idrepo.identity.svc.cluster.local:1389".to_string(),
            "uid=admin".to_string(),
            "s3cret".to_string(),
        );

        assert_eq!(params.connect_timeout, Duration::from_secs(3));
        assert_eq!(params.operation_timeout, Duration::from_secs(7));
        assert_eq!(params.page_size, 50);
        assert_eq!(params.bind_dn, "uid=admin");
    }

    #[test]
    fn test_retry_budget_follows_config() {
        let ctx = context(OperatorConfig {
            max_retry_attempts: 2,
            ..OperatorConfig::default()
        });

        assert!(matches!(
            ctx.retry_budget.record_failure("identity/ds-idrepo"),
            BudgetDecision::Retry { attempt: 1, .. }
        ));
        assert_eq!(
            ctx.retry_budget.record_failure("identity/ds-idrepo"),
            BudgetDecision::Exhausted { attempts: 2 }
        );
    }

    /// Clones share the single-flight tracker
    #[test]
    fn test_clones_share_flights() {
        let ctx = context(OperatorConfig::default());
        let clone = ctx.clone();

        let _guard = ctx.flights.try_begin("identity/ds-idrepo").unwrap();
        assert!(clone.flights.try_begin("identity/ds-idrepo").is_none());
    }
}
