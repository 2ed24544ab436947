// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Authenticated administrative sessions against a directory server.
//!
//! An [`AdminSession`] is only ever handed out bound. It is never pooled or
//! shared between reconciliations; each caller opens one, uses it and closes it.
//! Callers in the reconciler go through [`with_session`], which closes the
//! session exactly once whether the body succeeds, fails or panics.
//!
//! # Example
//!
//! ```rust,no_run
//! use ds_operator::ldap::{with_session, Ldap3Connector, SessionParams};
//! use ds_operator::ds_errors::SessionError;
//! # async fn example(params: SessionParams) -> Result<(), SessionError> {
//! let _entries = with_session(&Ldap3Connector, &params, |session| {
//!     Box::pin(async move { session.search("cn=Tasks", "(objectClass=*)", &["cn"]).await })
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use super::{DirectoryConnection, DirectoryConnector, Entry, ProtocolError};
use crate::constants::{
    ADMIN_IDENTITIES_BASE, LDAP_RC_ENTRY_ALREADY_EXISTS, LDAP_RC_INAPPROPRIATE_AUTH,
    LDAP_RC_INSUFFICIENT_ACCESS, LDAP_RC_INVALID_CREDENTIALS, LDAP_RC_NO_SUCH_OBJECT,
    RECURRING_TASKS_BASE,
};
use crate::ds_errors::SessionError;
use crate::metrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Connection parameters for one administrative session.
#[derive(Clone)]
pub struct SessionParams {
    /// LDAP URL, e.g. `ldap://ds-idrepo.identity.svc.cluster.local:1389`
    pub url: String,
    pub bind_dn: String,
    pub credential: String,
    /// Bound on dialing plus binding.
    pub connect_timeout: Duration,
    /// Bound on each individual operation.
    pub operation_timeout: Duration,
    pub page_size: i32,
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("credential", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// A bound administrative session.
pub struct AdminSession {
    conn: Option<Box<dyn DirectoryConnection>>,
    endpoint: String,
    operation_timeout: Duration,
    page_size: i32,
}

/// Build the DN of a recurring task entry.
#[must_use]
pub fn task_dn(task_id: &str) -> String {
    format!(
        "ds-recurring-task-id={},{RECURRING_TASKS_BASE}",
        ldap3::dn_escape(task_id)
    )
}

async fn bounded<T, F>(
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<Result<T, ProtocolError>, SessionError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    bounded_until(Instant::now() + timeout, timeout, operation, fut).await
}

/// Like [`bounded`], but against a deadline shared by several steps.
/// `timeout` is the whole budget and is only used for reporting.
async fn bounded_until<T, F>(
    deadline: Instant,
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<Result<T, ProtocolError>, SessionError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| SessionError::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
}

impl AdminSession {
    /// Dial `params.url` and bind as `params.bind_dn`.
    ///
    /// A rejected bind closes the raw connection before returning, so a failed
    /// connect never leaves anything open.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ConnectFailure`] if the endpoint cannot be reached or
    ///   the server is unavailable
    /// - [`SessionError::BindFailure`] if the credential is rejected
    /// - [`SessionError::Timeout`] if dial and bind together exceed the connect
    ///   timeout
    pub async fn connect(
        connector: &dyn DirectoryConnector,
        params: &SessionParams,
    ) -> Result<Self, SessionError> {
        let endpoint = params.url.clone();
        let deadline = Instant::now() + params.connect_timeout;

        let mut conn = match bounded_until(
            deadline,
            params.connect_timeout,
            "connect",
            connector.connect(&params.url, params.connect_timeout),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                metrics::record_session_failure("connect_failed");
                return Err(SessionError::ConnectFailure {
                    endpoint,
                    reason: e.to_string(),
                });
            }
            Err(timeout) => {
                metrics::record_session_failure("connect_failed");
                return Err(timeout);
            }
        };

        let bind_result = bounded_until(
            deadline,
            params.connect_timeout,
            "bind",
            conn.bind(&params.bind_dn, &params.credential),
        )
        .await;

        let failure = match bind_result {
            Ok(Ok(())) => None,
            Ok(Err(ProtocolError::Result { code, message }))
                if matches!(
                    code,
                    LDAP_RC_INVALID_CREDENTIALS
                        | LDAP_RC_INAPPROPRIATE_AUTH
                        | LDAP_RC_INSUFFICIENT_ACCESS
                ) =>
            {
                metrics::record_session_failure("bind_failed");
                Some(SessionError::BindFailure {
                    endpoint: endpoint.clone(),
                    bind_dn: params.bind_dn.clone(),
                    code,
                    reason: message,
                })
            }
            Ok(Err(e)) => {
                metrics::record_session_failure("connect_failed");
                Some(SessionError::ConnectFailure {
                    endpoint: endpoint.clone(),
                    reason: format!("bind: {e}"),
                })
            }
            Err(timeout) => {
                metrics::record_session_failure("connect_failed");
                Some(timeout)
            }
        };

        if let Some(err) = failure {
            if let Err(e) = conn.unbind().await {
                debug!(endpoint = %endpoint, error = %e, "Unbind after failed bind reported an error");
            }
            return Err(err);
        }

        debug!(endpoint = %endpoint, bind_dn = %params.bind_dn, "Admin session bound");
        metrics::record_session_opened(&endpoint);

        Ok(Self {
            conn: Some(conn),
            endpoint,
            operation_timeout: params.operation_timeout,
            page_size: params.page_size,
        })
    }

    /// Subtree search returning every matching entry, paged.
    ///
    /// # Errors
    ///
    /// [`SessionError::SearchFailure`], [`SessionError::Timeout`] or
    /// [`SessionError::Closed`].
    pub async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, SessionError> {
        let (timeout, page_size) = (self.operation_timeout, self.page_size);
        let conn = self.conn.as_mut().ok_or(SessionError::Closed)?;

        bounded(timeout, "search", conn.search(base, filter, attrs, page_size))
            .await?
            .map_err(|e| SessionError::SearchFailure {
                base: base.to_string(),
                filter: filter.to_string(),
                code: e.code(),
                reason: e.to_string(),
            })
    }

    /// Find an administrative identity by `uid` under `ou=admins,ou=identities`.
    ///
    /// # Errors
    ///
    /// Propagates [`AdminSession::search`] errors.
    pub async fn lookup_identity(&mut self, uid: &str) -> Result<Option<Entry>, SessionError> {
        let filter = format!("(uid={})", ldap3::ldap_escape(uid));
        let entries = self
            .search(ADMIN_IDENTITIES_BASE, &filter, &["cn", "uid"])
            .await?;

        if entries.len() > 1 {
            warn!(uid = %uid, matches = entries.len(), "Identity lookup matched more than one entry, using the first");
        }
        Ok(entries.into_iter().next())
    }

    /// Administratively reset the password of `dn`.
    ///
    /// # Errors
    ///
    /// [`SessionError::ModifyFailure`], [`SessionError::Timeout`] or
    /// [`SessionError::Closed`].
    pub async fn modify_password(&mut self, dn: &str, new_password: &str) -> Result<(), SessionError> {
        let timeout = self.operation_timeout;
        let conn = self.conn.as_mut().ok_or(SessionError::Closed)?;

        bounded(timeout, "password modify", conn.password_modify(dn, new_password))
            .await?
            .map_err(|e| SessionError::ModifyFailure {
                dn: dn.to_string(),
                code: e.code(),
                reason: e.to_string(),
            })
    }

    /// Add a recurring task entry under `cn=Recurring Tasks,cn=Tasks`.
    ///
    /// # Errors
    ///
    /// [`SessionError::DuplicateTask`] when an entry with the same identifier
    /// exists, otherwise [`SessionError::AddFailure`], [`SessionError::Timeout`]
    /// or [`SessionError::Closed`].
    pub async fn add_task(
        &mut self,
        task_id: &str,
        attrs: &[(String, Vec<String>)],
    ) -> Result<(), SessionError> {
        let timeout = self.operation_timeout;
        let conn = self.conn.as_mut().ok_or(SessionError::Closed)?;
        let dn = task_dn(task_id);

        match bounded(timeout, "add", conn.add(&dn, attrs)).await? {
            Ok(()) => Ok(()),
            Err(ProtocolError::Result {
                code: LDAP_RC_ENTRY_ALREADY_EXISTS,
                ..
            }) => Err(SessionError::DuplicateTask {
                task_id: task_id.to_string(),
            }),
            Err(e) => Err(SessionError::AddFailure {
                dn,
                code: e.code(),
                reason: e.to_string(),
            }),
        }
    }

    /// Delete a recurring task entry. A task that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// [`SessionError::DeleteFailure`], [`SessionError::Timeout`] or
    /// [`SessionError::Closed`].
    pub async fn delete_task(&mut self, task_id: &str) -> Result<(), SessionError> {
        let timeout = self.operation_timeout;
        let conn = self.conn.as_mut().ok_or(SessionError::Closed)?;
        let dn = task_dn(task_id);

        match bounded(timeout, "delete", conn.delete(&dn)).await? {
            Ok(())
            | Err(ProtocolError::Result {
                code: LDAP_RC_NO_SUCH_OBJECT,
                ..
            }) => Ok(()),
            Err(e) => Err(SessionError::DeleteFailure {
                dn,
                code: e.code(),
                reason: e.to_string(),
            }),
        }
    }

    /// Release the connection. Calling it again is a no-op.
    pub async fn close(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::time::timeout(self.operation_timeout, conn.unbind()).await {
            Ok(Ok(())) => debug!(endpoint = %self.endpoint, "Admin session closed"),
            Ok(Err(e)) => debug!(endpoint = %self.endpoint, error = %e, "Unbind reported an error"),
            Err(_) => debug!(endpoint = %self.endpoint, "Unbind timed out"),
        }
        metrics::record_session_closed(&self.endpoint);
    }
}

impl Drop for AdminSession {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(endpoint = %self.endpoint, "Admin session dropped without close");
            metrics::record_session_closed(&self.endpoint);
        }
    }
}

/// Open a session, run `body` with it, and close it on every exit path.
///
/// Panics raised by `body` are re-raised after the session has been closed.
/// The body may only borrow the session; anything else it needs must be moved
/// in.
///
/// # Errors
///
/// Returns connect errors converted into `E`, or whatever `body` returns.
pub async fn with_session<T, E, F>(
    connector: &dyn DirectoryConnector,
    params: &SessionParams,
    body: F,
) -> Result<T, E>
where
    F: for<'s> FnOnce(&'s mut AdminSession) -> BoxFuture<'s, Result<T, E>>,
    E: From<SessionError>,
{
    let mut session = AdminSession::connect(connector, params).await?;

    let outcome = AssertUnwindSafe(body(&mut session)).catch_unwind().await;
    session.close().await;

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
