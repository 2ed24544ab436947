// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validation of `DirectoryService` desired state.
//!
//! Validation failures are terminal for the generation: the reconciler reports
//! them in status and does not retry until the spec changes.

use std::collections::BTreeSet;

use tracing::debug;
use url::Url;

use crate::crd::DirectoryServiceSpec;
use crate::ds_errors::ValidationError;

/// Cron fields in order with their inclusive bounds.
const CRON_FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day-of-month", 1, 31),
    ("month", 1, 12),
    ("day-of-week", 0, 7),
];

/// Validate a complete spec.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found.
pub fn validate_spec(spec: &DirectoryServiceSpec) -> Result<(), ValidationError> {
    require_non_empty("spec.admin.bindDn", &spec.admin.bind_dn)?;
    require_non_empty("spec.admin.secretName", &spec.admin.secret_name)?;
    require_non_empty("spec.admin.key", &spec.admin.key)?;

    if let Some(endpoint) = &spec.endpoint {
        validate_endpoint(endpoint)?;
    }

    if let Some(backup) = &spec.backup {
        require_non_empty("spec.backup.taskId", &backup.task_id)?;
        require_non_empty("spec.backup.location", &backup.location)?;
        validate_cron_schedule(&backup.schedule)?;
    }

    let mut seen = BTreeSet::new();
    for (index, password) in spec.passwords.iter().enumerate() {
        require_non_empty(&format!("spec.passwords[{index}].uid"), &password.uid)?;
        require_non_empty(
            &format!("spec.passwords[{index}].secretName"),
            &password.secret_name,
        )?;
        require_non_empty(&format!("spec.passwords[{index}].key"), &password.key)?;
        if !seen.insert(password.uid.as_str()) {
            return Err(ValidationError::DuplicatePasswordUid {
                uid: password.uid.clone(),
            });
        }
    }

    debug!("DirectoryService spec passed validation");
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validate an LDAP endpoint URL (`ldap://` or `ldaps://` with a host).
///
/// # Errors
///
/// Returns [`ValidationError::InvalidEndpoint`] if the URL does not parse, uses
/// another scheme, or has no host.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "ldap" | "ldaps") {
        return Err(invalid(format!(
            "scheme must be ldap or ldaps, got {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Validate a five-field cron expression as accepted by the directory server's
/// recurring task scheduler.
///
/// Each field is a comma separated list of `*`, `n`, `a-b`, optionally followed
/// by `/step`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidSchedule`] describing the offending field.
pub fn validate_cron_schedule(schedule: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason,
    };

    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != CRON_FIELDS.len() {
        return Err(invalid(format!(
            "expected {} fields, found {}",
            CRON_FIELDS.len(),
            fields.len()
        )));
    }

    for (field, (name, min, max)) in fields.iter().zip(CRON_FIELDS) {
        for item in field.split(',') {
            validate_cron_item(item, min, max).map_err(|reason| invalid(format!("{name}: {reason}")))?;
        }
    }
    Ok(())
}

fn validate_cron_item(item: &str, min: u32, max: u32) -> Result<(), String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    if let Some(step) = step {
        let step: u32 = step
            .parse()
            .map_err(|_| format!("step '{step}' is not a number"))?;
        if step == 0 {
            return Err("step must be at least 1".to_string());
        }
    }

    if range == "*" {
        return Ok(());
    }

    let parse = |value: &str| -> Result<u32, String> {
        let number: u32 = value
            .parse()
            .map_err(|_| format!("'{value}' is not a number"))?;
        if number < min || number > max {
            return Err(format!("{number} is outside {min}-{max}"));
        }
        Ok(number)
    };

    match range.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(format!("range {start}-{end} is reversed"));
            }
        }
        None => {
            parse(range)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
