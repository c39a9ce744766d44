//! # Validation
//!
//! Validates Chart resources and duration strings.

use crate::crd::{Chart, ObjectRef};
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|[smhd])").expect("valid duration pattern")
});

static DURATION_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(ms|[smhd]))+$").expect("valid duration pattern"));

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid label pattern"));

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid subdomain pattern")
});

static ARCHIVE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("valid url pattern"));

/// Helm refuses release names longer than this
const MAX_RELEASE_NAME_LEN: usize = 53;

/// Parse Kubernetes duration string into std::time::Duration
/// Supports single and compound forms: "30s", "5m", "1h30m", "1d", "500ms"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim().to_lowercase();

    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    if !DURATION_FULL.is_match(&trimmed) {
        return Err(anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '5m', '1h30m')",
            duration_str.trim()
        ));
    }

    let mut total = Duration::ZERO;
    for captures in DURATION_PART.captures_iter(&trimmed) {
        let number: u64 = captures["number"].parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid duration number '{}' in '{}': {}",
                &captures["number"],
                trimmed,
                e
            )
        })?;
        let part = match &captures["unit"] {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.saturating_mul(60)),
            "h" => Duration::from_secs(number.saturating_mul(3600)),
            "d" => Duration::from_secs(number.saturating_mul(86400)),
            unit => {
                return Err(anyhow::anyhow!(
                    "Invalid unit '{unit}' in duration '{trimmed}'. Expected: ms, s, m, h, or d"
                ))
            }
        };
        total = total.saturating_add(part);
    }

    if total.is_zero() {
        return Err(anyhow::anyhow!(
            "Duration must be greater than 0, got '{trimmed}'"
        ));
    }

    Ok(total)
}

/// Validate the fields a pass relies on
pub fn validate_chart(chart: &Chart) -> Result<()> {
    let spec = &chart.spec;

    validate_release_name(&spec.name)?;
    validate_kubernetes_namespace(&spec.namespace, "spec.namespace")?;

    if !ARCHIVE_URL.is_match(spec.tarball_url.trim()) {
        return Err(anyhow::anyhow!(
            "spec.tarballUrl '{}' must be a valid URL starting with http:// or https://",
            spec.tarball_url
        ));
    }

    if spec.version.trim().is_empty() {
        return Err(anyhow::anyhow!("spec.version cannot be empty"));
    }

    if let Some(config) = &spec.config {
        if let Some(r) = &config.config_map {
            validate_object_ref(r, "spec.config.configMap")?;
        }
        if let Some(r) = &config.secret {
            validate_object_ref(r, "spec.config.secret")?;
        }
    }

    let timeouts = [
        ("spec.install.timeout", spec.install.as_ref().and_then(|o| o.timeout.as_deref())),
        ("spec.upgrade.timeout", spec.upgrade.as_ref().and_then(|o| o.timeout.as_deref())),
        ("spec.rollback.timeout", spec.rollback.as_ref().and_then(|o| o.timeout.as_deref())),
        ("spec.uninstall.timeout", spec.uninstall.as_ref().and_then(|o| o.timeout.as_deref())),
    ];
    for (field, value) in timeouts {
        if let Some(value) = value {
            parse_kubernetes_duration(value).map_err(|e| anyhow::anyhow!("{field}: {e}"))?;
        }
    }

    Ok(())
}

/// Release names are DNS labels of at most 53 characters
fn validate_release_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("spec.name cannot be empty"));
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(anyhow::anyhow!(
            "spec.name '{}' exceeds maximum release name length of {} characters (got {})",
            name,
            MAX_RELEASE_NAME_LEN,
            name.len()
        ));
    }
    if !DNS_LABEL.is_match(name) {
        return Err(anyhow::anyhow!(
            "spec.name '{name}' must be a valid release name (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }
    Ok(())
}

/// Validate Kubernetes namespace (RFC 1123 label)
fn validate_kubernetes_namespace(namespace: &str, field_name: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }
    if namespace.len() > 63 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 63 characters (got {})",
            field_name,
            namespace,
            namespace.len()
        ));
    }
    if !DNS_LABEL.is_match(namespace) {
        return Err(anyhow::anyhow!(
            "{field_name} '{namespace}' must be a valid Kubernetes namespace (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }
    Ok(())
}

fn validate_object_ref(object: &ObjectRef, field_name: &str) -> Result<()> {
    if object.name.is_empty() || object.name.len() > 253 || !DNS_SUBDOMAIN.is_match(&object.name) {
        return Err(anyhow::anyhow!(
            "{field_name}.name '{}' must be a valid Kubernetes name",
            object.name
        ));
    }
    validate_kubernetes_namespace(&object.namespace, &format!("{field_name}.namespace"))
}
