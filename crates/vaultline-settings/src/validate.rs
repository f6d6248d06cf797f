use std::{collections::HashSet, ops::RangeInclusive};

use serde::Serialize;

use crate::model::SecureSettings;

pub const THEMES: &[&str] = &["light", "dark", "system"];
pub const SESSION_TIMEOUT_MINUTES: RangeInclusive<i64> = 5..=1440;
pub const REQUESTS_PER_MINUTE: RangeInclusive<u32> = 1..=1000;

/// Structural problems land in `errors` and make the settings unusable. Out-of-range
/// values land in `warnings` and are tolerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_settings(settings: &SecureSettings) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut provider_ids = HashSet::new();
    for (idx, provider) in settings.providers.iter().enumerate() {
        if provider.id.trim().is_empty() {
            errors.push(format!("provider #{idx} has no id"));
        } else if !provider_ids.insert(provider.id.as_str()) {
            errors.push(format!("duplicate provider id '{}'", provider.id));
        }
        if provider.name.trim().is_empty() {
            errors.push(format!("provider #{idx} has no name"));
        }
        if provider.enabled && provider.api_key.is_empty() && provider.kind != "ollama" {
            warnings.push(format!("provider '{}' is enabled without an API key", provider.id));
        }
    }

    let mut server_ids = HashSet::new();
    for (idx, server) in settings.tool_servers.iter().enumerate() {
        if server.id.trim().is_empty() {
            errors.push(format!("tool server #{idx} has no id"));
        } else if !server_ids.insert(server.id.as_str()) {
            errors.push(format!("duplicate tool server id '{}'", server.id));
        }
        if server.command.trim().is_empty() {
            errors.push(format!("tool server #{idx} has no command"));
        }
    }

    let prefs = &settings.preferences;
    if !THEMES.contains(&prefs.theme.as_str()) {
        warnings.push(format!("unknown theme '{}'", prefs.theme));
    }
    if let Some(default) = &prefs.default_provider {
        if !provider_ids.contains(default.as_str()) {
            warnings.push(format!("default provider '{default}' is not configured"));
        }
    }

    let policy = &settings.security_policy;
    if !SESSION_TIMEOUT_MINUTES.contains(&policy.session_timeout_minutes) {
        warnings.push(format!(
            "session timeout {} outside {}..={} minutes",
            policy.session_timeout_minutes,
            SESSION_TIMEOUT_MINUTES.start(),
            SESSION_TIMEOUT_MINUTES.end()
        ));
    }
    if !REQUESTS_PER_MINUTE.contains(&policy.max_requests_per_minute) {
        warnings.push(format!(
            "request rate {} outside {}..={} per minute",
            policy.max_requests_per_minute,
            REQUESTS_PER_MINUTE.start(),
            REQUESTS_PER_MINUTE.end()
        ));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
