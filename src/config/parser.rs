use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use crate::agents::AgentSpec;
use crate::errors::FleetError;
use super::duration;
use super::types::{FleetConfig, MaintenanceActionConfig, ProbeConfig};
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<FleetConfig, FleetError> {
    if !path.exists() {
        return Err(FleetError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(FleetError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

pub fn parse_config_str(content: &str) -> Result<FleetConfig, FleetError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    // An empty file is a valid, all-defaults config
    if yaml.is_null() {
        return Ok(FleetConfig::default());
    }

    // JSON Schema validation
    validate_schema(&yaml)?;

    // Parse into typed config
    let config: FleetConfig = serde_yaml::from_value(yaml)
        .map_err(|e| FleetError::Config(format!("Invalid config: {}", e)))?;

    // Semantic checks the schema cannot express
    validate_semantics(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), FleetError> {
    // Convert YAML value to JSON for schema validation
    let json_value: serde_json::Value = serde_json::to_value(yaml)
        .map_err(|e| FleetError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| FleetError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        // Advisory: typed decoding and the semantic pass are authoritative
        for e in errors {
            warn!(validation_error = %e, path = %e.instance_path, "Config schema warning");
        }
    }

    Ok(())
}

fn check_bounded(name: &str, value: Duration) -> Result<(), FleetError> {
    if value > duration::MAX {
        return Err(FleetError::Config(format!(
            "{} ({}) exceeds the maximum of {}",
            name,
            humantime::format_duration(value),
            humantime::format_duration(duration::MAX)
        )));
    }
    Ok(())
}

/// Detect semantic problems in the parsed configuration.
fn validate_semantics(config: &FleetConfig) -> Result<(), FleetError> {
    let supervisor = &config.supervisor;
    check_bounded("queue.lease_ttl", config.queue.lease_ttl)?;
    check_bounded("supervisor.tick", supervisor.tick)?;
    check_bounded("supervisor.grace_period", supervisor.grace_period)?;
    check_bounded("supervisor.health_interval", supervisor.health_interval)?;
    check_bounded("supervisor.probe_timeout", supervisor.probe_timeout)?;
    check_bounded("supervisor.restart.backoff_base", supervisor.restart.backoff_base)?;
    check_bounded("supervisor.restart.backoff_cap", supervisor.restart.backoff_cap)?;

    let restart = &config.supervisor.restart;
    if restart.backoff_base > restart.backoff_cap {
        return Err(FleetError::Config(format!(
            "supervisor.restart.backoff_base ({:?}) exceeds backoff_cap ({:?})",
            restart.backoff_base, restart.backoff_cap
        )));
    }
    if restart.failure_threshold == 0 {
        return Err(FleetError::Config("supervisor.restart.failure_threshold must be at least 1".into()));
    }
    if config.supervisor.tick.is_zero() {
        return Err(FleetError::Config("supervisor.tick must be greater than zero".into()));
    }
    if config.queue.lease_ttl.is_zero() {
        return Err(FleetError::Config("queue.lease_ttl must be greater than zero".into()));
    }
    if config.dispatch.max_batch == 0 {
        return Err(FleetError::Config("dispatch.max_batch must be at least 1".into()));
    }

    let mut seen = HashSet::new();
    for agent in &config.agents {
        if agent.id.trim().is_empty() {
            return Err(FleetError::Config("Agent id must not be empty".into()));
        }
        if !seen.insert(agent.id.as_str()) {
            return Err(FleetError::Config(format!("Duplicate agent id '{}'", agent.id)));
        }
        if agent.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(FleetError::Config(format!("Agent '{}' has an empty command", agent.id)));
        }
        // Checked on the resolved policy, so a lone override still meets the default
        let resolved = AgentSpec::from_config(agent, supervisor);
        if resolved.restart.backoff_base > resolved.restart.backoff_cap {
            return Err(FleetError::Config(format!(
                "Agent '{}': backoff_base ({}) exceeds backoff_cap ({})",
                agent.id,
                humantime::format_duration(resolved.restart.backoff_base),
                humantime::format_duration(resolved.restart.backoff_cap)
            )));
        }
        check_bounded(&format!("agents.{}.health_interval", agent.id), resolved.health_interval)?;
        check_bounded(&format!("agents.{}.backoff_cap", agent.id), resolved.restart.backoff_cap)?;
        if let ProbeConfig::Http { timeout: Some(timeout), .. } = &agent.probe {
            check_bounded(&format!("agents.{}.probe.timeout", agent.id), *timeout)?;
        }
        if agent.restart.failure_threshold == Some(0) {
            return Err(FleetError::Config(format!(
                "Agent '{}': failure_threshold must be at least 1", agent.id
            )));
        }
        if agent.health_interval.is_some_and(|d| d.is_zero()) {
            return Err(FleetError::Config(format!(
                "Agent '{}': health_interval must be greater than zero", agent.id
            )));
        }
        if let ProbeConfig::Http { url, .. } = &agent.probe {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(FleetError::Config(format!(
                    "Agent '{}': probe url must be http(s), got '{}'", agent.id, url
                )));
            }
        }
        if let Some(dir) = &agent.working_dir {
            if !dir.exists() {
                warn!(agent = %agent.id, dir = %dir.display(), "Working directory does not exist yet");
            }
        }
    }

    let mut task_names = HashSet::new();
    for task in &config.maintenance {
        if !task_names.insert(task.name.as_str()) {
            return Err(FleetError::Config(format!("Duplicate maintenance task '{}'", task.name)));
        }
        check_bounded(&format!("maintenance.{}.every", task.name), task.every)?;
        if task.every.is_zero() {
            return Err(FleetError::Config(format!(
                "Maintenance task '{}': interval must be greater than zero", task.name
            )));
        }
        if let MaintenanceActionConfig::Command { command, .. } = &task.action {
            if command.is_empty() {
                return Err(FleetError::Config(format!(
                    "Maintenance task '{}' has an empty command", task.name
                )));
            }
        }
    }

    Ok(())
}
