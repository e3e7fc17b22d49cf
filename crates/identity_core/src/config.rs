use std::{fs, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// What to do when releasing a linked social session fails during deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlinkPolicy {
    /// Log the failure and delete the account anyway.
    #[default]
    BestEffort,
    /// Abort the deletion and report the failure.
    Strict,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown unlink policy '{0}', expected 'best_effort' or 'strict'")]
pub struct UnknownUnlinkPolicy(pub String);

impl FromStr for UnlinkPolicy {
    type Err = UnknownUnlinkPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(UnlinkPolicy::BestEffort),
            "strict" => Ok(UnlinkPolicy::Strict),
            other => Err(UnknownUnlinkPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub operation_timeout: Duration,
    pub unlink_policy: UnlinkPolicy,
    pub provision_on_start: bool,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(15_000),
            unlink_policy: UnlinkPolicy::BestEffort,
            provision_on_start: true,
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    operation_timeout_ms: Option<u64>,
    unlink_policy: Option<UnlinkPolicy>,
    provision_on_start: Option<bool>,
    event_buffer: Option<usize>,
}

/// Defaults, then the optional TOML file, then `APP__*` environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Some(path) = path {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg = toml::from_str::<FileSettings>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        apply_file(&mut settings, file_cfg);
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.operation_timeout_ms {
        settings.operation_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.unlink_policy {
        settings.unlink_policy = v;
    }
    if let Some(v) = file_cfg.provision_on_start {
        settings.provision_on_start = v;
    }
    if let Some(v) = file_cfg.event_buffer {
        settings.event_buffer = v.max(1);
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("APP__OPERATION_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(ms) => settings.operation_timeout = Duration::from_millis(ms),
            Err(_) => warn!(value = %v, "ignoring invalid APP__OPERATION_TIMEOUT_MS"),
        }
    }

    if let Some(v) = var("APP__UNLINK_POLICY") {
        match v.parse::<UnlinkPolicy>() {
            Ok(policy) => settings.unlink_policy = policy,
            Err(err) => warn!(%err, "ignoring invalid APP__UNLINK_POLICY"),
        }
    }

    if let Some(v) = var("APP__PROVISION_ON_START") {
        match v.parse::<bool>() {
            Ok(flag) => settings.provision_on_start = flag,
            Err(_) => warn!(value = %v, "ignoring invalid APP__PROVISION_ON_START"),
        }
    }

    if let Some(v) = var("APP__EVENT_BUFFER") {
        match v.parse::<usize>() {
            Ok(size) => settings.event_buffer = size.max(1),
            Err(_) => warn!(value = %v, "ignoring invalid APP__EVENT_BUFFER"),
        }
    }
}
