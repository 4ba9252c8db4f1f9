//! YAML configuration parsing, section merge, and environment overrides.
//!
//! # Loading order (spec §6)
//! 1. system config (e.g. `/etc/agentsh/config.yaml`)
//! 2. user config (e.g. `~/.config/agentsh/config.yaml`)
//! 3. project config (`./.agentsh/config.yaml`)
//! 4. explicit `--config <path>`
//! 5. `AGENTSH_*` environment variable overrides
//!
//! This module implements steps 2–5 as pure, testable functions over
//! already-located file paths; it does not itself walk well-known
//! directories (that mechanism belongs to the CLI entry point).

use std::collections::HashMap;

use serde_yaml::Value;

use super::schema::AppConfig;
use crate::error::{AgentShError, Result};

/// Parse a single YAML document into an [`AppConfig`], validating that no
/// unknown top-level keys are present.
pub fn parse_config(yaml: &str) -> Result<AppConfig> {
    serde_yaml::from_str(yaml).map_err(|e| AgentShError::Config(format!("invalid config: {e}")))
}

/// Merge `override_doc` onto `base`, replacing scalars/sequences and
/// recursively merging mappings. Used to layer
/// system → user → project → explicit configs before final deserialization.
pub fn merge_yaml(base: Value, override_doc: Value) -> Value {
    match (base, override_doc) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (k, v) in override_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, override_doc) => override_doc,
    }
}

/// Merge a sequence of YAML documents, later entries winning, then
/// deserialize into [`AppConfig`].
pub fn load_layered(docs: &[&str]) -> Result<AppConfig> {
    let mut merged = Value::Mapping(Default::default());
    for doc in docs {
        if doc.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_yaml::from_str(doc)
            .map_err(|e| AgentShError::Config(format!("invalid config: {e}")))?;
        merged = merge_yaml(merged, parsed);
    }
    serde_yaml::from_value(merged).map_err(|e| AgentShError::Config(format!("invalid config: {e}")))
}

/// Parse an `AGENTSH_*` environment map into an override tree keyed by
/// lower-cased section/field path, then apply it onto `config`.
///
/// Nesting uses a double underscore: `AGENTSH_SECURITY__MODE=strict` maps
/// to `security.mode`. Values are coerced bool → int → float → string,
/// first successful parse wins.
pub fn apply_env_overrides(config: &mut AppConfig, env: &HashMap<String, String>) -> Result<()> {
    let mut overrides = serde_yaml::Mapping::new();
    for (key, raw) in env {
        let Some(rest) = key.strip_prefix("AGENTSH_") else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let path: Vec<String> = rest.split("__").map(|p| p.to_lowercase()).collect();
        insert_path(&mut overrides, &path, coerce_env_value(raw));
    }

    if overrides.is_empty() {
        return Ok(());
    }

    let base = serde_yaml::to_value(&*config)
        .map_err(|e| AgentShError::Config(format!("failed to serialize config: {e}")))?;
    let merged = merge_yaml(base, Value::Mapping(overrides));
    *config = serde_yaml::from_value(merged)
        .map_err(|e| AgentShError::Config(format!("invalid env override: {e}")))?;
    Ok(())
}

fn insert_path(map: &mut serde_yaml::Mapping, path: &[String], value: Value) {
    if path.len() == 1 {
        map.insert(Value::String(path[0].clone()), value);
        return;
    }
    let key = Value::String(path[0].clone());
    let entry = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Default::default()));
    if let Value::Mapping(nested) = entry {
        insert_path(nested, &path[1..], value);
    }
}

/// Coerce a raw environment string: bool → int → float → string.
fn coerce_env_value(raw: &str) -> Value {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "true" | "yes" | "1" | "on" => return Value::Bool(true),
        "false" | "no" | "0" | "off" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Number(serde_yaml::Number::from(f));
        }
    }
    Value::String(raw.to_owned())
}
