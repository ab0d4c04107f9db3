//! Configuration Management
//!
//! Environment-sourced typed configuration for integration instances. A
//! catalog declares its configuration surface as a map of logical field
//! names to field specs; each field is read from the environment variable
//! whose name is the field's upper snake-case form (`clientId` →
//! `CLIENT_ID`). Validation happens up front so a bad environment fails the
//! run before any step executes.

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{IntegrationError, IntegrationResult};

/// Value type a configuration field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Boolean,
}

/// Declared shape of a single configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFieldSpec {
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub optional: bool,
}

impl ConfigFieldSpec {
    pub fn string() -> Self {
        Self {
            field_type: ConfigFieldType::String,
            optional: false,
        }
    }

    pub fn boolean() -> Self {
        Self {
            field_type: ConfigFieldType::Boolean,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Declared configuration surface of an integration, keyed by logical field
/// name.
pub type ConfigFieldMap = BTreeMap<String, ConfigFieldSpec>;

/// A validated configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Boolean(bool),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(value) => Some(value),
            ConfigValue::Boolean(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(value) => Some(*value),
            ConfigValue::String(_) => None,
        }
    }
}

/// Validated configuration for one integration instance.
pub type IntegrationConfig = BTreeMap<String, ConfigValue>;

/// Load and validate configuration from the process environment.
///
/// Missing required fields and malformed boolean values are configuration
/// errors naming the offending environment variable.
pub fn load_config_from_env(fields: &ConfigFieldMap) -> IntegrationResult<IntegrationConfig> {
    let mut config = IntegrationConfig::new();

    for (field_name, spec) in fields {
        let var_name = env_var_name(field_name);
        match env::var(&var_name) {
            Ok(raw) => {
                let value = parse_field_value(field_name, &var_name, spec.field_type, &raw)?;
                config.insert(field_name.clone(), value);
            }
            Err(_) if spec.optional => {
                debug!(field = %field_name, env_var = %var_name, "Optional config field not set");
            }
            Err(_) => {
                return Err(IntegrationError::Configuration(format!(
                    "Missing required config field '{field_name}' (expected environment variable '{var_name}')"
                )));
            }
        }
    }

    Ok(config)
}

fn parse_field_value(
    field_name: &str,
    var_name: &str,
    field_type: ConfigFieldType,
    raw: &str,
) -> IntegrationResult<ConfigValue> {
    match field_type {
        ConfigFieldType::String => Ok(ConfigValue::String(raw.to_string())),
        ConfigFieldType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(ConfigValue::Boolean(true)),
            "false" => Ok(ConfigValue::Boolean(false)),
            _ => Err(IntegrationError::Configuration(format!(
                "Config field '{field_name}' ({var_name}) expects a boolean ('true'/'false'), got '{raw}'"
            ))),
        },
    }
}

/// Environment variable name for a logical config field: upper snake-case.
pub fn env_var_name(field_name: &str) -> String {
    let mut name = String::with_capacity(field_name.len() + 4);
    for (i, c) in field_name.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 && !name.ends_with('_') {
            name.push('_');
        }
        if c == '-' || c == '.' {
            name.push('_');
        } else {
            name.push(c.to_ascii_uppercase());
        }
    }
    name
}
