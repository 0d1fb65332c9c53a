//! Testkit configuration
//!
//! Names the conventional models the builders talk to and carries the
//! application-wide denial status. Values come from defaults, an optional TOML
//! file and `ACL_TESTKIT_*` environment variables, in that order.

use crate::error::{FixtureError, FixtureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ACL_TESTKIT_";

/// Model names and defaults used by the fixture builders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestkitConfig {
    /// Model representing "the user" when a scope did not choose one
    pub user_model: String,
    /// Role model
    pub role_model: String,
    /// Role mapping model
    pub role_mapping_model: String,
    /// Access token model
    pub access_token_model: String,
    /// Reserved id of the anonymous token
    pub anonymous_token_id: String,
    /// Principal type recorded on role mappings for users
    pub user_principal_type: String,
    /// Status a denied call is expected to return
    pub denial_status: Option<u16>,
    /// Base URL of a running application, for socket-backed clients
    pub base_url: Option<String>,
}

impl Default for TestkitConfig {
    fn default() -> Self {
        Self {
            user_model: "User".to_string(),
            role_model: "Role".to_string(),
            role_mapping_model: "RoleMapping".to_string(),
            access_token_model: "AccessToken".to_string(),
            anonymous_token_id: "$anonymous".to_string(),
            user_principal_type: "USER".to_string(),
            denial_status: None,
            base_url: None,
        }
    }
}

impl TestkitConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> FixtureResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FixtureError::configuration(format!("invalid testkit config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> FixtureResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FixtureError::configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `ACL_TESTKIT_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> FixtureResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from an explicit list of variables
    pub fn merge_with_vars<I>(&mut self, vars: I) -> FixtureResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(field) = key.strip_prefix(ENV_PREFIX) {
                self.set_from_string(&field.to_ascii_lowercase(), &value)?;
            }
        }
        self.validate()
    }

    /// Set one field by name
    pub fn set_from_string(&mut self, key: &str, value: &str) -> FixtureResult<()> {
        match key {
            "user_model" => self.user_model = value.to_string(),
            "role_model" => self.role_model = value.to_string(),
            "role_mapping_model" => self.role_mapping_model = value.to_string(),
            "access_token_model" => self.access_token_model = value.to_string(),
            "anonymous_token_id" => self.anonymous_token_id = value.to_string(),
            "user_principal_type" => self.user_principal_type = value.to_string(),
            "denial_status" => {
                let status = value.parse::<u16>().map_err(|e| {
                    FixtureError::configuration(format!("invalid denial_status `{value}`: {e}"))
                })?;
                self.denial_status = Some(status);
            }
            "base_url" => self.base_url = Some(value.to_string()),
            other => {
                return Err(FixtureError::configuration(format!(
                    "unknown testkit setting `{other}`"
                )))
            }
        }
        Ok(())
    }

    /// Check names are present and the denial status is a real HTTP status
    pub fn validate(&self) -> FixtureResult<()> {
        let names = [
            ("user_model", &self.user_model),
            ("role_model", &self.role_model),
            ("role_mapping_model", &self.role_mapping_model),
            ("access_token_model", &self.access_token_model),
            ("anonymous_token_id", &self.anonymous_token_id),
            ("user_principal_type", &self.user_principal_type),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(FixtureError::configuration(format!("{field} must not be empty")));
        }

        if let Some(status) = self.denial_status {
            if !(100..=599).contains(&status) {
                return Err(FixtureError::configuration(format!(
                    "denial_status {status} is not an HTTP status"
                )));
            }
        }
        Ok(())
    }
}
