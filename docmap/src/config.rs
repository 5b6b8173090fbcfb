//! Mapper configuration, usually read from `docmap.toml`.
//!
//! ```toml
//! [store]
//! backend = "redis"
//! url = "${REDIS_URL}"
//! prefix = "myapp"
//!
//! [[classes]]
//! name = "Team"
//!
//! [[classes.associations]]
//! kind = "many"
//! name = "games"
//! options = { dependent = "destroy" }
//! ```

use std::{env, path::Path, sync::LazyLock};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{MapperError, Result},
    types::AssociationKind,
    value::Attributes,
};

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub identity_map: IdentityMapSettings,
    #[serde(default)]
    pub classes: Vec<ClassSettings>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_url(),
            prefix: default_prefix(),
        }
    }
}

fn default_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "docmap".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMapSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for IdentityMapSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Declarative class definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSettings {
    pub name: String,
    /// Defaults to the tableized class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub embeddable: bool,
    /// Parent class for single-collection inheritance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub associations: Vec<AssociationSettings>,
    #[serde(default)]
    pub nested_attributes: Vec<NestedAttributesSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationSettings {
    pub kind: AssociationKind,
    pub name: String,
    #[serde(default)]
    pub options: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedAttributesSettings {
    pub associations: Vec<String>,
    #[serde(default)]
    pub allow_destroy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_if: Option<String>,
}

impl MapperConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|err| MapperError::config(format!("{}: {err}", path.display())))
    }

    /// Parses a TOML document and expands `${VAR}` references in the store URL.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: MapperConfig =
            toml::from_str(content).map_err(|err| MapperError::config(err.to_string()))?;
        if config.store.backend == StoreBackend::Redis {
            config.store.url = expand_env(&config.store.url)?;
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| MapperError::config(err.to_string()))
    }
}

/// Replaces every `${VAR}` with the value of the environment variable.
pub fn expand_env(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let expanded = ENV_VAR.replace_all(input, |caps: &Captures<'_>| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.push(caps[1].to_string());
            String::new()
        }
    });
    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(MapperError::config(format!("environment variable(s) not set: {}", missing.join(", "))))
    }
}
