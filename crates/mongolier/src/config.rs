//! Configuration: connection descriptors and `mongolier.toml` settings

use crate::connection::PoolConfig;
use crate::retry::RetryPolicy;
use crate::sync::CollectionSpec;
use crate::validation::{CollectionName, DatabaseName};
use mongodb::options::{ReadPreference, ReadPreferenceOptions, SelectionCriteria};
use mongolier_common::{MongolierError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Alias used when none is given
pub const DEFAULT_ALIAS: &str = "default";

/// Environment variable that overrides the default alias URI
pub const URI_ENV_VAR: &str = "MONGOLIER_URI";

/// Default number of objects per page for list views
pub const DEFAULT_PAGINATION: u64 = 25;

/// Read preference mode, in the driver's naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl std::str::FromStr for ReadPreferenceMode {
    type Err = MongolierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(MongolierError::Configuration(format!(
                "Unknown read preference: {}",
                s
            ))),
        }
    }
}

/// Driver-native options carried by a descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_preference: Option<ReadPreferenceMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_sets: Vec<HashMap<String, String>>,
}

impl DriverOptions {
    /// Selection criteria for the driver, if a read preference was given
    pub fn selection_criteria(&self) -> Result<Option<SelectionCriteria>> {
        let Some(mode) = self.read_preference else {
            if !self.tag_sets.is_empty() {
                return Err(MongolierError::Configuration(
                    "Tag sets require a read preference".to_string(),
                ));
            }
            return Ok(None);
        };

        let options = if self.tag_sets.is_empty() {
            None
        } else {
            let mut options = ReadPreferenceOptions::default();
            options.tag_sets = Some(self.tag_sets.clone());
            Some(options)
        };

        let preference = match mode {
            ReadPreferenceMode::Primary => {
                if options.is_some() {
                    return Err(MongolierError::Configuration(
                        "Tag sets cannot be combined with the primary read preference".to_string(),
                    ));
                }
                ReadPreference::Primary
            }
            ReadPreferenceMode::PrimaryPreferred => ReadPreference::PrimaryPreferred { options },
            ReadPreferenceMode::Secondary => ReadPreference::Secondary { options },
            ReadPreferenceMode::SecondaryPreferred => {
                ReadPreference::SecondaryPreferred { options }
            }
            ReadPreferenceMode::Nearest => ReadPreference::Nearest { options },
        };

        Ok(Some(SelectionCriteria::ReadPreference(preference)))
    }
}

/// Identifies exactly one database + collection pair
///
/// `target` is either a configured alias or a `mongodb://` URI. Fields are
/// fixed once the descriptor is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    target: String,
    database: DatabaseName,
    collection: CollectionName,
    options: DriverOptions,
}

impl ConnectionDescriptor {
    /// Builds a descriptor, rejecting malformed names with a configuration error
    pub fn new(target: &str, database: &str, collection: &str) -> Result<Self> {
        if target.trim().is_empty() {
            return Err(MongolierError::Configuration(
                "Connection target cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            target: target.to_string(),
            database: DatabaseName::new(database)?,
            collection: CollectionName::new(collection)?,
            options: DriverOptions::default(),
        })
    }

    pub fn with_read_preference(mut self, mode: ReadPreferenceMode) -> Self {
        self.options.read_preference = Some(mode);
        self
    }

    pub fn with_tag_set(mut self, tags: HashMap<String, String>) -> Self {
        self.options.tag_sets.push(tags);
        self
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn database(&self) -> &str {
        self.database.as_str()
    }

    pub fn collection(&self) -> &str {
        self.collection.as_str()
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// True when the target is a connection string rather than an alias
    pub fn target_is_uri(&self) -> bool {
        is_uri(&self.target)
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = if self.target_is_uri() { "<uri>" } else { self.target.as_str() };
        write!(f, "{}:{}.{}", target, self.database, self.collection)
    }
}

fn is_uri(target: &str) -> bool {
    target.starts_with("mongodb://") || target.starts_with("mongodb+srv://")
}

/// One configured MongoDB deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pool_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_selection_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl DatabaseSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            default_database: None,
            min_pool_size: None,
            max_pool_size: None,
            connect_timeout_ms: None,
            server_selection_timeout_ms: None,
            app_name: None,
        }
    }

    /// Pool configuration, falling back to the defaults for unset fields
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            min_pool_size: self.min_pool_size.or(defaults.min_pool_size),
            max_pool_size: self.max_pool_size.or(defaults.max_pool_size),
            max_idle_time: defaults.max_idle_time,
            connect_timeout: self
                .connect_timeout_ms
                .map(Duration::from_millis)
                .or(defaults.connect_timeout),
            server_selection_timeout: self
                .server_selection_timeout_ms
                .map(Duration::from_millis)
                .or(defaults.server_selection_timeout),
            app_name: self.app_name.clone().or(defaults.app_name),
        }
    }
}

/// `[retry]` section, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retry_writes: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            retry_writes: policy.retry_writes,
        }
    }
}

impl RetrySettings {
    /// Rejects values that cannot produce a usable backoff
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            return Err(MongolierError::Configuration(format!(
                "retry.backoff_multiplier must be a non-negative number, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            retry_writes: settings.retry_writes,
        }
    }
}

/// `[pagination]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub per_page: u64,
    pub max_limit: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PAGINATION,
            max_limit: 1000,
        }
    }
}

/// Contents of `mongolier.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub databases: HashMap<String, DatabaseSettings>,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub pagination: PaginationSettings,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<CollectionSpec>,
}

impl Settings {
    /// Settings with a single `default` alias
    pub fn with_default_uri(uri: impl Into<String>) -> Self {
        let mut settings = Self::default();
        settings
            .databases
            .insert(DEFAULT_ALIAS.to_string(), DatabaseSettings::new(uri));
        settings
    }

    /// Parses settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| MongolierError::Configuration(format!("Invalid settings: {}", e)))?;
        settings.retry.validate()?;
        Ok(settings)
    }

    /// Loads settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MongolierError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads settings from `path` if it exists (defaults otherwise), then
    /// applies environment overrides
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        Ok(settings.with_env_overrides())
    }

    /// Applies `MONGOLIER_URI` to the default alias
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(URI_ENV_VAR) {
            Ok(uri) if !uri.is_empty() => self.with_uri_override(DEFAULT_ALIAS, uri),
            _ => self,
        }
    }

    fn with_uri_override(mut self, alias: &str, uri: String) -> Self {
        self.databases
            .entry(alias.to_string())
            .and_modify(|db| db.uri = uri.clone())
            .or_insert_with(|| DatabaseSettings::new(uri));
        self
    }

    /// Looks up an alias
    pub fn database(&self, alias: &str) -> Result<&DatabaseSettings> {
        self.databases.get(alias).ok_or_else(|| {
            MongolierError::Configuration(format!("Unknown database alias: '{}'", alias))
        })
    }

    /// Resolves a descriptor target (alias or URI) to a connection string
    pub fn resolve_uri(&self, target: &str) -> Result<String> {
        if is_uri(target) {
            return Ok(target.to_string());
        }
        Ok(self.database(target)?.uri.clone())
    }

    /// Builds a descriptor against an alias, falling back to its default database
    pub fn descriptor(
        &self,
        alias: &str,
        database: Option<&str>,
        collection: &str,
    ) -> Result<ConnectionDescriptor> {
        let db_settings = self.database(alias)?;
        let database = database
            .or(db_settings.default_database.as_deref())
            .ok_or_else(|| {
                MongolierError::Configuration(format!(
                    "No database given and alias '{}' has no default_database",
                    alias
                ))
            })?;
        ConnectionDescriptor::new(alias, database, collection)
    }

    /// Retry policy built from the `[retry]` section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}
