/*!
The settings surface of the warehouse: the YAML settings file, override
merging, and the bootstrap helper that synthesises a settings file from a
deployment stack's outputs.
*/

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseError};

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_VAR: &str = "WAREHOUSE_CONFIG_FILE";
/// Default settings file path.
pub const CONFIG_PATH_DEFAULT: &str = "settings.yaml";

/// Registry cache TTL in seconds when none is configured.
pub const DEFAULT_CACHE_TTL: u64 = 300;
/// Assumed-role session duration in seconds when none is configured.
pub const DEFAULT_SESH_DURATION: u64 = 3600;

/// The oldest backend stack this crate can talk to.
pub const MIN_BACKEND_VERSION: &str = "v2.0.0";

/// A partial settings set: what one source (file, caller overrides) knows.
/// Unknown keys in the file are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsOverlay {
    /// Region of the backing services.
    pub region_name: Option<String>,
    /// Registry table name.
    pub registry_table_name: Option<String>,
    /// Source table name.
    pub source_table_name: Option<String>,
    /// Source bucket name.
    pub source_bucket_name: Option<String>,
    /// Parsed bucket name.
    pub parsed_bucket_name: Option<String>,
    /// Optional object-key prefix.
    pub bucket_prefix: Option<String>,
    /// Optional assumed-role ARN.
    pub role_arn: Option<String>,
    /// Optional assumed-role session duration in seconds.
    pub sesh_duration: Option<u64>,
    /// Optional registry cache TTL in seconds; zero disables caching.
    pub cache_ttl: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigFile {
    warehouse: SettingsOverlay,
}

impl SettingsOverlay {
    /// Load the overlay from the default settings path, honouring
    /// [CONFIG_PATH_VAR]. A missing file is an empty overlay.
    pub fn from_default_file() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_PATH_DEFAULT.to_string());
        if !Path::new(&path).is_file() {
            return Ok(SettingsOverlay::default());
        }
        Self::from_file(path)
    }

    /// Load the overlay from a specific YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_yaml::from_str(&text)?;
        Ok(file.warehouse)
    }

    /// Merge with a fallback overlay: keys set here win.
    pub fn or(self, fallback: SettingsOverlay) -> SettingsOverlay {
        SettingsOverlay {
            region_name: self.region_name.or(fallback.region_name),
            registry_table_name: self.registry_table_name.or(fallback.registry_table_name),
            source_table_name: self.source_table_name.or(fallback.source_table_name),
            source_bucket_name: self.source_bucket_name.or(fallback.source_bucket_name),
            parsed_bucket_name: self.parsed_bucket_name.or(fallback.parsed_bucket_name),
            bucket_prefix: self.bucket_prefix.or(fallback.bucket_prefix),
            role_arn: self.role_arn.or(fallback.role_arn),
            sesh_duration: self.sesh_duration.or(fallback.sesh_duration),
            cache_ttl: self.cache_ttl.or(fallback.cache_ttl),
        }
    }

    /// Resolve into full [Settings], rejecting missing required keys.
    pub fn build(self) -> Result<Settings> {
        fn required(value: Option<String>, key: &str) -> Result<String> {
            value.ok_or_else(|| {
                WarehouseError::argument(format!(
                    "Required arg '{key}' is neither available as an override nor present \
                     in the loaded configs."
                ))
            })
        }
        let role_arn = self.role_arn;
        let sesh_duration = match (&role_arn, self.sesh_duration) {
            (Some(_), None) => Some(DEFAULT_SESH_DURATION),
            (_, sesh) => sesh,
        };
        Ok(Settings {
            region_name: required(self.region_name, "region_name")?,
            registry_table_name: required(self.registry_table_name, "registry_table_name")?,
            source_table_name: required(self.source_table_name, "source_table_name")?,
            source_bucket_name: required(self.source_bucket_name, "source_bucket_name")?,
            parsed_bucket_name: required(self.parsed_bucket_name, "parsed_bucket_name")?,
            bucket_prefix: self.bucket_prefix,
            role_arn,
            sesh_duration,
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
        })
    }
}

/// Fully-resolved warehouse settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Region of the backing services.
    pub region_name: String,
    /// Registry table name.
    pub registry_table_name: String,
    /// Source table name.
    pub source_table_name: String,
    /// Source bucket name.
    pub source_bucket_name: String,
    /// Parsed bucket name.
    pub parsed_bucket_name: String,
    /// Optional object-key prefix.
    pub bucket_prefix: Option<String>,
    /// Optional assumed-role ARN, handed to the store SDK layer.
    pub role_arn: Option<String>,
    /// Assumed-role session duration; defaulted when a role is set.
    pub sesh_duration: Option<u64>,
    /// Registry cache TTL in seconds.
    pub cache_ttl: u64,
}

impl Settings {
    /// Load settings from the default file location.
    pub fn load() -> Result<Self> {
        SettingsOverlay::from_default_file()?.build()
    }
}

/// The outputs of a deployed backend stack, as consumed by
/// [generate_settings_file].
#[derive(Debug, Clone, Deserialize)]
pub struct StackOutput {
    /// Region the stack is deployed in.
    pub region_name: String,
    /// Registry table name.
    pub registry_table: String,
    /// Source data table name.
    pub source_data_table: String,
    /// Source bucket name.
    pub source_bucket: String,
    /// Parsed bucket name.
    pub parsed_bucket: String,
    /// Optional object-key prefix.
    pub storage_prefix: Option<String>,
    /// The stack's version tag, `vX.Y.Z`.
    pub stack_version: String,
}

/// Parse a `vX.Y.Z` version tag.
fn parse_version(tag: &str) -> Result<(u64, u64, u64)> {
    let digits = tag.strip_prefix('v').unwrap_or(tag);
    let parts: Vec<&str> = digits.split('.').collect();
    if parts.len() != 3 {
        return Err(WarehouseError::argument(format!(
            "Invalid version tag '{tag}'."
        )));
    }
    let parse = |part: &str| {
        part.parse::<u64>()
            .map_err(|_| WarehouseError::argument(format!("Invalid version tag '{tag}'.")))
    };
    Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
}

/// Synthesise the settings file from a backend stack's outputs. Refuses to
/// run against a stack older than [MIN_BACKEND_VERSION]; an existing file
/// is left alone unless `overwrite` is set.
pub fn generate_settings_file(
    stack: &StackOutput,
    path: impl AsRef<Path>,
    overwrite: bool,
) -> Result<()> {
    let stack_version = parse_version(&stack.stack_version)?;
    let min_version = parse_version(MIN_BACKEND_VERSION)?;
    if stack_version < min_version {
        return Err(WarehouseError::argument(format!(
            "Backend stack version {} is older than the minimum supported {}.",
            stack.stack_version, MIN_BACKEND_VERSION
        )));
    }

    let path = path.as_ref();
    if path.is_file() && !overwrite {
        tracing::info!(path = %path.display(), "settings file already exists, not overwriting");
        return Ok(());
    }

    let file = ConfigFile {
        warehouse: SettingsOverlay {
            region_name: Some(stack.region_name.clone()),
            registry_table_name: Some(stack.registry_table.clone()),
            source_table_name: Some(stack.source_data_table.clone()),
            source_bucket_name: Some(stack.source_bucket.clone()),
            parsed_bucket_name: Some(stack.parsed_bucket.clone()),
            bucket_prefix: stack.storage_prefix.clone(),
            ..SettingsOverlay::default()
        },
    };
    std::fs::write(path, serde_yaml::to_string(&file)?)?;
    Ok(())
}
