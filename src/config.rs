use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::blob::{DEFAULT_REGION, DEFAULT_REQUEST_TIMEOUT};
use crate::domain::{Collection, MarkerPolicy};
use crate::error::HarvestError;
use crate::guard::DEFAULT_CONCURRENCY;
use crate::keys::{DEFAULT_KEY_PREFIX, DEFAULT_LINK_MARKER, KeyResolver};

pub const CONFIG_FILE_NAME: &str = "clip-harvest.json";
pub const DEFAULT_DB_HOST: &str = "172.31.1.116";
pub const DEFAULT_DB_PORT: u16 = 6432;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: DatabaseEntry,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub target_dir: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub flat_link_buckets: Option<Vec<String>>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub link_marker: Option<String>,
    #[serde(default)]
    pub marker_policy: Option<MarkerPolicy>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatabaseEntry {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dbname: Option<String>,
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub target_dir: Option<String>,
    pub concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub batch_timeout_secs: Option<u64>,
    pub marker_policy: Option<MarkerPolicy>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    /// `None` leaves the libpq environment (`PGUSER`, `PGPASSWORD`) in charge.
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: String,
}

/// Where objects are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSource {
    /// Signed `GetObject` calls with credentials from the AWS default chain.
    S3 { bucket: String, region: String },
    /// Unsigned GETs under a base URL.
    Http { base_url: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub schema_version: u32,
    pub database: DatabaseSettings,
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub target_dir: Utf8PathBuf,
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub batch_timeout: Option<Duration>,
    pub flat_link_buckets: Vec<String>,
    pub key_prefix: String,
    pub link_marker: String,
    pub marker_policy: MarkerPolicy,
}

impl Settings {
    pub fn collection(&self) -> Collection {
        Collection::for_bucket(&self.bucket, &self.flat_link_buckets)
    }

    pub fn key_resolver(&self) -> KeyResolver {
        KeyResolver::for_collection(
            self.collection(),
            &self.link_marker,
            self.marker_policy,
            &self.key_prefix,
        )
    }

    /// An explicit endpoint switches from S3 to plain HTTP.
    pub fn blob_source(&self) -> BlobSource {
        match &self.endpoint {
            Some(base_url) => BlobSource::Http {
                base_url: base_url.clone(),
            },
            None => BlobSource::S3 {
                bucket: self.bucket.clone(),
                region: self.region.clone(),
            },
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Otherwise the working directory and then
    /// the user config directory are tried, falling back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<Config, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_location() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, HarvestError> {
        serde_json::from_str(content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    fn default_location() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("clip-harvest").join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn resolve_settings(config: Config, overrides: Overrides) -> Result<Settings, HarvestError> {
        let database = DatabaseSettings {
            host: overrides
                .host
                .or(config.database.host)
                .unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            port: overrides
                .port
                .or(config.database.port)
                .unwrap_or(DEFAULT_DB_PORT),
            user: non_empty(overrides.user.or(config.database.user)),
            password: non_empty(overrides.password.or(config.database.password)),
            dbname: required(overrides.dbname.or(config.database.dbname), "dbname")?,
        };

        let concurrency = overrides
            .concurrency
            .or(config.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let request_timeout = overrides
            .request_timeout_secs
            .or(config.request_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let batch_timeout = overrides
            .batch_timeout_secs
            .or(config.batch_timeout_secs)
            .map(Duration::from_secs);

        let link_marker = config
            .link_marker
            .unwrap_or_else(|| DEFAULT_LINK_MARKER.to_string());
        if link_marker.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "link_marker must not be empty".to_string(),
            ));
        }

        Ok(Settings {
            schema_version: config.schema_version.unwrap_or(1),
            database,
            bucket: required(overrides.bucket.or(config.bucket), "bucket")?,
            region: overrides
                .region
                .or(config.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: non_empty(overrides.endpoint.or(config.endpoint)),
            target_dir: Utf8PathBuf::from(required(
                overrides.target_dir.or(config.target_dir),
                "path",
            )?),
            concurrency,
            request_timeout,
            batch_timeout,
            flat_link_buckets: config
                .flat_link_buckets
                .unwrap_or_else(default_flat_link_buckets),
            key_prefix: config
                .key_prefix
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            link_marker,
            marker_policy: overrides
                .marker_policy
                .or(config.marker_policy)
                .unwrap_or_default(),
        })
    }
}

pub fn default_flat_link_buckets() -> Vec<String> {
    vec!["clanz-uploads-ogg".to_string()]
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn required(value: Option<String>, name: &str) -> Result<String, HarvestError> {
    non_empty(value).ok_or_else(|| HarvestError::InvalidConfig(format!("missing required value: {name}")))
}
