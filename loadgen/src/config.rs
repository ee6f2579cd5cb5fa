//! Configuration for the upload generator.
//!
//! Configuration is loaded from the following sources, with the highest precedence first:
//!
//! 1. Environment variables (prefixed with `LOADGEN__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Nested fields use double underscores, for example `LOADGEN__CREDENTIAL__ENDPOINT`.
//!
//! ```yaml
//! credential:
//!   region: us-east-1
//!   endpoint: localhost:9000
//!   access_key_id: AKIA...
//!   access_key_secret: ...
//!
//! bucket: loadtest
//! workers: 8
//! file_size_list: [4K, 1M, 64M]
//! delete_after_days: ["1", "7"]
//!
//! multipart_threshold: 32M
//! part_size: 8M
//! ```
//!
//! A loaded [`Config`] is turned into a [`RunConfig`] by [`Config::validate`], which parses all
//! human-readable sizes and rejects anything a run cannot start with.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::PartCapPolicy;
use crate::store::S3StoreConfig;
use crate::upload::{DEFAULT_PART_SIZE, UploadSettings};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LOADGEN__";

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Newtype around `String` that protects against accidental logging of secrets. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// A scalar that may be written as a number or as a string.
///
/// YAML and environment values like `512` or `7` arrive as numbers, while `4K` arrives as a
/// string. Both are accepted wherever a size or a day count is configured.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A plain unsigned number.
    Number(u64),
    /// Any other text.
    Text(String),
}

impl ConfigValue {
    /// Parses the value as a human-readable size, see [`parse_size`].
    pub fn to_size(&self) -> Option<u64> {
        match self {
            Self::Number(bytes) => Some(*bytes),
            Self::Text(text) => parse_size(text),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for ConfigValue {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<&str> for ConfigValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Static credentials and location of the storage service.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Credential {
    /// Signing region.
    #[serde(default)]
    pub region: String,
    /// Service endpoint, e.g. `localhost:9000` or `https://s3.example.com`.
    pub endpoint: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub access_key_secret: SecretBox<ConfigSecret>,
    /// Optional session token.
    #[serde(default)]
    pub token: Option<SecretBox<ConfigSecret>>,
}

impl Credential {
    /// Converts the credential into connection settings for the S3 store.
    pub fn to_store_config(&self) -> S3StoreConfig {
        S3StoreConfig {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.access_key_secret.expose_secret().as_str().to_owned(),
            session_token: self
                .token
                .as_ref()
                .map(|token| token.expose_secret().as_str().to_owned())
                .filter(|token| !token.is_empty()),
        }
    }
}

/// Raw configuration as read from the file and environment.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Credentials for the storage service. Required unless `dry_run` is set.
    pub credential: Option<Credential>,

    /// Bucket that receives all objects.
    pub bucket: String,

    /// Candidate object sizes, such as `512`, `4K`, `1M` or `2G`.
    pub file_size_list: Vec<ConfigValue>,

    /// Candidate retention values in days. Defaults to `["0"]` when not configured.
    pub delete_after_days: Option<Vec<ConfigValue>>,

    /// Maximum number of concurrent uploads. Zero is treated as one.
    pub workers: usize,

    /// Objects of at least this size are uploaded in parts. Multipart is disabled if unset.
    pub multipart_threshold: Option<ConfigValue>,

    /// Size of each part of a multipart upload.
    pub part_size: ConfigValue,

    /// Maximum number of parts in a multipart upload.
    pub max_parts: Option<usize>,

    /// What to do with uploads that need more than `max_parts` parts.
    pub part_cap_policy: PartCapPolicy,

    /// Seed for size and retention sampling. Random if unset.
    pub seed: Option<u64>,

    /// Write to an in-memory store instead of the configured service.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential: None,
            bucket: String::new(),
            file_size_list: Vec::new(),
            delete_after_days: None,
            workers: 1,
            multipart_threshold: None,
            part_size: ConfigValue::Number(DEFAULT_PART_SIZE),
            max_parts: None,
            part_cap_policy: PartCapPolicy::default(),
            seed: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `LOADGEN__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Checks the configuration and parses all sizes.
    pub fn validate(self) -> Result<RunConfig, ConfigError> {
        let mut errors = Vec::new();

        if self.bucket.is_empty() {
            errors.push(ConfigError::MissingBucket);
        }

        if self.file_size_list.is_empty() {
            errors.push(ConfigError::NoFileSizes);
        }
        let mut file_sizes = Vec::with_capacity(self.file_size_list.len());
        let mut unknown = Vec::new();
        for size in &self.file_size_list {
            match size.to_size() {
                Some(size) => file_sizes.push(size),
                None => unknown.push(size.to_string()),
            }
        }
        if !unknown.is_empty() {
            errors.push(ConfigError::UnknownSizes(unknown));
        }

        let delete_after_days: Vec<String> = match &self.delete_after_days {
            Some(days) => days.iter().map(ToString::to_string).collect(),
            None => vec!["0".to_owned()],
        };
        if delete_after_days.is_empty() {
            errors.push(ConfigError::NoRetention);
        }

        let multipart_threshold = match &self.multipart_threshold {
            Some(threshold) => match threshold.to_size() {
                Some(threshold) => Some(threshold),
                None => {
                    errors.push(ConfigError::UnknownSizes(vec![threshold.to_string()]));
                    None
                }
            },
            None => None,
        };

        let part_size = match self.part_size.to_size() {
            Some(0) => {
                errors.push(ConfigError::ZeroPartSize);
                0
            }
            Some(part_size) => part_size,
            None => {
                errors.push(ConfigError::UnknownSizes(vec![self.part_size.to_string()]));
                0
            }
        };

        if self.max_parts == Some(0) {
            errors.push(ConfigError::ZeroMaxParts);
        }

        let store = if self.dry_run {
            StoreTarget::InMemory
        } else {
            match self.credential {
                Some(credential) => StoreTarget::S3(credential),
                None => {
                    errors.push(ConfigError::MissingCredential);
                    StoreTarget::InMemory
                }
            }
        };

        match errors.len() {
            0 => Ok(RunConfig {
                store,
                bucket: self.bucket,
                file_sizes,
                delete_after_days,
                workers: self.workers.max(1),
                seed: self.seed,
                upload: UploadSettings {
                    multipart_threshold,
                    part_size,
                    max_parts: self.max_parts,
                    part_cap_policy: self.part_cap_policy,
                },
            }),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(errors)),
        }
    }
}

/// Where a run writes its objects.
#[derive(Debug)]
pub enum StoreTarget {
    /// An S3-compatible service.
    S3(Credential),
    /// The in-memory store, for dry runs.
    InMemory,
}

/// Validated settings for a run.
#[derive(Debug)]
pub struct RunConfig {
    /// The store to write to.
    pub store: StoreTarget,
    /// Bucket that receives all objects.
    pub bucket: String,
    /// Candidate object sizes in bytes, never empty.
    pub file_sizes: Vec<u64>,
    /// Candidate retention values, never empty.
    pub delete_after_days: Vec<String>,
    /// Configured number of workers, at least one.
    pub workers: usize,
    /// Sampling seed.
    pub seed: Option<u64>,
    /// How objects are uploaded.
    pub upload: UploadSettings,
}

/// Problems that prevent a run from starting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No bucket was configured.
    #[error("no bucket")]
    MissingBucket,
    /// The list of candidate sizes is empty.
    #[error("no file_size_list")]
    NoFileSizes,
    /// The list of retention values was configured but empty.
    #[error("empty delete_after_days")]
    NoRetention,
    /// Some sizes could not be parsed.
    #[error("unknown size: {0:?}")]
    UnknownSizes(Vec<String>),
    /// The part size is zero.
    #[error("part_size must be greater than zero")]
    ZeroPartSize,
    /// The part limit is zero.
    #[error("max_parts must be greater than zero")]
    ZeroMaxParts,
    /// No credentials were configured for a real run.
    #[error("no credential found")]
    MissingCredential,
    /// More than one problem was found.
    #[error("invalid config: {}", display_all(.0))]
    Multiple(Vec<ConfigError>),
}

fn display_all(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses a human-readable size.
///
/// The suffixes `K`, `M` and `G` multiply by 1024, 1024² and 1024³. Without a suffix, the number
/// is taken as bytes. Returns `None` for anything else, including overflowing values.
pub fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim();
    let (number, unit) = match size.as_bytes().last()? {
        b'K' => (&size[..size.len() - 1], KB),
        b'M' => (&size[..size.len() - 1], MB),
        b'G' => (&size[..size.len() - 1], GB),
        _ => (size, 1),
    };

    number.parse::<u64>().ok()?.checked_mul(unit)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn human_sizes() {
        assert_eq!(parse_size("0"), Some(0));
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("4K"), Some(4096));
        assert_eq!(parse_size("1M"), Some(1_048_576));
        assert_eq!(parse_size("2G"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size(" 3M "), Some(3 * 1_048_576));

        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("M"), None);
        assert_eq!(parse_size("1.5M"), None);
        assert_eq!(parse_size("1MB"), None);
        assert_eq!(parse_size("-1"), None);
        assert_eq!(parse_size("18446744073709551615G"), None);
    }

    fn valid_config() -> Config {
        Config {
            bucket: "bucket".into(),
            file_size_list: vec!["1M".into()],
            dry_run: true,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_in_retention_and_workers() {
        let config = Config {
            workers: 0,
            ..valid_config()
        };
        let run = config.validate().unwrap();

        assert_eq!(run.file_sizes, [1_048_576]);
        assert_eq!(run.delete_after_days, ["0"]);
        assert_eq!(run.workers, 1);
        assert_eq!(run.upload.part_size, DEFAULT_PART_SIZE);
        assert_eq!(run.upload.multipart_threshold, None);
        assert!(matches!(run.store, StoreTarget::InMemory));
    }

    #[test]
    fn empty_lists_are_rejected() {
        let config = Config {
            file_size_list: Vec::new(),
            ..valid_config()
        };
        assert_eq!(config.validate().unwrap_err(), ConfigError::NoFileSizes);

        let config = Config {
            delete_after_days: Some(Vec::new()),
            ..valid_config()
        };
        assert_eq!(config.validate().unwrap_err(), ConfigError::NoRetention);
    }

    #[test]
    fn unknown_sizes_are_collected() {
        let config = Config {
            file_size_list: vec!["1M".into(), "big".into(), "2X".into()],
            ..valid_config()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::UnknownSizes(vec!["big".into(), "2X".into()])
        );
    }

    #[test]
    fn credential_required_unless_dry_run() {
        let config = Config {
            dry_run: false,
            ..valid_config()
        };
        assert_eq!(config.validate().unwrap_err(), ConfigError::MissingCredential);
    }

    #[test]
    fn multiple_errors_are_reported_together() {
        let config = Config {
            bucket: String::new(),
            part_size: "0".into(),
            max_parts: Some(0),
            ..valid_config()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Multiple(vec![
                ConfigError::MissingBucket,
                ConfigError::ZeroPartSize,
                ConfigError::ZeroMaxParts,
            ])
        );
        assert_eq!(
            err.to_string(),
            "invalid config: no bucket, part_size must be greater than zero, \
             max_parts must be greater than zero"
        );
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            credential:
                region: us-east-1
                endpoint: localhost:9000
                access_key_id: id
                access_key_secret: supersecret
            bucket: loadtest
            workers: 4
            file_size_list: [4K, 1M]
            delete_after_days: ["1", "7"]
            multipart_threshold: 8M
            part_size: 5M
            max_parts: 100
            part_cap_policy: fail
            seed: 42
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            let debug = format!("{config:?}");
            assert!(!debug.contains("supersecret"));

            let run = config.validate().unwrap();
            assert_eq!(run.bucket, "loadtest");
            assert_eq!(run.workers, 4);
            assert_eq!(run.file_sizes, [4096, 1_048_576]);
            assert_eq!(run.delete_after_days, ["1", "7"]);
            assert_eq!(run.seed, Some(42));
            assert_eq!(
                run.upload,
                UploadSettings {
                    multipart_threshold: Some(8 * MB),
                    part_size: 5 * MB,
                    max_parts: Some(100),
                    part_cap_policy: PartCapPolicy::Fail,
                }
            );

            let StoreTarget::S3(credential) = run.store else {
                panic!("expected s3 store");
            };
            let store_config = credential.to_store_config();
            assert_eq!(store_config.endpoint, "localhost:9000");
            assert_eq!(store_config.secret_access_key, "supersecret");
            assert_eq!(store_config.session_token, None);

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            bucket: from-yaml
            file_size_list: [1K]
            dry_run: true
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADGEN__BUCKET", "from-env");
            jail.set_env("LOADGEN__WORKERS", "16");
            jail.set_env("LOADGEN__CREDENTIAL__ENDPOINT", "http://localhost:9001");
            jail.set_env("LOADGEN__CREDENTIAL__ACCESS_KEY_ID", "id");
            jail.set_env("LOADGEN__CREDENTIAL__ACCESS_KEY_SECRET", "secret");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.bucket, "from-env");
            assert_eq!(config.workers, 16);
            assert_eq!(config.file_size_list, [ConfigValue::from("1K")]);
            let credential = config.credential.as_ref().unwrap();
            assert_eq!(credential.endpoint, "http://localhost:9001");

            Ok(())
        });
    }

    #[test]
    fn numbers_are_accepted_as_sizes_and_days() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            bucket: loadtest
            file_size_list: [512, 1K]
            delete_after_days: [7, "30"]
            multipart_threshold: 10485760
            part_size: 5242880
            dry_run: true
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(
                config.file_size_list,
                [ConfigValue::Number(512), ConfigValue::from("1K")]
            );

            let run = config.validate().unwrap();
            assert_eq!(run.file_sizes, [512, 1024]);
            assert_eq!(run.delete_after_days, ["7", "30"]);
            assert_eq!(run.upload.multipart_threshold, Some(10 * MB));
            assert_eq!(run.upload.part_size, 5 * MB);

            Ok(())
        });
    }

    #[test]
    fn numeric_env_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADGEN__BUCKET", "loadtest");
            jail.set_env("LOADGEN__DRY_RUN", "true");
            jail.set_env("LOADGEN__FILE_SIZE_LIST", "[2048, 4K]");
            jail.set_env("LOADGEN__DELETE_AFTER_DAYS", "[3]");
            jail.set_env("LOADGEN__PART_SIZE", "8388608");
            jail.set_env("LOADGEN__MULTIPART_THRESHOLD", "16M");

            let run = Config::load(None).unwrap().validate().unwrap();
            assert_eq!(run.file_sizes, [2048, 4096]);
            assert_eq!(run.delete_after_days, ["3"]);
            assert_eq!(run.upload.part_size, 8 * MB);
            assert_eq!(run.upload.multipart_threshold, Some(16 * MB));

            Ok(())
        });
    }
}
