//! Connector configuration
//!
//! Loaded once at startup from the environment (after reading `.env` with
//! `dotenvy`), or from a local JSON file with the same sections for running
//! outside the deployed environment.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::sink::PartitionKey;
use crate::transis::framer;

pub const DEFAULT_TRANSIS_PORT: u16 = 80;
/// Transis goes quiet without closing the connection; 20 minutes of silence is a stall
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 20 * 60;
pub const DEFAULT_MAX_RECONNECTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_KINESIS_REGION: &str = "ap-southeast-2";
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Per-call record limit of the sink
pub const MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_PARTITION_KEY: &str = "region";
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2000;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub audit: AuditConfig,
}

/// Transis connection details
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    /// Whole-request timeout for one-shot REST calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Kinesis stream details
#[derive(Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub stream_name: String,
    /// Endpoint override, e.g. a local Kinesis emulator
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub partition_key: PartitionKey,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// DI framework database details
#[derive(Clone, Deserialize)]
pub struct AuditConfig {
    pub database_url: String,
    pub schema_name: String,
    pub job_name: String,
}

fn default_port() -> u16 {
    DEFAULT_TRANSIS_PORT
}

fn default_stream_timeout_secs() -> u64 {
    DEFAULT_STREAM_TIMEOUT_SECS
}

fn default_max_reconnects() -> u32 {
    DEFAULT_MAX_RECONNECTS
}

fn default_max_document_bytes() -> usize {
    framer::DEFAULT_MAX_DOCUMENT_BYTES
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_region() -> String {
    DEFAULT_KINESIS_REGION.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

impl Config {
    /// Load from `.env` and the process environment
    pub fn load() -> Result<Self> {
        // A missing .env file is normal in deployed environments
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a local JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IngestError::config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| IngestError::config(format!("invalid {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from any key lookup, normally the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);
        let config = Self {
            source: SourceConfig::read(&env)?,
            sink: SinkConfig::read(&env)?,
            audit: AuditConfig::read(&env)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.sink.validate()?;
        self.audit.validate()
    }
}

impl SourceConfig {
    /// Load only the Transis section, for commands that never publish
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self::read(&Env(&lookup))?;
        config.validate()?;
        Ok(config)
    }

    fn read<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<Self> {
        Ok(Self {
            host: env.required("TRANSIS_HOST")?,
            port: env.parse("TRANSIS_PORT", DEFAULT_TRANSIS_PORT)?,
            username: env.required("TRANSIS_USERNAME")?,
            password: env.required("TRANSIS_PASSWORD")?,
            stream_timeout_secs: env.parse("TRANSIS_STREAM_TIMEOUT_SECS", DEFAULT_STREAM_TIMEOUT_SECS)?,
            max_reconnects: env.parse("TRANSIS_MAX_RECONNECTS", DEFAULT_MAX_RECONNECTS)?,
            max_document_bytes: env
                .parse("TRANSIS_MAX_DOCUMENT_BYTES", framer::DEFAULT_MAX_DOCUMENT_BYTES)?,
            request_timeout_secs: env
                .parse("TRANSIS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        })
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(IngestError::config("TRANSIS_HOST must not be empty"));
        }
        if self.port == 0 {
            return Err(IngestError::config("TRANSIS_PORT must be greater than 0"));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(IngestError::config("Transis credentials must not be empty"));
        }
        if self.stream_timeout_secs == 0 {
            return Err(IngestError::config("TRANSIS_STREAM_TIMEOUT_SECS must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(IngestError::config("TRANSIS_REQUEST_TIMEOUT_SECS must be greater than 0"));
        }
        if self.max_document_bytes == 0 {
            return Err(IngestError::config("TRANSIS_MAX_DOCUMENT_BYTES must be greater than 0"));
        }
        Ok(())
    }
}

impl SinkConfig {
    fn read<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<Self> {
        let partition_key = if env.parse("KINESIS_PARTITION_BY_REGION", false)? {
            PartitionKey::PerRecordRegion
        } else {
            PartitionKey::Fixed(env.or("KINESIS_PARTITION_KEY", DEFAULT_PARTITION_KEY))
        };

        Ok(Self {
            region: env.or("KINESIS_REGION_NAME", DEFAULT_KINESIS_REGION),
            stream_name: env.required("KINESIS_STREAM_NAME")?,
            endpoint: env.optional("KINESIS_ENDPOINT"),
            access_key_id: env.optional("AWS_ACCESS_KEY_ID"),
            secret_access_key: env.optional("AWS_SECRET_ACCESS_KEY"),
            batch_size: env.parse("KINESIS_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            partition_key,
            retry_backoff_ms: env.parse("KINESIS_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS)?,
        })
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.stream_name.trim().is_empty() {
            return Err(IngestError::config("KINESIS_STREAM_NAME must not be empty"));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(IngestError::config(format!(
                "KINESIS_BATCH_SIZE must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if let PartitionKey::Fixed(key) = &self.partition_key {
            if key.is_empty() {
                return Err(IngestError::config("KINESIS_PARTITION_KEY must not be empty"));
            }
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(IngestError::config(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together",
            ));
        }
        Ok(())
    }
}

impl AuditConfig {
    fn read<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<Self> {
        Ok(Self {
            database_url: env.required("DI_FRAMEWORK_DATABASE_URL")?,
            schema_name: env.required("DI_FRAMEWORK_SCHEMA_NAME")?,
            job_name: env.required("DI_FRAMEWORK_JOB_NAME")?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(IngestError::config("DI_FRAMEWORK_DATABASE_URL must not be empty"));
        }
        if !is_plain_identifier(&self.schema_name) {
            return Err(IngestError::config(format!(
                "DI_FRAMEWORK_SCHEMA_NAME '{}' is not a plain SQL identifier",
                self.schema_name
            )));
        }
        if self.job_name.trim().is_empty() {
            return Err(IngestError::config("DI_FRAMEWORK_JOB_NAME must not be empty"));
        }
        Ok(())
    }
}

/// ASCII letters, digits and underscores, not starting with a digit
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| IngestError::config(format!("{key} is not set")))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| IngestError::config(format!("{key}='{raw}' is invalid: {e}"))),
            None => Ok(default),
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .field("max_reconnects", &self.max_reconnects)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("region", &self.region)
            .field("stream_name", &self.stream_name)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| REDACTED))
            .field("batch_size", &self.batch_size)
            .field("partition_key", &self.partition_key)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("database_url", &REDACTED)
            .field("schema_name", &self.schema_name)
            .field("job_name", &self.job_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TRANSIS_HOST", "transis.example"),
            ("TRANSIS_USERNAME", "reader"),
            ("TRANSIS_PASSWORD", "hunter2"),
            ("KINESIS_STREAM_NAME", "scats-detector-counts"),
            ("DI_FRAMEWORK_DATABASE_URL", "postgres://di:secret@db/postgres"),
            ("DI_FRAMEWORK_SCHEMA_NAME", "di_framework"),
            ("DI_FRAMEWORK_JOB_NAME", "transis_detector_counts"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.source.port, DEFAULT_TRANSIS_PORT);
        assert_eq!(config.source.stream_timeout(), Duration::from_secs(1200));
        assert_eq!(config.source.max_reconnects, 3);
        assert_eq!(config.source.max_document_bytes, framer::DEFAULT_MAX_DOCUMENT_BYTES);
        assert_eq!(config.sink.region, "ap-southeast-2");
        assert_eq!(config.sink.batch_size, 10);
        assert_eq!(config.sink.partition_key, PartitionKey::Fixed("region".to_string()));
        assert_eq!(config.sink.retry_backoff(), Duration::from_secs(2));
        assert_eq!(config.source.base_url(), "http://transis.example:80");
    }

    #[test]
    fn test_overrides() {
        let mut env = base_env();
        env.insert("TRANSIS_PORT", "8080");
        env.insert("TRANSIS_MAX_RECONNECTS", "0");
        env.insert("KINESIS_BATCH_SIZE", "500");
        env.insert("KINESIS_PARTITION_BY_REGION", "true");
        let config = load(&env).unwrap();
        assert_eq!(config.source.port, 8080);
        assert_eq!(config.source.max_reconnects, 0);
        assert_eq!(config.sink.batch_size, 500);
        assert_eq!(config.sink.partition_key, PartitionKey::PerRecordRegion);
    }

    #[test]
    fn test_source_section_alone() {
        let env = HashMap::from([
            ("TRANSIS_HOST", "transis.example"),
            ("TRANSIS_USERNAME", "reader"),
            ("TRANSIS_PASSWORD", "hunter2"),
        ]);
        let source = SourceConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(source.host, "transis.example");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_missing_required_variable() {
        let mut env = base_env();
        env.remove("TRANSIS_PASSWORD");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("TRANSIS_PASSWORD is not set"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            ("TRANSIS_PORT", "0"),
            ("TRANSIS_PORT", "http"),
            ("TRANSIS_STREAM_TIMEOUT_SECS", "0"),
            ("KINESIS_BATCH_SIZE", "0"),
            ("KINESIS_BATCH_SIZE", "501"),
            ("DI_FRAMEWORK_SCHEMA_NAME", "di; DROP TABLE jobs"),
            ("DI_FRAMEWORK_JOB_NAME", "  "),
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
        ];
        for (key, value) in cases {
            let mut env = base_env();
            env.insert(key, value);
            assert!(
                matches!(load(&env), Err(IngestError::Config(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_job_name_is_free_text() {
        let mut env = base_env();
        env.insert("DI_FRAMEWORK_JOB_NAME", "scats-transis-kinesis");
        assert_eq!(load(&env).unwrap().audit.job_name, "scats-transis-kinesis");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut env = base_env();
        env.insert("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE");
        env.insert("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI");
        let rendered = format!("{:?}", load(&env).unwrap());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("wJalrXUtnFEMI"));
        assert!(!rendered.contains("secret@db"));
        assert!(rendered.contains("transis.example"));
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "source": {{"host": "10.0.0.5", "port": 8081, "username": "u", "password": "p"}},
                "sink": {{"stream_name": "counts", "partition_key": "per_record_region"}},
                "audit": {{"database_url": "postgres://localhost/postgres",
                          "schema_name": "di", "job_name": "local_job"}}
            }}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.source.port, 8081);
        assert_eq!(config.source.max_reconnects, DEFAULT_MAX_RECONNECTS);
        assert_eq!(config.sink.partition_key, PartitionKey::PerRecordRegion);
        assert_eq!(config.sink.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_json_partition_key_forms() {
        let fixed: PartitionKey = serde_json::from_str(r#"{"fixed": "region"}"#).unwrap();
        assert_eq!(fixed, PartitionKey::Fixed("region".to_string()));
        assert!(serde_json::from_str::<PartitionKey>(r#""region""#).is_err());
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("di_framework"));
        assert!(is_plain_identifier("_x1"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("9lives"));
        assert!(!is_plain_identifier("a.b"));
    }
}
