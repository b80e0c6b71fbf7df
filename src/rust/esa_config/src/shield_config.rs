use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

/// Regional API host used when the configuration doesn't name one.
pub const DEFAULT_ENDPOINT: &str = "esa.cn-hangzhou.aliyuncs.com";

/// Minutes an enabled shield is left alone before it may be disabled.
pub const DEFAULT_WINDOW_MINUTES: u64 = 15;

/// File name of the shield record, placed beside the configuration file.
pub const DEFAULT_RECORD_FILE: &str = "esa.txt";

/// Transport timeout for a single API call.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Keys that must be present in the configuration file, in the order
/// they are checked.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "access_key_id",
    "access_key_secret",
    "site_id",
    "rule_id",
    "load_threshold",
];

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_window() -> u64 {
    DEFAULT_WINDOW_MINUTES
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

/// Settings for one run of the shield controller.
#[derive(Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Access key ID used to sign API requests.
    pub access_key_id: String,

    /// Access key secret used to sign API requests. Never logged.
    pub access_key_secret: String,

    /// ESA site the WAF rule belongs to. Accepts a JSON number or string.
    #[serde(deserialize_with = "string_or_number")]
    pub site_id: String,

    /// WAF rule to switch on and off. Accepts a JSON number or string.
    #[serde(deserialize_with = "string_or_number")]
    pub rule_id: String,

    /// 1-minute load average above which the shield is raised.
    pub load_threshold: f64,

    /// API host name.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Cooldown window, in minutes.
    #[serde(default = "default_window")]
    pub shield_record_window_minutes: u64,

    /// Where the shield record lives. Relative paths are resolved against
    /// the directory holding the configuration file.
    #[serde(default)]
    pub record_file: Option<PathBuf>,

    /// Log decisions without calling the API or touching the record.
    #[serde(default)]
    pub dry_run: bool,

    /// Transport timeout for API calls, in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("site_id", &self.site_id)
            .field("rule_id", &self.rule_id)
            .field("load_threshold", &self.load_threshold)
            .field("endpoint", &self.endpoint)
            .field("shield_record_window_minutes", &self.shield_record_window_minutes)
            .field("record_file", &self.record_file)
            .field("dry_run", &self.dry_run)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl Config {
    /// Loads and validates the configuration file at `path`. A relative
    /// (or missing) `record_file` is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            error!("Configuration file {} does not exist", path.display());
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            error!("Unable to read {}: {e:?}", path.display());
            ConfigError::CannotRead(path.to_path_buf(), e)
        })?;
        let mut config = Self::load_from_string(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.record_file = Some(config.resolve_record_file(base));
        debug!("Loaded configuration: {config:?}");
        Ok(config)
    }

    /// Parses and validates configuration text. Relative paths are left
    /// untouched.
    pub fn load_from_string(raw: &str) -> Result<Self, ConfigError> {
        let document: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::CannotParse(e.to_string()))?;
        let Some(fields) = document.as_object() else {
            return Err(ConfigError::CannotParse(
                "top level must be a JSON object".to_string(),
            ));
        };
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|k| !fields.contains_key(**k)) {
            error!("Configuration is missing required field: {missing}");
            return Err(ConfigError::MissingField(*missing));
        }

        let config: Self = serde_json::from_value(document)
            .map_err(|e| ConfigError::CannotParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("access_key_id", &self.access_key_id),
            ("access_key_secret", &self.access_key_secret),
            ("site_id", &self.site_id),
            ("rule_id", &self.rule_id),
            ("endpoint", &self.endpoint),
        ];
        for (field, value) in non_empty {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if !self.load_threshold.is_finite() || self.load_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "load_threshold",
                reason: format!("{} is not a usable load average", self.load_threshold),
            });
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_seconds",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Path of the shield record file. Falls back to [`DEFAULT_RECORD_FILE`]
    /// in the working directory when nothing was resolved at load time.
    pub fn record_path(&self) -> PathBuf {
        self.record_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORD_FILE))
    }

    fn resolve_record_file(&self, base: &Path) -> PathBuf {
        match &self.record_file {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => base.join(p),
            None => base.join(DEFAULT_RECORD_FILE),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Unsigned(n) => n.to_string(),
        StringOrNumber::Signed(n) => n.to_string(),
    })
}

/// Configuration failures. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file isn't there.
    #[error("Configuration file {} not found. Create it or pass --config.", .0.display())]
    NotFound(PathBuf),
    /// The file exists but couldn't be read.
    #[error("Unable to read configuration file {}: {}", .0.display(), .1)]
    CannotRead(PathBuf, std::io::Error),
    /// The file isn't valid JSON, or a field has the wrong type.
    #[error("Unable to parse configuration: {0}")]
    CannotParse(String),
    /// A required key is absent.
    #[error("Configuration is missing required field: {0}")]
    MissingField(&'static str),
    /// A key is present but its value is unusable.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    const MINIMAL: &str = r#"{
        "access_key_id": "LTAI-test",
        "access_key_secret": "secret",
        "site_id": 123456789,
        "rule_id": "20000001",
        "load_threshold": 80
    }"#;

    #[test]
    fn defaults_are_applied() {
        let config = Config::load_from_string(MINIMAL).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.shield_record_window_minutes, 15);
        assert_eq!(config.request_timeout_seconds, 30);
        assert!(!config.dry_run);
        assert!(config.record_file.is_none());
        assert_eq!(config.load_threshold, 80.0);
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let config = Config::load_from_string(MINIMAL).unwrap();
        assert_eq!(config.site_id, "123456789");
        assert_eq!(config.rule_id, "20000001");
    }

    #[test]
    fn reports_first_missing_field() {
        let raw = r#"{ "access_key_id": "a", "access_key_secret": "b", "load_threshold": 2.0 }"#;
        match Config::load_from_string(raw) {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "site_id"),
            other => panic!("expected a missing field, got {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_threshold() {
        let raw = MINIMAL.replace("\"load_threshold\": 80", "\"load_threshold\": -1");
        assert!(matches!(
            Config::load_from_string(&raw),
            Err(ConfigError::InvalidValue { field: "load_threshold", .. })
        ));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            Config::load_from_string("[1, 2, 3]"),
            Err(ConfigError::CannotParse(_))
        ));
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let raw = MINIMAL.replace("\"load_threshold\": 80", "\"load_threshold\": \"high\"");
        assert!(matches!(
            Config::load_from_string(&raw),
            Err(ConfigError::CannotParse(_))
        ));
    }

    #[test]
    fn secret_is_not_in_debug_output() {
        let config = Config::load_from_string(MINIMAL).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn record_file_resolves_beside_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esa_config.json");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.record_path(), dir.path().join(DEFAULT_RECORD_FILE));
    }

    #[test]
    fn relative_record_file_is_joined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esa_config.json");
        let raw = MINIMAL.replace(
            "\"load_threshold\": 80",
            "\"load_threshold\": 80, \"record_file\": \"state/shield.txt\"",
        );
        std::fs::write(&path, raw).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.record_path(), dir.path().join("state/shield.txt"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }
}
