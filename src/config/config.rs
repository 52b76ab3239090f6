use compio::fs;
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use std::{
    borrow::Cow,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::ext::BestEffortPathExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/spm.yaml";
const DEFAULT_LEDGER_DIR: &str = "/var/lib/spm";
const DEFAULT_DESTINATION: &str = "/";

const LEDGER_DIR_KEY: &str = "ledger_dir";
const DESTINATION_KEY: &str = "destination";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where install records are kept
    pub ledger_dir: PathBuf,
    /// Install destination used when none is given on the command line
    pub destination: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_dir: PathBuf::from(DEFAULT_LEDGER_DIR),
            destination: PathBuf::from(DEFAULT_DESTINATION),
        }
    }
}

impl Config {
    /// Reads the config file at `path`, or the system-wide one when `None`.
    /// Only an explicitly requested file has to exist.
    pub async fn read(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => match Self::from_path(Path::new(DEFAULT_CONFIG_PATH)).await {
                Err(ConfigError::ReadError { source, .. })
                    if source.kind() == ErrorKind::NotFound =>
                {
                    info!("No config file at {DEFAULT_CONFIG_PATH}, using defaults");
                    Ok(Self::default())
                }
                result => result,
            },
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, ConfigError> {
        debug!("Opening config file: {}", path.best_effort_path_display());
        let bytes = fs::read(path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;
        debug!("Successfully read config file: {} bytes", bytes.len());

        let contents = String::from_utf8(bytes).context(EncodingSnafu {
            file_path: path.best_effort_path_display(),
        })?;
        contents.as_str().try_into()
    }

    fn string_value<'a>(
        top_level: &'a LinkedHashMap<Yaml, Yaml>,
        key: &'static str,
    ) -> Result<Option<&'a str>, ConfigError> {
        match top_level.get(&Yaml::Value(Scalar::String(Cow::Borrowed(key)))) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .context(NotAStringSnafu { key }),
        }
    }
}

impl TryFrom<&str> for Config {
    type Error = ConfigError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let Some(document) = documents.first() else {
            return Ok(Self::default());
        };

        let top_level = document.as_mapping().context(TopLevelNotMapSnafu)?;

        for key in top_level.keys() {
            let known = matches!(key.as_str(), Some(LEDGER_DIR_KEY) | Some(DESTINATION_KEY));
            if !known {
                warn!("Ignoring unknown config key: {:?}", key);
            }
        }

        let mut config = Self::default();
        if let Some(ledger_dir) = Self::string_value(top_level, LEDGER_DIR_KEY)? {
            config.ledger_dir = PathBuf::from(ledger_dir);
        }
        if let Some(destination) = Self::string_value(top_level, DESTINATION_KEY)? {
            config.destination = PathBuf::from(destination);
        }

        Ok(config)
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Config file {} is not valid UTF-8", file_path))]
    EncodingError {
        file_path: String,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Config key '{}' should be a string", key))]
    NotAString { key: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn config_returns_error_on_nonexistent_explicit_file() {
        let result = Config::read(Some(Path::new("nonexistent.yaml"))).await;
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[compio::test]
    async fn config_reads_file_from_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("spm.yaml");
        std::fs::write(&path, "ledger_dir: /tmp/ledger\n").expect("Failed to write config");

        let config = Config::read(Some(&path)).await.expect("Failed to read config");

        assert_eq!(config.ledger_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.destination, PathBuf::from(DEFAULT_DESTINATION));
    }

    #[test]
    fn config_parses_both_keys() {
        let yaml = "ledger_dir: /srv/spm/ledger\ndestination: /srv/root\n";
        let config: Config = yaml.try_into().expect("Valid config");
        assert_eq!(
            config,
            Config {
                ledger_dir: PathBuf::from("/srv/spm/ledger"),
                destination: PathBuf::from("/srv/root"),
            }
        );
    }

    #[test]
    fn config_of_empty_file_is_default() {
        let config: Config = "".try_into().expect("Empty config is valid");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_returns_error_on_invalid_yaml() {
        let result: Result<Config, _> = "invalid: yaml: content: [unclosed".try_into();
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn config_returns_error_when_top_level_is_not_map() {
        let result: Result<Config, _> = "- item1\n- item2".try_into();
        assert!(matches!(result, Err(ConfigError::TopLevelNotMap)));
    }

    #[test]
    fn config_returns_error_when_value_is_not_string() {
        let result: Result<Config, _> = "ledger_dir:\n  - a\n  - b".try_into();
        assert!(matches!(
            result,
            Err(ConfigError::NotAString {
                key: LEDGER_DIR_KEY
            })
        ));
    }

    #[test]
    fn config_ignores_unknown_keys() {
        let config: Config = "color: always\ndestination: /mnt".try_into().expect("Valid");
        assert_eq!(config.destination, PathBuf::from("/mnt"));
        assert_eq!(config.ledger_dir, PathBuf::from(DEFAULT_LEDGER_DIR));
    }
}
