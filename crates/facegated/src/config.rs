use facegate_core::{LengthPolicy, ThresholdError, Thresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/facegate.toml";
const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {raw:?}")]
    Invalid { key: &'static str, raw: String },
    #[error("descriptor_dim must be positive")]
    DescriptorDim,
    #[error(transparent)]
    Thresholds(#[from] ThresholdError),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

impl BusKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// Optional on-disk layer, overridden field by field by the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    db_path: Option<PathBuf>,
    bus: Option<BusKind>,
    history_limit: Option<usize>,
    log_limit: Option<usize>,
    descriptor_dim: Option<usize>,
    thresholds: Thresholds,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub bus: BusKind,
    /// Match, liveness and duplicate-detection thresholds.
    pub thresholds: Thresholds,
    /// Rows returned by a per-employee history query.
    pub history_limit: usize,
    /// Default row cap for the organisation-wide attendance log.
    pub log_limit: usize,
    /// Required descriptor length at the D-Bus boundary. `None` accepts any.
    pub descriptor_dim: Option<usize>,
}

impl Config {
    /// Load `FACEGATE_CONFIG` (if present), then apply environment overrides.
    ///
    /// A variable that is set but does not parse is an error, never a
    /// silent fallback to the default.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = var("FACEGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let file = if path.exists() {
            read_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            FileConfig::default()
        };

        let config = Self::from_vars(file, &var)?;
        config.thresholds.validate()?;
        if config.descriptor_dim == Some(0) {
            return Err(ConfigError::DescriptorDim);
        }
        Ok(config)
    }

    fn from_vars(
        file: FileConfig,
        var: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("attendance.db"));

        let bus = match var("FACEGATE_BUS") {
            Some(raw) => BusKind::parse(&raw).ok_or(ConfigError::Invalid {
                key: "FACEGATE_BUS",
                raw,
            })?,
            None => file.bus.unwrap_or_default(),
        };

        let length_policy = match var("FACEGATE_LENGTH_POLICY") {
            Some(raw) => LengthPolicy::parse(&raw).ok_or(ConfigError::Invalid {
                key: "FACEGATE_LENGTH_POLICY",
                raw,
            })?,
            None => file.thresholds.length_policy,
        };

        let thresholds = Thresholds {
            face_distance: env_parse(var, "FACE_DISTANCE_THRESHOLD", file.thresholds.face_distance)?,
            min_liveness: env_parse(var, "MIN_LIVENESS_THRESHOLD", file.thresholds.min_liveness)?,
            duplicate_distance: env_parse(
                var,
                "DUPLICATE_FACE_THRESHOLD",
                file.thresholds.duplicate_distance,
            )?,
            length_policy,
        };

        let descriptor_dim = match var("FACEGATE_DESCRIPTOR_DIM") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "FACEGATE_DESCRIPTOR_DIM",
                raw,
            })?),
            None => file.descriptor_dim,
        };

        Ok(Self {
            db_path,
            bus,
            thresholds,
            history_limit: env_parse(
                var,
                "FACEGATE_HISTORY_LIMIT",
                file.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            )?,
            log_limit: env_parse(
                var,
                "FACEGATE_LOG_LIMIT",
                file.log_limit.unwrap_or(DEFAULT_LOG_LIMIT),
            )?,
            descriptor_dim,
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

/// `default` when `key` is unset, the parsed value when it is set.
fn env_parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, raw }),
        None => Ok(default),
    }
}
