use crate::worker::RunConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from keepalive.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub probe: ProbeConfig,
    pub status: StatusConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// File to read from. Usually given on the command line instead.
    pub target: Option<PathBuf>,
    pub interval_secs: u64,
    /// 0 means run until stopped.
    pub max_duration_mins: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StatusConfig {
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: None,
            interval_secs: 60,
            max_duration_mins: 0,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8421,
        }
    }
}

impl KeepaliveConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Timing parameters for the worker.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.probe.interval_secs, self.probe.max_duration_mins)
    }
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_original_tool() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.probe.interval_secs, 60);
        assert_eq!(config.probe.max_duration_mins, 0);
        assert!(config.probe.target.is_none());
        assert!(config.status.file.is_none());
        assert_eq!(config.serve.bind, "127.0.0.1");
        assert_eq!(config.serve.port, 8421);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = KeepaliveConfig::load(&dir.path().join("keepalive.toml")).unwrap();
        assert_eq!(config.run_config(), RunConfig::new(60, 0));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.toml");
        std::fs::write(
            &path,
            "[probe]\ntarget = \"/mnt/backup/.keepalive\"\ninterval_secs = 30\n",
        )
        .unwrap();

        let config = KeepaliveConfig::load(&path).unwrap();
        assert_eq!(
            config.probe.target,
            Some(PathBuf::from("/mnt/backup/.keepalive"))
        );
        assert_eq!(config.run_config(), RunConfig::new(30, 0));
        assert_eq!(config.serve.port, 8421);
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.toml");
        std::fs::write(
            &path,
            r#"
[probe]
interval_secs = 120
max_duration_mins = 90

[status]
file = "/run/keepalive.status"

[serve]
bind = "0.0.0.0"
port = 9000
"#,
        )
        .unwrap();

        let config = KeepaliveConfig::load(&path).unwrap();
        assert_eq!(config.run_config(), RunConfig::new(120, 90));
        assert_eq!(
            config.status.file,
            Some(PathBuf::from("/run/keepalive.status"))
        );
        assert_eq!(config.serve.bind, "0.0.0.0");
        assert_eq!(config.serve.port, 9000);
    }

    #[test]
    fn test_negative_duration_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.toml");
        std::fs::write(&path, "[probe]\nmax_duration_mins = -5\n").unwrap();

        let err = KeepaliveConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keepalive.toml");
        std::fs::write(&path, "[probe\ninterval_secs = ").unwrap();

        assert!(matches!(
            KeepaliveConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
