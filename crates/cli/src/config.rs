use std::path::{Path, PathBuf};
use std::time::Duration;

use libvmrac::Endpoint;
use libvmrac::lock::DEFAULT_LOCK_PATH;
use libvmrac::session::RECEIVE_TIMEOUT;
use libvmrac::transport::{EndpointError, RACF_SERVER_ID, RACF_SERVICE_NAME};
use serde::Deserialize;

/// System-wide config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vmrac/config.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "VMRAC_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{}: receive_timeout_secs must be between 1 and {}, got {value}", path.display(), MAX_RECEIVE_TIMEOUT_SECS)]
    InvalidTimeout { path: PathBuf, value: u64 },
}

/// Largest receive timeout the socket option can hold
pub const MAX_RECEIVE_TIMEOUT_SECS: u64 = libc::time_t::MAX as u64;

/// RACF service machine to talk to
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// z/VM guest user id of the RACF server
    pub user_id: String,
    /// IUCV application name
    pub service: String,
    /// Seconds to wait for each message from the server
    pub receive_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            user_id: RACF_SERVER_ID.to_string(),
            service: RACF_SERVICE_NAME.to_string(),
            receive_timeout_secs: RECEIVE_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        Endpoint::new(&self.user_id, &self.service)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

/// Log file settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub path: PathBuf,
    /// Rotate once the file would grow past this many bytes (0 disables)
    pub rotate_bytes: u64,
    /// Rotated files to keep (0 keeps all)
    pub keep_files: u32,
    /// Copy every log line to stderr
    pub console_mirror: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/vmrac.log"),
            rotate_bytes: 1024 * 1024,
            keep_files: 5,
            console_mirror: false,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOCK_PATH)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            lock_path: default_lock_path(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `explicit`, `$VMRAC_CONFIG`, or the system path.
    ///
    /// A missing system config is not an error; a missing explicit one is.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        // a zero SO_RCVTIMEO means "wait forever"
        let secs = config.server.receive_timeout_secs;
        if secs == 0 || secs > MAX_RECEIVE_TIMEOUT_SECS {
            return Err(ConfigError::InvalidTimeout {
                path: path.to_path_buf(),
                value: secs,
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_racf_server() {
        let config = Config::default();
        assert_eq!(config.server.endpoint().unwrap(), Endpoint::default());
        assert_eq!(config.server.receive_timeout(), Duration::from_secs(600));
        assert_eq!(config.lock_path, PathBuf::from("/var/lock/iucv_session.lock"));
        assert_eq!(config.log.path, PathBuf::from("/var/log/vmrac.log"));
        assert_eq!(config.log.rotate_bytes, 1_048_576);
        assert_eq!(config.log.keep_files, 5);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            user_id = "racfvm2"

            [log]
            keep_files = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.server.user_id, "racfvm2");
        assert_eq!(config.server.service, "RISERVER");
        assert_eq!(config.server.endpoint().unwrap().user_id_field(), b"RACFVM2 ");
        assert_eq!(config.log.keep_files, 2);
        assert_eq!(config.log.rotate_bytes, 1_048_576);
        assert_eq!(config.lock_path, PathBuf::from(DEFAULT_LOCK_PATH));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "lock_path = \"/run/vmrac.lock\"\n[server]\nreceive_timeout_secs = 30\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.lock_path, PathBuf::from("/run/vmrac.lock"));
        assert_eq!(config.server.receive_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(Some(missing.as_path())),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[server\n").unwrap();
        assert!(matches!(
            Config::load_from(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_or_huge_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[server]\nreceive_timeout_secs = 0\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidTimeout { value: 0, .. })
        ));

        std::fs::write(&path, format!("[server]\nreceive_timeout_secs = {}\n", u64::MAX)).unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[server]\nreceive_timeout_secs = 1\n").unwrap();
        assert_eq!(
            Config::load_from(&path).unwrap().server.receive_timeout(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn overlong_service_is_rejected() {
        let server = ServerConfig {
            service: "RISERVER2".into(),
            ..ServerConfig::default()
        };
        assert!(server.endpoint().is_err());
    }
}
