use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::transport::ClientInfo;

const DEFAULT_STATE_DIR: &str = ".local/state/wagate";

#[derive(Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding one credential file per identity.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// QR handshake budget and transport connect timeout.
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    /// How long a shown QR code may wait to be scanned.
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_reconnect_cooldown_secs")]
    pub reconnect_cooldown_secs: u64,
    #[serde(default = "default_send_jitter_min_ms")]
    pub send_jitter_min_ms: u64,
    #[serde(default = "default_send_jitter_max_ms")]
    pub send_jitter_max_ms: u64,
    #[serde(default)]
    pub client: ClientInfo,
}

impl GatewayConfig {
    /// Load `$WAGATE_CONFIG` or the default config file, falling back to
    /// defaults when neither exists.
    pub fn load() -> Result<Self> {
        let config_path = match std::env::var("WAGATE_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_path(),
        };
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.login_timeout_secs == 0 {
            bail!("login_timeout_secs must be > 0");
        }
        if self.scan_timeout_secs == 0 {
            bail!("scan_timeout_secs must be > 0");
        }
        if self.send_jitter_min_ms > self.send_jitter_max_ms {
            bail!(
                "send_jitter_min_ms ({}) exceeds send_jitter_max_ms ({})",
                self.send_jitter_min_ms,
                self.send_jitter_max_ms
            );
        }
        Ok(())
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn send_jitter(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.send_jitter_min_ms),
            Duration::from_millis(self.send_jitter_max_ms),
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            login_timeout_secs: default_login_timeout_secs(),
            scan_timeout_secs: default_scan_timeout_secs(),
            reconnect_cooldown_secs: default_reconnect_cooldown_secs(),
            send_jitter_min_ms: default_send_jitter_min_ms(),
            send_jitter_max_ms: default_send_jitter_max_ms(),
            client: ClientInfo::default(),
        }
    }
}

/// Priority: `$WAGATE_STATE_DIR`, then `~/.local/state/wagate`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WAGATE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(DEFAULT_STATE_DIR),
        Err(_) => PathBuf::from("/tmp/wagate"),
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("wagate")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("wagate")
    } else {
        PathBuf::from("/tmp/wagate")
    }
}

fn default_store_path() -> PathBuf {
    default_state_dir().join("sessions")
}

fn default_login_timeout_secs() -> u64 {
    5
}

fn default_scan_timeout_secs() -> u64 {
    60
}

fn default_reconnect_cooldown_secs() -> u64 {
    30
}

fn default_send_jitter_min_ms() -> u64 {
    1000
}

fn default_send_jitter_max_ms() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ClientVersion;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_service_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.login_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_cooldown(), Duration::from_secs(30));
        assert_eq!(
            config.send_jitter(),
            (Duration::from_millis(1000), Duration::from_millis(3000))
        );
        assert!(config.store_path.ends_with("sessions"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/var/lib/wagate"
reconnect_cooldown_secs = 10

[client]
long_name = "Acme Gateway"

[client.version]
major = 2
minor = 2126
build = 14
"#,
        )
        .unwrap();

        let config = GatewayConfig::load_from(&path).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/var/lib/wagate"));
        assert_eq!(config.reconnect_cooldown_secs, 10);
        assert_eq!(config.login_timeout_secs, 5);
        assert_eq!(config.client.long_name, "Acme Gateway");
        assert_eq!(config.client.short_name, "wagate");
        assert_eq!(
            config.client.version,
            Some(ClientVersion {
                major: 2,
                minor: 2126,
                build: 14
            })
        );
    }

    #[test]
    fn inverted_jitter_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "send_jitter_min_ms = 500\nsend_jitter_max_ms = 100\n").unwrap();
        let err = GatewayConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("send_jitter_min_ms"));
    }

    #[test]
    fn zero_login_timeout_is_rejected() {
        let config = GatewayConfig {
            login_timeout_secs: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
