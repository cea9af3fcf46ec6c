//! Per-instance JSON configuration (§6). Unrecognized fields are ignored;
//! a missing file gets the defaults written back out, mirroring the
//! teacher's launcher `Config::load`/`save` pair but in JSON instead of
//! TOML, since the operator CLI hands each instance its own config file
//! rather than a single XDG-located one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    ArmoredCore5,
    ArmoredCoreVerdictDay,
}

impl Default for GameType {
    fn default() -> Self {
        Self::ArmoredCore5
    }
}

fn default_login_port() -> u16 {
    50011
}

fn default_auth_port() -> u16 {
    50008
}

fn default_game_port() -> u16 {
    50030
}

fn default_client_timeout() -> u64 {
    30
}

/// §3: "a configured minimum and maximum gate authentication" — the
/// accepted client build range is per-instance config, not a compiled-in
/// constant, so an operator can pin a hosted instance to an exact client
/// build by setting `min_app_version == max_app_version`.
fn default_min_app_version() -> u64 {
    0x5644_0000_0100_0000
}

fn default_max_app_version() -> u64 {
    0x5644_0000_01FF_FFFF
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub game_type: GameType,
    pub public_hostname: String,
    pub private_hostname: String,
    pub local: bool,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub login_port: u16,
    pub auth_port: u16,
    pub game_port: u16,
    pub login_client_timeout: u64,
    pub auth_client_timeout: u64,
    pub min_app_version: u64,
    pub max_app_version: u64,
    pub log_info: bool,
    pub log_warnings: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game_type: GameType::default(),
            public_hostname: String::from("127.0.0.1"),
            private_hostname: String::from("127.0.0.1"),
            local: true,
            private_key_path: PathBuf::from("private_key.pem"),
            public_key_path: PathBuf::from("public_key.pem"),
            login_port: default_login_port(),
            auth_port: default_auth_port(),
            game_port: default_game_port(),
            login_client_timeout: default_client_timeout(),
            auth_client_timeout: default_client_timeout(),
            min_app_version: default_min_app_version(),
            max_app_version: default_max_app_version(),
            log_info: true,
            log_warnings: true,
        }
    }
}

impl Config {
    /// Loads `path`, writing and returning the defaults if it doesn't
    /// exist yet. Fields the file doesn't recognize are ignored by serde's
    /// default deny-unknown-fields-off behavior; fields the file omits
    /// fall back to `Config::default()`'s values via `#[serde(default)]`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config at {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("writing config at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir();
        let path = dir.join("instance.json");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.login_port, 50011);
        assert!(path.exists());
    }

    #[test]
    fn unrecognized_fields_are_ignored() {
        let dir = tempdir();
        let path = dir.join("instance.json");
        fs::write(&path, r#"{"login_port": 9999, "something_new": true}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.login_port, 9999);
        assert_eq!(config.auth_port, 50008);
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut dir = std::env::temp_dir();
        dir.push(format!("ac5-common-config-test-{}-{}", std::process::id(), n));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
