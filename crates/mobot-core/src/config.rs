//! Persistent configuration for mobot.
//!
//! Settings live in `~/.mobot/config.json`. Every field has a default, so a
//! missing or partial file is fine; environment variables are applied on top
//! of whatever the file provides.
//!
//! | Variable         | Effect                                        |
//! |------------------|-----------------------------------------------|
//! | `ANDROID_HOME`   | `adb_path = $ANDROID_HOME/platform-tools/adb` |
//! | `GO_IOS_PATH`    | `go_ios_path`                                 |
//! | `MOBOT_WDA_HOST` | `wda_host`                                    |
//! | `MOBOT_WDA_PORT` | `wda_port`                                    |
//!
//! # Example
//!
//! ```no_run
//! use mobot_core::config::MobotConfig;
//!
//! let config = MobotConfig::load();
//! println!("adb: {}", config.adb_path.display());
//! println!("WebDriverAgent: {}", config.wda_url());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CONFIG_DIR: &str = ".mobot";
const CONFIG_FILENAME: &str = "config.json";

/// Runtime configuration shared by every driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobotConfig {
    /// Path to the `adb` executable.
    pub adb_path: PathBuf,
    /// Path to the go-ios `ios` executable.
    pub go_ios_path: PathBuf,
    /// Host where WebDriverAgent is reachable.
    pub wda_host: String,
    /// Port WebDriverAgent listens on (forwarded for physical devices).
    pub wda_port: u16,
    /// Port of the go-ios tunnel agent (iOS 17 and later).
    pub tunnel_port: u16,
    /// Upper bound for a single subprocess call, in seconds.
    pub command_timeout_secs: u64,
    /// Delay between stopping a capture and retrieving the file, in milliseconds.
    pub recording_settle_ms: u64,
    /// Delay after each D-pad press before re-reading focus, in milliseconds.
    pub dpad_settle_ms: u64,
    /// Maximum D-pad presses for one navigation request.
    pub max_navigation_steps: u32,
    /// Maximum UiAutomator dump attempts while the bridge is warming up.
    pub max_dump_attempts: u32,
    /// Host directory where finished recordings are written.
    pub recordings_dir: PathBuf,
}

impl Default for MobotConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            go_ios_path: PathBuf::from("ios"),
            wda_host: "localhost".to_string(),
            wda_port: 8100,
            tunnel_port: 60105,
            command_timeout_secs: 30,
            recording_settle_ms: 2000,
            dpad_settle_ms: 300,
            max_navigation_steps: 50,
            max_dump_attempts: 10,
            recordings_dir: std::env::temp_dir(),
        }
    }
}

/// Returns the mobot state directory (`~/.mobot`).
///
/// Falls back to a relative `.mobot` when no home directory is known.
pub fn mobot_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

impl MobotConfig {
    /// Load config from `~/.mobot/config.json` and apply environment
    /// overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&mobot_dir().join(CONFIG_FILENAME));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a specific file without environment overrides.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file, using defaults");
                return Self::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            Self::default()
        })
    }

    /// Save config to `~/.mobot/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let dir = mobot_dir();
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(dir.join(CONFIG_FILENAME), json)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup("ANDROID_HOME").filter(|v| !v.is_empty()) {
            self.adb_path = Path::new(&home).join("platform-tools").join("adb");
        }
        if let Some(path) = lookup("GO_IOS_PATH").filter(|v| !v.is_empty()) {
            self.go_ios_path = PathBuf::from(path);
        }
        if let Some(host) = lookup("MOBOT_WDA_HOST").filter(|v| !v.is_empty()) {
            self.wda_host = host;
        }
        if let Some(port) = lookup("MOBOT_WDA_PORT") {
            match port.parse() {
                Ok(port) => self.wda_port = port,
                Err(_) => warn!(value = %port, "ignoring invalid MOBOT_WDA_PORT"),
            }
        }
    }

    /// Base URL of the WebDriverAgent HTTP server.
    pub fn wda_url(&self) -> String {
        format!("http://{}:{}", self.wda_host, self.wda_port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn recording_settle(&self) -> Duration {
        Duration::from_millis(self.recording_settle_ms)
    }

    pub fn dpad_settle(&self) -> Duration {
        Duration::from_millis(self.dpad_settle_ms)
    }
}
