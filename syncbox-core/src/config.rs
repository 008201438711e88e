//! Daemon configuration, loaded once at startup and read-only afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::ignore::IgnoreFilter;
use crate::paths::syncbox_root;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watched root. Relative values are resolved against the current directory.
    pub sharing_path: PathBuf,
    pub cmd_address: String,
    pub cmd_port: u16,
    pub api_suffix: String,
    pub server_address: String,
    pub user: String,
    pub pass: String,
    /// Upper bound, in seconds, on one iteration of the serving loop.
    pub timeout_listener_sock: f64,
    pub backlog_listener_sock: u32,
    /// Extra ignore rules appended after the defaults.
    pub ignore_patterns: Vec<String>,
    /// Where daemon-private state (the outbox) lives. Defaults to `~/.syncbox`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    pub outbox_retry_secs: u64,
    /// Seconds one server request may take before it counts as unreachable.
    pub timeout_remote_request: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sharing_path: PathBuf::from("./sharing_folder"),
            cmd_address: "localhost".to_string(),
            cmd_port: 50001,
            api_suffix: "/API/V1/".to_string(),
            server_address: "http://localhost:5000".to_string(),
            user: "default_user".to_string(),
            pass: "default_pass".to_string(),
            timeout_listener_sock: 0.5,
            backlog_listener_sock: 5,
            ignore_patterns: Vec::new(),
            state_dir: None,
            outbox_retry_secs: 30,
            timeout_remote_request: 5.0,
        }
    }
}

impl Config {
    /// Load the config at `path`, falling back to defaults when it is missing.
    ///
    /// `.yaml` / `.yml` files are parsed as YAML, everything else as JSON.
    pub fn load_at(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if is_yaml {
                serde_yaml::from_str(&contents).map_err(|source| CoreError::ConfigYaml {
                    path: path.to_path_buf(),
                    source,
                })?
            } else {
                serde_json::from_str(&contents).map_err(|source| CoreError::ConfigJson {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        } else {
            Config::default()
        };
        config.sharing_path = absolutize(&config.sharing_path)?;
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_listener_sock)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_POLL_TIMEOUT)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_remote_request)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_REMOTE_TIMEOUT)
    }

    pub fn outbox_retry_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_retry_secs.max(1))
    }

    /// `host:port` of the control channel.
    pub fn control_address(&self) -> String {
        format!("{}:{}", self.cmd_address, self.cmd_port)
    }

    pub fn ignore_filter(&self) -> Result<IgnoreFilter, CoreError> {
        IgnoreFilter::with_defaults(&self.ignore_patterns)
    }

    pub fn state_dir(&self) -> Result<PathBuf, CoreError> {
        match &self.state_dir {
            Some(dir) => absolutize(dir),
            None => dirs::home_dir()
                .map(|home| syncbox_root(&home))
                .ok_or(CoreError::HomeNotFound),
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, CoreError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| io_err(".", e))?;
    Ok(cwd.join(path))
}
