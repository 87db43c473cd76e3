use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Lines dropped per rotation; also the allowed overshoot above `max_lines`
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Domain whose address change triggers a refresh
    pub domain: String,
    /// URL publishing the server's current address record
    pub ips_url: String,
    /// URL serving the bootstrap (planet) file
    pub planet_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Sleep between polls while waiting for upstream to republish.
    /// Falls back to `state.check_interval_secs`.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_ip_record_path")]
    pub ip_record_path: PathBuf,
    #[serde(default = "default_server_ip_record_path")]
    pub server_ip_record_path: PathBuf,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_service")]
    pub service_name: String,
    #[serde(default = "default_planet_path")]
    pub planet_path: PathBuf,
}

/// Settings for the unit written by `planet-syncd install`
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_unit_name")]
    pub name: String,
    #[serde(default = "default_unit_description")]
    pub description: String,
    /// systemd `Restart=` policy applied when the daemon exits
    #[serde(default = "default_restart_policy")]
    pub restart: String,
    /// Delay before systemd restarts the daemon
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u64,
    /// Window over which systemd counts restarts before giving up
    #[serde(default = "default_start_limit_interval")]
    pub start_limit_interval_sec: u64,
}

const RESTART_POLICIES: &[&str] = &[
    "no",
    "on-success",
    "on-failure",
    "on-abnormal",
    "on-watchdog",
    "on-abort",
    "always",
];

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/planet-syncd.log")
}

fn default_max_lines() -> usize {
    1000
}

fn default_buffer_lines() -> usize {
    100
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ip_record_path() -> PathBuf {
    PathBuf::from("state/ip.txt")
}

fn default_server_ip_record_path() -> PathBuf {
    PathBuf::from("state/server_ip.txt")
}

fn default_check_interval() -> u64 {
    60
}

fn default_overlay_service() -> String {
    "zerotier-one".to_string()
}

fn default_planet_path() -> PathBuf {
    PathBuf::from("/var/lib/zerotier-one/planet")
}

fn default_unit_name() -> String {
    shared::protocol::DAEMON_UNIT_NAME.to_string()
}

fn default_unit_description() -> String {
    "Keeps the overlay planet file in sync with its upstream".to_string()
}

fn default_restart_policy() -> String {
    "always".to_string()
}

fn default_restart_sec() -> u64 {
    5
}

fn default_start_limit_interval() -> u64 {
    10
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            max_lines: default_max_lines(),
            buffer_lines: default_buffer_lines(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ip_record_path: default_ip_record_path(),
            server_ip_record_path: default_server_ip_record_path(),
            check_interval_secs: default_check_interval(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            service_name: default_overlay_service(),
            planet_path: default_planet_path(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_unit_name(),
            description: default_unit_description(),
            restart: default_restart_policy(),
            restart_sec: default_restart_sec(),
            start_limit_interval_sec: default_start_limit_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Relative paths are resolved against the directory holding the file,
    /// so the daemon behaves the same whatever its working directory is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let base = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve config path: {}", path.display()))?;
        if let Some(dir) = base.parent() {
            config.resolve_relative_paths(dir);
        }

        Ok(config)
    }

    /// Parse and validate configuration without touching the filesystem
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.upstream.domain.trim().is_empty(), "upstream.domain is empty");
        anyhow::ensure!(!self.upstream.ips_url.trim().is_empty(), "upstream.ips_url is empty");
        anyhow::ensure!(!self.upstream.planet_url.trim().is_empty(), "upstream.planet_url is empty");
        anyhow::ensure!(self.state.check_interval_secs > 0, "state.check_interval_secs must be positive");
        anyhow::ensure!(self.upstream.poll_interval_secs != Some(0), "upstream.poll_interval_secs must be positive");
        anyhow::ensure!(self.upstream.request_timeout_secs > 0, "upstream.request_timeout_secs must be positive");
        anyhow::ensure!(self.log.max_lines > 0, "log.max_lines must be positive");
        anyhow::ensure!(!self.overlay.service_name.trim().is_empty(), "overlay.service_name is empty");
        anyhow::ensure!(!self.service.name.trim().is_empty(), "service.name is empty");
        anyhow::ensure!(
            RESTART_POLICIES.contains(&self.service.restart.as_str()),
            "service.restart must be one of: {}",
            RESTART_POLICIES.join(", ")
        );
        Ok(())
    }

    /// Make every configured path absolute against `base`
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        for path in [
            &mut self.log.path,
            &mut self.state.ip_record_path,
            &mut self.state.server_ip_record_path,
            &mut self.overlay.planet_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.state.check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.upstream
                .poll_interval_secs
                .unwrap_or(self.state.check_interval_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }
}
