// src/config.rs

//! Manages daemon configuration: CLI flags, file-based defaults, and validation.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;

/// D-PlaneOS control daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "dplaneosd", version, about = "D-PlaneOS privileged control daemon")]
pub struct Cli {
    /// Path to an optional TOML config file overlaying the defaults below.
    #[arg(long, default_value = "/etc/dplaneos/dplaneosd.toml")]
    pub config: String,

    /// Bind address for the HTTP API.
    #[arg(long, env = "DPLANE_LISTEN")]
    pub listen: Option<String>,

    /// Path to the embedded relational store file.
    #[arg(long, env = "DPLANE_DB")]
    pub db: Option<String>,

    /// Directory in which `.network`/`.netdev` unit files are written.
    #[arg(long = "config-dir", env = "DPLANE_CONFIG_DIR")]
    pub config_dir: Option<String>,

    /// Path at which a generated `smb.conf` is written.
    #[arg(long = "smb-conf", env = "DPLANE_SMB_CONF")]
    pub smb_conf: Option<String>,

    /// Destination path for the daily off-pool store backup.
    #[arg(long = "backup-path", env = "DPLANE_BACKUP_PATH")]
    pub backup_path: Option<String>,

    /// Optional webhook URL used for critical alert integration (pool
    /// suspension, capacity emergencies).
    #[arg(long = "alert-webhook", env = "DPLANE_ALERT_WEBHOOK")]
    pub alert_webhook: Option<String>,

    /// Unix-domain socket path for the container engine client.
    #[arg(long = "docker-socket", env = "DPLANE_DOCKER_SOCKET")]
    pub docker_socket: Option<String>,
}

/// Daemon-wide configuration, resolved from CLI flags over file defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    #[serde(default = "default_smb_conf")]
    pub smb_conf_path: String,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub alert_webhook: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub monitors: MonitorsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_listen() -> String {
    "127.0.0.1:9000".to_string()
}
fn default_db_path() -> String {
    "/var/lib/dplaneos/dplaneos.db".to_string()
}
fn default_config_dir() -> String {
    "/etc/systemd/network".to_string()
}
fn default_smb_conf() -> String {
    "/etc/samba/smb.conf".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Per-class command-executor timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_fast_timeout")]
    pub fast_timeout_secs: u64,
    #[serde(default = "default_medium_timeout")]
    pub medium_timeout_secs: u64,
    #[serde(default = "default_zfs_timeout")]
    pub zfs_timeout_secs: u64,
    #[serde(default = "default_slow_timeout")]
    pub slow_timeout_secs: u64,
}

fn default_fast_timeout() -> u64 {
    10
}
fn default_medium_timeout() -> u64 {
    60
}
fn default_zfs_timeout() -> u64 {
    120
}
fn default_slow_timeout() -> u64 {
    300
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            fast_timeout_secs: default_fast_timeout(),
            medium_timeout_secs: default_medium_timeout(),
            zfs_timeout_secs: default_zfs_timeout(),
            slow_timeout_secs: default_slow_timeout(),
        }
    }
}

/// Audit logger buffering/flush configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_max_buffer")]
    pub max_buffer_len: usize,
    #[serde(default = "default_audit_flush_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_audit_checkpoint_secs")]
    pub checkpoint_interval_secs: u64,
    #[serde(default = "default_audit_backup_interval_secs")]
    pub backup_interval_secs: u64,
}

fn default_audit_max_buffer() -> usize {
    256
}
fn default_audit_flush_secs() -> u64 {
    5
}
fn default_audit_checkpoint_secs() -> u64 {
    300
}
fn default_audit_backup_interval_secs() -> u64 {
    86_400
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_buffer_len: default_audit_max_buffer(),
            flush_interval_secs: default_audit_flush_secs(),
            checkpoint_interval_secs: default_audit_checkpoint_secs(),
            backup_interval_secs: default_audit_backup_interval_secs(),
        }
    }
}

/// Background monitor tick intervals and alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorsConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_inotify_interval")]
    pub inotify_interval_secs: u64,
    #[serde(default = "default_capacity_interval")]
    pub capacity_interval_secs: u64,
    #[serde(default = "default_warning_pct")]
    pub warning_threshold_pct: f64,
    #[serde(default = "default_critical_pct")]
    pub critical_threshold_pct: f64,
}

fn default_heartbeat_interval() -> u64 {
    30
}
fn default_inotify_interval() -> u64 {
    30
}
fn default_capacity_interval() -> u64 {
    300
}
fn default_warning_pct() -> f64 {
    90.0
}
fn default_critical_pct() -> f64 {
    95.0
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            inotify_interval_secs: default_inotify_interval(),
            capacity_interval_secs: default_capacity_interval(),
            warning_threshold_pct: default_warning_pct(),
            critical_threshold_pct: default_critical_pct(),
        }
    }
}

/// Session/auth configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_cleanup_secs")]
    pub session_cleanup_interval_secs: u64,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max_requests: usize,
}

fn default_session_ttl_secs() -> u64 {
    8 * 3600
}
fn default_session_cleanup_secs() -> u64 {
    900
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_rate_limit_max() -> usize {
    100
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            session_cleanup_interval_secs: default_session_cleanup_secs(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max_requests: default_rate_limit_max(),
        }
    }
}

/// Chunked upload manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_scratch")]
    pub scratch_dir: String,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_upload_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_upload_scratch() -> String {
    "/var/lib/dplaneos/upload-chunks".to_string()
}
fn default_chunk_timeout_secs() -> u64 {
    1800
}
fn default_upload_sweep_secs() -> u64 {
    300
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_upload_scratch(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            sweep_interval_secs: default_upload_sweep_secs(),
        }
    }
}

/// Cluster manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_deadline_secs")]
    pub ping_deadline_secs: u64,
}

fn default_node_id() -> String {
    "local".to_string()
}
fn default_ping_interval_secs() -> u64 {
    15
}
fn default_ping_deadline_secs() -> u64 {
    5
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: default_node_id(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_deadline_secs: default_ping_deadline_secs(),
        }
    }
}

/// Prometheus metrics exporter configuration, carried as ambient infrastructure
/// even though clustered-filesystem-style observability is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9001
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            db_path: default_db_path(),
            config_dir: default_config_dir(),
            smb_conf_path: default_smb_conf(),
            backup_path: None,
            alert_webhook: None,
            log_level: default_log_level(),
            exec: ExecConfig::default(),
            audit: AuditConfig::default(),
            monitors: MonitorsConfig::default(),
            auth: AuthConfig::default(),
            upload: UploadConfig::default(),
            cluster: ClusterConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional TOML file, then layers CLI flags on top.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match fs::read_to_string(&cli.config) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse TOML from '{}'", cli.config))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file '{}'", cli.config));
            }
        };

        if let Some(listen) = &cli.listen {
            config.listen = listen.clone();
        }
        if let Some(db) = &cli.db {
            config.db_path = db.clone();
        }
        if let Some(dir) = &cli.config_dir {
            config.config_dir = dir.clone();
        }
        if let Some(smb) = &cli.smb_conf {
            config.smb_conf_path = smb.clone();
        }
        if let Some(backup) = &cli.backup_path {
            config.backup_path = Some(backup.clone());
        }
        if let Some(webhook) = &cli.alert_webhook {
            config.alert_webhook = Some(webhook.clone());
        }
        if let Some(socket) = &cli.docker_socket {
            config.docker_socket = socket.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow!("invalid --listen address: '{}'", self.listen));
        }
        if self.monitors.warning_threshold_pct >= self.monitors.critical_threshold_pct {
            return Err(anyhow!(
                "monitors.warning_threshold_pct must be less than critical_threshold_pct"
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0 when metrics are enabled"));
        }
        Ok(())
    }

    /// Owner-read-only HMAC key file for the audit hash chain, kept next to
    /// the store rather than inside it so a store copy alone never leaks it.
    pub fn audit_key_path(&self) -> String {
        format!("{}.audit-key", self.db_path)
    }

    /// Backup destination, defaulting to `<db>.backup` per the persisted-state layout.
    pub fn resolved_backup_path(&self) -> String {
        self.backup_path
            .clone()
            .unwrap_or_else(|| format!("{}.backup", self.db_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_invalid_listen_address() {
        let mut cfg = Config::default();
        cfg.listen = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_capacity_thresholds() {
        let mut cfg = Config::default();
        cfg.monitors.warning_threshold_pct = 99.0;
        cfg.monitors.critical_threshold_pct = 95.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_metrics_port_zero_when_enabled() {
        let mut cfg = Config::default();
        cfg.metrics.enabled = true;
        cfg.metrics.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolved_backup_path_defaults_next_to_db() {
        let mut cfg = Config::default();
        cfg.db_path = "/var/lib/dplaneos/dplaneos.db".to_string();
        cfg.backup_path = None;
        assert_eq!(
            cfg.resolved_backup_path(),
            "/var/lib/dplaneos/dplaneos.db.backup"
        );

        cfg.backup_path = Some("/mnt/offpool/backup.db".to_string());
        assert_eq!(cfg.resolved_backup_path(), "/mnt/offpool/backup.db");
    }

    #[test]
    fn audit_key_path_is_sibling_of_db_file() {
        let mut cfg = Config::default();
        cfg.db_path = "/var/lib/dplaneos/dplaneos.db".to_string();
        assert_eq!(cfg.audit_key_path(), "/var/lib/dplaneos/dplaneos.db.audit-key");
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_is_absent() {
        let cli = Cli {
            config: "/nonexistent/path/to/dplaneosd.toml".to_string(),
            listen: None,
            db: None,
            config_dir: None,
            smb_conf: None,
            backup_path: None,
            alert_webhook: None,
            docker_socket: None,
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.listen, default_listen());
    }

    #[test]
    fn cli_flags_override_file_defaults() {
        let cli = Cli {
            config: "/nonexistent/path/to/dplaneosd.toml".to_string(),
            listen: Some("0.0.0.0:9500".to_string()),
            db: Some("/tmp/custom.db".to_string()),
            config_dir: None,
            smb_conf: None,
            backup_path: None,
            alert_webhook: None,
            docker_socket: None,
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:9500");
        assert_eq!(cfg.db_path, "/tmp/custom.db");
    }
}
