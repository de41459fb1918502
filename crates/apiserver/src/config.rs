use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    store: Option<StoreBackend>,
    sync_interval_secs: Option<u64>,
    watch: Option<bool>,
    log_format: Option<LogFormat>,
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub database_url: Option<String>,
    pub store: StoreBackend,
    pub sync_interval: Duration,
    pub watch: bool,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            database_url: None,
            store: StoreBackend::Memory,
            sync_interval: Duration::from_secs(10),
            watch: true,
            log_format: LogFormat::Compact,
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Optional TOML file named by `APISERVER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("APISERVER_CONFIG") {
            Ok(path) if !path.is_empty() => {
                let path = PathBuf::from(path);
                debug!(path=?path, "config.load.attempt");
                let content = fs::read_to_string(&path).with_context(|| format!("read config {path:?}"))?;
                toml::from_str(&content).with_context(|| format!("parse config {path:?}"))?
            }
            _ => FileConfig::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(f: FileConfig) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(addr) = f.listen_addr { cfg.listen_addr = addr.parse().with_context(|| format!("listen_addr `{addr}`"))?; }
        cfg.database_url = f.database_url;
        if let Some(s) = f.store { cfg.store = s; }
        if let Some(secs) = f.sync_interval_secs { cfg.sync_interval = Duration::from_secs(secs.max(1)); }
        if let Some(w) = f.watch { cfg.watch = w; }
        if let Some(fmt) = f.log_format { cfg.log_format = fmt; }
        if let Some(lvl) = f.log_level { cfg.log_level = lvl; }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env("APISERVER_LISTEN_ADDR") {
            self.listen_addr = addr.parse().with_context(|| format!("APISERVER_LISTEN_ADDR `{addr}`"))?;
        }
        if let Some(url) = env("DATABASE_URL") { self.database_url = Some(url); }
        if let Some(store) = env("APISERVER_STORE") {
            self.store = match store.to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                other => anyhow::bail!("APISERVER_STORE must be memory or postgres, got `{other}`"),
            };
        }
        if let Some(secs) = env("APISERVER_SYNC_INTERVAL_SECS") {
            let secs: u64 = secs.parse().with_context(|| format!("APISERVER_SYNC_INTERVAL_SECS `{secs}`"))?;
            self.sync_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(w) = env("APISERVER_WATCH") { self.watch = matches!(w.as_str(), "1" | "true" | "TRUE" | "yes"); }
        if let Some(fmt) = env("APISERVER_LOG_FORMAT") {
            self.log_format = if fmt.eq_ignore_ascii_case("json") { LogFormat::Json } else { LogFormat::Compact };
        }
        Ok(())
    }
}

fn env(key: &str) -> Option<String> { std::env::var(key).ok().filter(|v| !v.is_empty()) }

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 7] = [
        "APISERVER_CONFIG", "APISERVER_LISTEN_ADDR", "DATABASE_URL", "APISERVER_STORE",
        "APISERVER_SYNC_INTERVAL_SECS", "APISERVER_WATCH", "APISERVER_LOG_FORMAT",
    ];

    fn clear() { for k in KEYS { std::env::remove_var(k); } }

    #[test]
    #[serial]
    fn defaults_without_file_or_env() {
        clear();
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.listen_addr.port(), 8000);
        assert!(cfg.watch);
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear();
        let dir = std::env::temp_dir().join(format!("apiserver-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "store = \"postgres\"\nsync_interval_secs = 30\nlog_format = \"json\"\n").unwrap();
        std::env::set_var("APISERVER_CONFIG", &path);
        std::env::set_var("APISERVER_SYNC_INTERVAL_SECS", "5");
        std::env::set_var("APISERVER_WATCH", "0");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.store, StoreBackend::Postgres);
        assert_eq!(cfg.sync_interval, Duration::from_secs(5));
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(!cfg.watch);
        clear();
    }

    #[test]
    #[serial]
    fn rejects_unknown_store() {
        clear();
        std::env::set_var("APISERVER_STORE", "etcd");
        assert!(Config::load().is_err());
        clear();
    }
}
