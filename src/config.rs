use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::futures::{ClientConfig, DEFAULT_BASE_URL};
use crate::Result;

pub const DEFAULT_CONFIG_FILE: &str = "trigger-engine.toml";
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:7464";
const ENV_PREFIX: &str = "TRIGGER";

/// Runtime settings
///
/// Layered as defaults, then the TOML file (optional), then `TRIGGER_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub data_dir: PathBuf,
    pub orders_file: String,
    pub rules_file: String,
    pub tick_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Bound on a whole submission, including leverage and margin setup
    pub submit_timeout_secs: u64,
    pub recv_window_ms: u64,
    pub log_filter: String,
    /// Address the daemon's control API binds to
    pub control_addr: String,
}

impl Settings {
    /// Load settings; `path` must exist when given explicitly
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("api_key", "")?
            .set_default("api_secret", "")?
            .set_default("data_dir", "./data")?
            .set_default("orders_file", "conditional_orders.json")?
            .set_default("rules_file", "symbol_rules.json")?
            .set_default("tick_interval_secs", 10)?
            .set_default("request_timeout_secs", 10)?
            .set_default("submit_timeout_secs", 30)?
            .set_default("recv_window_ms", 5000)?
            .set_default("log_filter", "trigger_engine=info")?
            .set_default("control_addr", DEFAULT_CONTROL_ADDR)?
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn orders_path(&self) -> PathBuf {
        self.data_dir.join(&self.orders_file)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join(&self.rules_file)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs.max(1))
    }

    pub fn control_url(&self) -> String {
        format!("http://{}", self.control_addr)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            recv_window_ms: self.recv_window_ms,
            timeout: self.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "base_url = \"http://localhost:9000/\"\ndata_dir = \"/var/lib/te\"\ntick_interval_secs = 3"
        )
        .unwrap();

        let settings = Settings::load(path.to_str()).unwrap();

        assert_eq!(settings.tick_interval(), Duration::from_secs(3));
        assert_eq!(settings.orders_path(), PathBuf::from("/var/lib/te/conditional_orders.json"));
        assert_eq!(settings.rules_path(), PathBuf::from("/var/lib/te/symbol_rules.json"));
        assert_eq!(settings.recv_window_ms, 5000);

        let client = settings.client_config();
        assert_eq!(client.base_url, "http://localhost:9000");
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        let settings = Settings::load(path.to_str()).unwrap();

        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.log_filter, "trigger_engine=info");
        assert_eq!(settings.submit_timeout(), Duration::from_secs(30));
        assert_eq!(settings.control_url(), "http://127.0.0.1:7464");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Settings::load(Some("/nonexistent/trigger-engine.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
