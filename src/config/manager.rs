use once_cell::sync::OnceCell;
use config::ConfigError;
use std::path::Path;
use tracing::{debug, warn};
use crate::config::types::ApplicationConfig;
use crate::config::loader::{ConfigLoader, Environment};
use crate::config::validation::Validator;

// 全局配置實例
static CONFIG: OnceCell<ApplicationConfig> = OnceCell::new();

/// 獲取應用程序配置實例，尚未初始化時返回 None
pub fn get_config() -> Option<&'static ApplicationConfig> {
    CONFIG.get()
}

/// 初始化配置（在應用程序啟動時調用）
pub fn init_config(app_config: ApplicationConfig) -> &'static ApplicationConfig {
    match CONFIG.try_insert(app_config) {
        Ok(config) => config,
        Err((existing, _)) => {
            warn!("配置已經被初始化，跳過重複初始化");
            existing
        }
    }
}

/// ApplicationConfig 加載方法實現
impl ApplicationConfig {
    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env = Environment::from_env();
        debug!("從環境加載配置: {:?}", env);
        Self::load(env)
    }

    /// 從預設目錄加載指定環境的配置
    pub fn load(env: Environment) -> Result<Self, ConfigError> {
        Self::load_from(&ConfigLoader::config_dir(), env)
    }

    /// 從指定目錄加載指定環境的配置並驗證
    pub fn load_from(config_dir: &Path, env: Environment) -> Result<Self, ConfigError> {
        let config_source = ConfigLoader::load_from(config_dir, env)?;

        let app_config: ApplicationConfig = config_source.try_deserialize()?;

        app_config
            .validate()
            .map_err(|err| ConfigError::Message(format!("配置驗證失敗: {}", err)))?;
        debug!("配置驗證通過");

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;

    const DEVELOPMENT_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 3001
request_timeout_secs = 30
enable_cors = false

[log]
level = "debug"
format = "pretty"

[redis]
url = "redis://localhost:6379"
pool_size = 4
connection_timeout_secs = 5
reconnect_attempts = 3
reconnect_delay_secs = 1

[gateway]
heartbeat_interval_secs = 25
stale_timeout_secs = 60
sweep_interval_secs = 30
outbound_queue_size = 256
max_consecutive_drops = 32
history_capacity = 1000
max_connections = 1000
max_subscriptions_per_connection = 50

[relay]
enabled = false
backend = "memory"
channel = "apix:events"
inbound_buffer = 1024

[metrics]
window_secs = 60
prometheus_enabled = false

[auth]
token_secret = "dev-token-secret"
api_key = "dev-api-key"
api_secret = "dev-api-secret"
max_clock_skew_secs = 300
"#;

    fn write_config(dir: &Path, body: &str) {
        fs::write(dir.join("development.toml"), body).expect("無法寫入測試配置");
    }

    #[test]
    #[serial]
    fn test_load_development_config() {
        let dir = tempfile::tempdir().expect("無法建立暫存目錄");
        write_config(dir.path(), DEVELOPMENT_TOML);

        let config = ApplicationConfig::load_from(dir.path(), Environment::Development)
            .expect("無法加載測試配置");

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.gateway.history_capacity, 1000);
        assert_eq!(config.relay.channel, "apix:events");
        assert!(config.gateway.instance_id.is_none());
    }

    #[test]
    #[serial]
    fn test_environment_variables_override_file() {
        let dir = tempfile::tempdir().expect("無法建立暫存目錄");
        write_config(dir.path(), DEVELOPMENT_TOML);

        env::set_var("APIX__GATEWAY__HISTORY_CAPACITY", "50");
        env::set_var("APIX__SERVER__PORT", "4100");
        let result = ApplicationConfig::load_from(dir.path(), Environment::Development);
        env::remove_var("APIX__GATEWAY__HISTORY_CAPACITY");
        env::remove_var("APIX__SERVER__PORT");

        let config = result.expect("無法加載測試配置");
        assert_eq!(config.gateway.history_capacity, 50);
        assert_eq!(config.server.port, 4100);
    }

    #[test]
    #[serial]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().expect("無法建立暫存目錄");
        write_config(
            dir.path(),
            &DEVELOPMENT_TOML.replace("history_capacity = 1000", "history_capacity = 0"),
        );

        let result = ApplicationConfig::load_from(dir.path(), Environment::Development);
        assert!(result.is_err());
    }
}
