use serde::{Serialize, Deserialize};
use std::time::Duration;
use crate::config::validation::{ValidationError, ValidationUtils, Validator};

/// 應用程序配置結構
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub redis: RedisConfig,
    pub gateway: GatewayConfig,
    pub relay: RelayConfig,
    pub metrics: MetricsConfig,
    pub auth: AuthConfig,
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.server.validate()?;
        self.log.validate()?;
        self.gateway.validate()?;
        self.relay.validate()?;
        self.metrics.validate()?;
        self.auth.validate()?;

        // 只有 Redis 中繼需要 Redis 配置
        if self.relay.enabled && self.relay.backend == "redis" {
            self.redis.validate()?;
        }

        Ok(())
    }
}

/// 伺服器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Validator for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.host, "server.host")?;
        ValidationUtils::in_range(self.port, 1, 65535, "server.port")?;
        ValidationUtils::in_range(self.request_timeout_secs, 1, 300, "server.request_timeout_secs")?;

        // CORS設定驗證
        if self.enable_cors && self.cors_allowed_origins.is_empty() {
            return Err(ValidationError::InvalidValue(
                "啟用CORS但未指定允許的來源".to_string()
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    /// 請求超時持續時間
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    /// 設定後同時輸出按日輪替的日誌檔
    #[serde(default)]
    pub directory: Option<String>,
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(
            &self.level.to_lowercase().as_str(),
            &["trace", "debug", "info", "warn", "error"],
            "log.level"
        )?;

        ValidationUtils::one_of(
            &self.format.to_lowercase().as_str(),
            &["pretty", "json"],
            "log.format"
        )?;

        Ok(())
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
}

impl Validator for RedisConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.url, "redis.url")?;
        ValidationUtils::in_range(self.pool_size, 1, 100, "redis.pool_size")?;
        ValidationUtils::in_range(self.connection_timeout_secs, 1, 60, "redis.connection_timeout_secs")?;
        ValidationUtils::in_range(self.reconnect_attempts, 0, 10, "redis.reconnect_attempts")?;
        ValidationUtils::in_range(self.reconnect_delay_secs, 1, 60, "redis.reconnect_delay_secs")?;

        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 8,
            connection_timeout_secs: 5,
            reconnect_attempts: 3,
            reconnect_delay_secs: 1,
        }
    }
}

/// 連線閘道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 實例識別碼，未設定時啟動時隨機產生
    #[serde(default)]
    pub instance_id: Option<String>,
    /// 伺服器送出 WebSocket ping 的間隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 超過此時間未收到心跳即視為過期（秒）
    pub stale_timeout_secs: u64,
    /// 存活檢查掃描間隔（秒）
    pub sweep_interval_secs: u64,
    /// 每條連線的發送佇列容量
    pub outbound_queue_size: usize,
    /// 連續丟棄訊息達此數量即斷開連線
    pub max_consecutive_drops: u32,
    /// 歷史事件緩衝容量
    pub history_capacity: usize,
    pub max_connections: usize,
    pub max_subscriptions_per_connection: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            heartbeat_interval_secs: 25,
            stale_timeout_secs: 60,
            sweep_interval_secs: 30,
            outbound_queue_size: 256,
            max_consecutive_drops: 32,
            history_capacity: 1000,
            max_connections: 10_000,
            max_subscriptions_per_connection: 100,
        }
    }
}

impl Validator for GatewayConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.heartbeat_interval_secs, 1, 300, "gateway.heartbeat_interval_secs")?;
        ValidationUtils::in_range(self.stale_timeout_secs, 1, 3600, "gateway.stale_timeout_secs")?;
        ValidationUtils::in_range(self.sweep_interval_secs, 1, 3600, "gateway.sweep_interval_secs")?;
        ValidationUtils::in_range(self.outbound_queue_size, 1, 65_536, "gateway.outbound_queue_size")?;
        ValidationUtils::in_range(self.max_consecutive_drops, 1, 10_000, "gateway.max_consecutive_drops")?;
        ValidationUtils::in_range(self.history_capacity, 1, 1_000_000, "gateway.history_capacity")?;
        ValidationUtils::in_range(self.max_connections, 1, 1_000_000, "gateway.max_connections")?;
        ValidationUtils::in_range(
            self.max_subscriptions_per_connection,
            1,
            10_000,
            "gateway.max_subscriptions_per_connection",
        )?;

        // 心跳間隔必須小於過期窗口，否則健康的連線也會被清除
        if self.heartbeat_interval_secs >= self.stale_timeout_secs {
            return Err(ValidationError::InvalidValue(format!(
                "gateway.heartbeat_interval_secs ({}) 必須小於 gateway.stale_timeout_secs ({})",
                self.heartbeat_interval_secs, self.stale_timeout_secs
            )));
        }

        if let Some(id) = &self.instance_id {
            ValidationUtils::not_empty(id, "gateway.instance_id")?;
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// 跨實例中繼配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub enabled: bool,
    /// "redis" 或 "memory"
    pub backend: String,
    /// 所有實例共用的發布/訂閱頻道名稱
    pub channel: String,
    /// 收到中繼事件後交給路由器前的緩衝容量
    pub inbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: "memory".to_string(),
            channel: "apix:events".to_string(),
            inbound_buffer: 1024,
        }
    }
}

impl Validator for RelayConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(&self.backend.as_str(), &["redis", "memory"], "relay.backend")?;
        ValidationUtils::check_dependency(
            self.enabled,
            !self.channel.trim().is_empty(),
            "relay.enabled",
            "relay.channel",
        )?;
        ValidationUtils::in_range(self.inbound_buffer, 1, 1_000_000, "relay.inbound_buffer")?;

        Ok(())
    }
}

/// 指標配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 滑動窗口長度（秒）
    pub window_secs: u64,
    pub prometheus_enabled: bool,
    #[serde(default)]
    pub prometheus_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            prometheus_enabled: false,
            prometheus_port: None,
        }
    }
}

impl Validator for MetricsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.window_secs, 1, 3600, "metrics.window_secs")?;
        ValidationUtils::check_dependency(
            self.prometheus_enabled,
            self.prometheus_port.is_some(),
            "metrics.prometheus_enabled",
            "metrics.prometheus_port",
        )?;

        Ok(())
    }
}

/// 認證配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 驗證連線 token 簽章的密鑰
    pub token_secret: String,
    /// 內部 REST 請求使用的 API Key
    pub api_key: String,
    /// 內部 REST 請求簽章密鑰
    pub api_secret: String,
    /// 簽名請求允許的時鐘偏差（秒）
    pub max_clock_skew_secs: i64,
}

impl Validator for AuthConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.token_secret, "auth.token_secret")?;
        ValidationUtils::not_empty(&self.api_key, "auth.api_key")?;
        ValidationUtils::not_empty(&self.api_secret, "auth.api_secret")?;
        ValidationUtils::in_range(self.max_clock_skew_secs, 1, 3600, "auth.max_clock_skew_secs")?;

        Ok(())
    }
}
