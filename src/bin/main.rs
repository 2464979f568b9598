use anyhow::{anyhow, Context, Result};
use apix_gateway::config::{self, ApplicationConfig, ConfigLoader, Environment, LogConfig, MetricsConfig};
use apix_gateway::server::ServerBuilder;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 即時事件閘道
#[derive(Debug, Parser)]
#[command(name = "apix_gateway", version, about)]
struct Cli {
    /// 配置目錄，預設讀取 CONFIG_DIR 或 ./config
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// 執行環境（development / production），預設讀取 APIX_ENV
    #[arg(long)]
    env: Option<String>,

    /// 覆寫監聽埠
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = cli
        .env
        .as_deref()
        .map(Environment::parse)
        .unwrap_or_else(Environment::from_env);
    let config_dir = cli.config_dir.unwrap_or_else(ConfigLoader::config_dir);
    let mut app_config = ApplicationConfig::load_from(&config_dir, env)
        .with_context(|| format!("無法從 {} 加載配置", config_dir.display()))?;
    if let Some(port) = cli.port {
        app_config.server.port = port;
    }
    let app_config = config::init_config(app_config);

    // 保留 guard 直到程序結束，確保日誌檔寫入完成
    let _log_guard = init_logging(&app_config.log)?;
    info!(environment = ?env, "配置加載完成");

    init_metrics_exporter(&app_config.metrics)?;

    let server = ServerBuilder::new()
        .with_config(app_config.clone())
        .build()
        .map_err(|e| anyhow!("無法構建伺服器: {}", e))?;

    info!(
        "伺服器初始化完成，監聽 {}:{}",
        app_config.server.host, app_config.server.port
    );
    server
        .run(shutdown_signal())
        .await
        .map_err(|e| anyhow!("伺服器異常結束: {}", e))?;

    info!("伺服器已退出");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("接收到關閉信號，正在退出..."),
        Err(err) => error!("無法監聽關閉信號: {}", err),
    }
}

// 初始化日誌系統
fn init_logging(log_config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_config.level.to_lowercase()))
        .map_err(|e| anyhow!("無效的日誌級別: {}", e))?;
    let json = log_config.format.eq_ignore_ascii_case("json");

    let (file_layer, guard) = match &log_config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "apix_gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    info!("日誌系統初始化完成");
    Ok(guard)
}

// 啟動 Prometheus 抓取端點
fn init_metrics_exporter(metrics_config: &MetricsConfig) -> Result<()> {
    if !metrics_config.prometheus_enabled {
        return Ok(());
    }
    let port = metrics_config
        .prometheus_port
        .ok_or_else(|| anyhow!("啟用 Prometheus 時必須設定 metrics.prometheus_port"))?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("無法啟動 Prometheus 匯出器: {}", e))?;
    info!("Prometheus 指標匯出於 {}", addr);
    Ok(())
}
