// monitor.rs - 監控系統模組

pub mod metrics;
pub mod recorder;

// 重新導出常用元素，使其可直接從 monitor 模組使用
pub use metrics::{MetricsCollector, MetricsSnapshot, DEFAULT_METRICS_WINDOW};
pub use recorder::{GatewayMetrics, MetricEvent, METRIC_NAMESPACE};
