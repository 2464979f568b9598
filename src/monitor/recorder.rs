use crate::connection::DisconnectReason;
use metrics::{counter, gauge};

/// 監控指標命名空間
pub const METRIC_NAMESPACE: &str = "apix";

/// 要鏡像到 metrics facade 的事件
#[derive(Debug, Clone, Copy)]
pub enum MetricEvent<'a> {
    Processed { channel: &'a str, is_error: bool },
    Rejected,
    Fanout { delivered: usize, dropped: usize },
    RelayPublished,
    RelayReceived,
    RelayFailure,
    ConnectionOpened,
    ConnectionClosed { reason: DisconnectReason },
}

/// 將網關指標寫入全域 recorder，未安裝 exporter 時為 no-op
pub struct GatewayMetrics;

impl GatewayMetrics {
    pub fn record(event: MetricEvent<'_>) {
        match event {
            MetricEvent::Processed { channel, is_error } => {
                counter!(
                    format!("{}.events.processed", METRIC_NAMESPACE),
                    "channel" => channel.to_string(),
                    "outcome" => if is_error { "error" } else { "success" }
                )
                .increment(1);
            }
            MetricEvent::Rejected => {
                counter!(format!("{}.events.rejected", METRIC_NAMESPACE)).increment(1);
            }
            MetricEvent::Fanout { delivered, dropped } => {
                if delivered > 0 {
                    counter!(format!("{}.messages.delivered", METRIC_NAMESPACE))
                        .increment(delivered as u64);
                }
                if dropped > 0 {
                    counter!(format!("{}.messages.dropped", METRIC_NAMESPACE))
                        .increment(dropped as u64);
                }
            }
            MetricEvent::RelayPublished => {
                counter!(format!("{}.relay.published", METRIC_NAMESPACE)).increment(1);
            }
            MetricEvent::RelayReceived => {
                counter!(format!("{}.relay.received", METRIC_NAMESPACE)).increment(1);
            }
            MetricEvent::RelayFailure => {
                counter!(format!("{}.relay.failures", METRIC_NAMESPACE)).increment(1);
            }
            MetricEvent::ConnectionOpened => {
                gauge!(format!("{}.connections.active", METRIC_NAMESPACE)).increment(1.0);
            }
            MetricEvent::ConnectionClosed { reason } => {
                gauge!(format!("{}.connections.active", METRIC_NAMESPACE)).decrement(1.0);
                counter!(
                    format!("{}.disconnects", METRIC_NAMESPACE),
                    "reason" => reason.as_str()
                )
                .increment(1);
            }
        }
    }
}
