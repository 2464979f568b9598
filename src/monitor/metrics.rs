// monitor/metrics.rs - 網關指標收集模組

use crate::connection::DisconnectReason;
use crate::event::Event;
use crate::monitor::recorder::{GatewayMetrics, MetricEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 參考滑動窗口長度
pub const DEFAULT_METRICS_WINDOW: Duration = Duration::from_secs(60);

/// 窗口內保留的最大樣本數
const MAX_WINDOW_SAMPLES: usize = 200_000;

/// 單一事件在滑動窗口中的樣本
#[derive(Debug, Clone)]
struct EventSample {
    at: Instant,
    channel: String,
    event_type: String,
    organization_id: Option<String>,
    is_error: bool,
}

/// 指標快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// 指定組織時，事件與連線數字只計算該組織
    pub organization_id: Option<String>,
    pub window_secs: u64,
    pub uptime_secs: u64,
    /// 自啟動以來處理的事件總數
    pub total_events: u64,
    pub window_events: u64,
    pub events_per_second: f64,
    pub error_rate: f64,
    pub channel_counts: BTreeMap<String, u64>,
    pub type_counts: BTreeMap<String, u64>,
    pub active_connections: u64,
    pub connections_by_organization: BTreeMap<String, u64>,
    pub rejected_events: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub relay_published: u64,
    pub relay_received: u64,
    pub relay_failures: u64,
    pub disconnects: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

/// 網關指標收集器
///
/// 只由路由器與連線註冊表更新，快照永遠是唯讀的衍生結果。
#[derive(Debug)]
pub struct MetricsCollector {
    window: Duration,
    started_at: Instant,
    samples: Mutex<VecDeque<EventSample>>,
    events_processed: AtomicU64,
    events_rejected: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
    relay_published: AtomicU64,
    relay_received: AtomicU64,
    relay_failures: AtomicU64,
    events_by_organization: DashMap<String, u64>,
    connections_by_organization: DashMap<String, u64>,
    disconnects: DashMap<DisconnectReason, u64>,
}

impl MetricsCollector {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_secs(1)),
            started_at: Instant::now(),
            samples: Mutex::new(VecDeque::new()),
            events_processed: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            relay_published: AtomicU64::new(0),
            relay_received: AtomicU64::new(0),
            relay_failures: AtomicU64::new(0),
            events_by_organization: DashMap::new(),
            connections_by_organization: DashMap::new(),
            disconnects: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 記錄一個已處理的事件
    pub fn record_event(&self, event: &Event) {
        self.record_event_at(event, Instant::now());
    }

    pub fn record_event_at(&self, event: &Event, at: Instant) {
        let is_error = event.is_error();
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        if let Some(organization_id) = &event.metadata.organization_id {
            *self
                .events_by_organization
                .entry(organization_id.clone())
                .or_insert(0) += 1;
        }

        {
            let mut samples = self.samples.lock();
            samples.push_back(EventSample {
                at,
                channel: event.channel.as_str().to_string(),
                event_type: event.event_type.clone(),
                organization_id: event.metadata.organization_id.clone(),
                is_error,
            });
            Self::prune(&mut samples, self.window, at);
            while samples.len() > MAX_WINDOW_SAMPLES {
                samples.pop_front();
            }
        }

        GatewayMetrics::record(MetricEvent::Processed {
            channel: event.channel.as_str(),
            is_error,
        });
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
        GatewayMetrics::record(MetricEvent::Rejected);
    }

    /// 記錄一次扇出的投遞結果
    pub fn record_fanout(&self, delivered: usize, dropped: usize) {
        self.messages_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.messages_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        GatewayMetrics::record(MetricEvent::Fanout { delivered, dropped });
    }

    pub fn record_relay_published(&self) {
        self.relay_published.fetch_add(1, Ordering::Relaxed);
        GatewayMetrics::record(MetricEvent::RelayPublished);
    }

    pub fn record_relay_received(&self) {
        self.relay_received.fetch_add(1, Ordering::Relaxed);
        GatewayMetrics::record(MetricEvent::RelayReceived);
    }

    pub fn record_relay_failure(&self) {
        self.relay_failures.fetch_add(1, Ordering::Relaxed);
        GatewayMetrics::record(MetricEvent::RelayFailure);
    }

    pub fn connection_opened(&self, organization_id: &str) {
        *self
            .connections_by_organization
            .entry(organization_id.to_string())
            .or_insert(0) += 1;
        GatewayMetrics::record(MetricEvent::ConnectionOpened);
    }

    pub fn connection_closed(&self, organization_id: &str, reason: DisconnectReason) {
        self.connections_by_organization
            .remove_if_mut(organization_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
        *self.disconnects.entry(reason).or_insert(0) += 1;
        GatewayMetrics::record(MetricEvent::ConnectionClosed { reason });
    }

    pub fn active_connections(&self, organization_id: Option<&str>) -> u64 {
        match organization_id {
            Some(id) => self
                .connections_by_organization
                .get(id)
                .map_or(0, |count| *count),
            None => self
                .connections_by_organization
                .iter()
                .map(|entry| *entry.value())
                .sum(),
        }
    }

    pub fn disconnect_count(&self, reason: DisconnectReason) -> u64 {
        self.disconnects.get(&reason).map_or(0, |count| *count)
    }

    pub fn snapshot(&self, organization_id: Option<&str>) -> MetricsSnapshot {
        self.snapshot_at(organization_id, Instant::now())
    }

    /// 以指定時間點計算快照
    pub fn snapshot_at(&self, organization_id: Option<&str>, now: Instant) -> MetricsSnapshot {
        let mut channel_counts = BTreeMap::new();
        let mut type_counts = BTreeMap::new();
        let mut window_events = 0u64;
        let mut window_errors = 0u64;

        {
            let samples = self.samples.lock();
            let cutoff = now.checked_sub(self.window);
            let in_window = samples.iter().filter(|sample| {
                cutoff.map_or(true, |cutoff| sample.at > cutoff) && sample.at <= now
            });
            for sample in in_window {
                if let Some(id) = organization_id {
                    if sample.organization_id.as_deref() != Some(id) {
                        continue;
                    }
                }
                window_events += 1;
                if sample.is_error {
                    window_errors += 1;
                }
                *channel_counts.entry(sample.channel.clone()).or_insert(0) += 1;
                *type_counts.entry(sample.event_type.clone()).or_insert(0) += 1;
            }
        }

        let total_events = match organization_id {
            Some(id) => self.events_by_organization.get(id).map_or(0, |count| *count),
            None => self.events_processed.load(Ordering::Relaxed),
        };

        let connections_by_organization: BTreeMap<String, u64> = self
            .connections_by_organization
            .iter()
            .filter(|entry| organization_id.map_or(true, |id| entry.key() == id))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let disconnects = self
            .disconnects
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
            .collect();

        let error_rate = if window_events == 0 {
            0.0
        } else {
            window_errors as f64 / window_events as f64
        };

        MetricsSnapshot {
            organization_id: organization_id.map(str::to_string),
            window_secs: self.window.as_secs(),
            uptime_secs: now.saturating_duration_since(self.started_at).as_secs(),
            total_events,
            window_events,
            events_per_second: window_events as f64 / self.window.as_secs_f64(),
            error_rate,
            channel_counts,
            type_counts,
            active_connections: self.active_connections(organization_id),
            connections_by_organization,
            rejected_events: self.events_rejected.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            relay_published: self.relay_published.load(Ordering::Relaxed),
            relay_received: self.relay_received.load(Ordering::Relaxed),
            relay_failures: self.relay_failures.load(Ordering::Relaxed),
            disconnects,
            timestamp: Utc::now(),
        }
    }

    fn prune(samples: &mut VecDeque<EventSample>, window: Duration, now: Instant) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while samples.front().is_some_and(|sample| sample.at <= cutoff) {
            samples.pop_front();
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_WINDOW)
    }
}
