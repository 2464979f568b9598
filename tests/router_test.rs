mod common;

use apix_gateway::connection::{DisconnectReason, RegistryLimits, SubscriptionFilters};
use apix_gateway::event::{Event, EventOrigin, HistoryQuery, ServerMessage};
use common::{connect, drain_events, gateway, gateway_with_history, gateway_with_limits};
use rstest::rstest;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn filters(pairs: &[(&str, &str)]) -> SubscriptionFilters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[rstest]
#[case("agent-events")]
#[case("tool-events")]
#[case("custom-channel")]
#[tokio::test]
async fn test_ingested_event_is_in_history(#[case] channel: &str) {
    let gw = gateway("instance-a");
    let event = Event::new("SOMETHING_HAPPENED", channel, json!({"n": 1}));
    let id = event.id.clone();

    gw.router.ingest(event, EventOrigin::Internal).await.unwrap();

    let found = gw.history.query(&HistoryQuery::new(10).channel(channel));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
}

#[tokio::test]
async fn test_unfiltered_subscriber_matches_channel() {
    let gw = gateway("instance-a");
    let (c, _rx) = connect(&gw.registry, "c", "O1");
    gw.registry.subscribe(&c, "agent-events", None).unwrap();

    let event = Event::new("AGENT_CREATED", "agent-events", json!(null)).with_organization("O9");
    assert!(gw.registry.matches(&event).contains(&c));

    let other = Event::new("AGENT_CREATED", "tool-events", json!(null));
    assert!(!gw.registry.matches(&other).contains(&c));
}

#[tokio::test]
async fn test_filter_mismatch_or_absent_key_excludes_connection() {
    let gw = gateway("instance-a");
    let (c, _rx) = connect(&gw.registry, "c", "O1");
    gw.registry
        .subscribe(&c, "agent-events", Some(filters(&[("organizationId", "O2")])))
        .unwrap();

    let mismatch = Event::new("AGENT_CREATED", "agent-events", json!(null)).with_organization("O1");
    assert!(!gw.registry.matches(&mismatch).contains(&c));

    let absent = Event::new("AGENT_CREATED", "agent-events", json!(null));
    assert!(!gw.registry.matches(&absent).contains(&c));

    let matching = Event::new("AGENT_CREATED", "agent-events", json!(null)).with_organization("O2");
    assert!(gw.registry.matches(&matching).contains(&c));
}

#[tokio::test]
async fn test_removed_connection_never_matches_again() {
    let gw = gateway("instance-a");
    let (c, _rx) = connect(&gw.registry, "c", "O1");
    gw.registry.subscribe(&c, "agent-events", None).unwrap();
    gw.registry.subscribe(&c, "tool-events", None).unwrap();
    assert_eq!(gw.registry.subscription_count(), 2);

    assert!(gw.registry.remove(&c, DisconnectReason::ClientClosed));
    assert_eq!(gw.registry.subscription_count(), 0);

    for channel in ["agent-events", "tool-events"] {
        let event = Event::new("X", channel, json!(null)).with_organization("O1");
        assert!(!gw.registry.matches(&event).contains(&c));
        let ack = gw.router.publish(event).await.unwrap();
        assert_eq!(ack.delivered, 0);
    }
}

#[tokio::test]
async fn test_filters_are_opt_in_across_organizations() {
    let gw = gateway("instance-a");
    let (a, mut rx_a) = connect(&gw.registry, "A", "O1");
    let (b, mut rx_b) = connect(&gw.registry, "B", "O2");
    gw.registry.subscribe(&a, "agent-events", None).unwrap();
    gw.registry.subscribe(&b, "agent-events", None).unwrap();

    let event = Event::new("AGENT_CREATED", "agent-events", json!(null)).with_organization("O1");
    let ack = gw.router.ingest(event, EventOrigin::Client).await.unwrap();
    assert_eq!(ack.delivered, 2);

    // A 同時是訂閱者與 org:O1 成員，只收到一份
    assert_eq!(drain_events(&mut rx_a).len(), 1);
    assert_eq!(drain_events(&mut rx_b).len(), 1);
}

#[tokio::test]
async fn test_subscriber_in_channel_room_receives_one_copy() {
    let gw = gateway("instance-a");
    let (c, mut rx) = connect(&gw.registry, "c", "O1");
    gw.registry.subscribe(&c, "agent-events", None).unwrap();
    gw.registry.join_room(&c, "channel:agent-events").unwrap();

    let ack = gw
        .router
        .publish(Event::new("AGENT_CREATED", "agent-events", json!(null)))
        .await
        .unwrap();
    assert_eq!(ack.delivered, 1);
    assert_eq!(drain_events(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_room_id_reaches_room_members() {
    let gw = gateway("instance-a");
    let (member, mut rx_member) = connect(&gw.registry, "m", "O1");
    let (_outsider, mut rx_outsider) = connect(&gw.registry, "o", "O2");
    gw.registry.join_room(&member, "project-7").unwrap();

    let event = Event::new("WORKFLOW_STARTED", "workflow-events", json!(null)).with_room("project-7");
    gw.router.publish(event).await.unwrap();

    assert_eq!(drain_events(&mut rx_member).len(), 1);
    assert!(drain_events(&mut rx_outsider).is_empty());
}

#[tokio::test]
async fn test_history_keeps_last_events_in_order() {
    let gw = gateway_with_history("instance-a", 3);
    let mut ids = Vec::new();
    for n in 0..4 {
        let event = Event::new("TEXT_CHUNK", "streaming", json!({"n": n}));
        ids.push(event.id.clone());
        gw.router.publish(event).await.unwrap();
    }

    let found: Vec<String> = gw
        .router
        .query_history(&HistoryQuery::new(10))
        .iter()
        .map(|event| event.id.clone())
        .collect();
    assert_eq!(found, ids[1..].to_vec());
}

#[tokio::test]
async fn test_invalid_event_leaves_history_unchanged() {
    let gw = gateway("instance-a");
    gw.router
        .publish(Event::new("A", "agent-events", json!(null)))
        .await
        .unwrap();

    let invalid = Event::new("TEXT_CHUNK", "streaming", json!(null)).with_chunk("s1", 5, Some(3), false);
    assert!(gw.router.publish(invalid).await.is_err());

    assert_eq!(gw.history.len(), 1);
    assert_eq!(gw.metrics.snapshot(None).rejected_events, 1);
}

#[tokio::test]
async fn test_slow_consumer_is_evicted_without_blocking_others() {
    let limits = RegistryLimits {
        outbound_queue_size: 1,
        max_consecutive_drops: 2,
        ..RegistryLimits::default()
    };
    let gw = gateway_with_limits("instance-a", limits);
    let (slow, _rx_slow) = connect(&gw.registry, "slow", "O1");
    let (fast, mut rx_fast) = connect(&gw.registry, "fast", "O2");
    gw.registry.subscribe(&slow, "agent-events", None).unwrap();
    gw.registry.subscribe(&fast, "agent-events", None).unwrap();

    let mut received = 0;
    for n in 0..3 {
        gw.router
            .publish(Event::new("AGENT_UPDATED", "agent-events", json!({"n": n})))
            .await
            .unwrap();
        received += drain_events(&mut rx_fast).len();
    }

    assert_eq!(received, 3);
    assert!(!gw.registry.contains(&slow));
    assert!(gw.registry.contains(&fast));
    assert_eq!(gw.metrics.disconnect_count(DisconnectReason::Backpressure), 1);

    let snapshot = gw.metrics.snapshot(None);
    assert_eq!(snapshot.messages_dropped, 2);
    assert_eq!(snapshot.messages_delivered, 4);
}

#[tokio::test]
async fn test_metrics_snapshot_scoped_by_organization() {
    let gw = gateway("instance-a");
    let (_c, _rx) = connect(&gw.registry, "c", "O1");
    for org in ["O1", "O1", "O2"] {
        gw.router
            .publish(Event::new("AGENT_CREATED", "agent-events", json!(null)).with_organization(org))
            .await
            .unwrap();
    }
    gw.router
        .publish(Event::new("TOOL_CALL_ERROR", "tool-events", json!(null)).with_organization("O1"))
        .await
        .unwrap();

    let o1 = gw.router.metrics(Some("O1"));
    assert_eq!(o1.total_events, 3);
    assert_eq!(o1.window_events, 3);
    assert_eq!(o1.active_connections, 1);
    assert_eq!(o1.channel_counts.get("tool-events").copied(), Some(1));
    assert!((o1.error_rate - 1.0 / 3.0).abs() < 1e-9);

    let all = gw.router.metrics(None);
    assert_eq!(all.total_events, 4);
    assert_eq!(all.type_counts.get("AGENT_CREATED").copied(), Some(3));
}

fn roomy_limits() -> RegistryLimits {
    RegistryLimits {
        outbound_queue_size: 1024,
        ..RegistryLimits::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_delivers_each_event_once() {
    const PUBLISHERS: u64 = 4;
    const EVENTS_PER_PUBLISHER: u64 = 100;
    const TOTAL: usize = (PUBLISHERS * EVENTS_PER_PUBLISHER) as usize;

    let gw = gateway_with_limits("instance-a", roomy_limits());
    let mut receivers = Vec::new();
    for name in ["s1", "s2", "s3"] {
        let (id, rx) = connect(&gw.registry, name, "O1");
        gw.registry.subscribe(&id, "agent-events", None).unwrap();
        receivers.push(rx);
    }

    // 一個訂閱者在發布期間持續消費，其餘在結束後一次取出
    let mut live_rx = receivers.remove(0);
    let consumer = tokio::spawn(async move {
        let mut events = Vec::new();
        while events.len() < TOTAL {
            match tokio::time::timeout(Duration::from_secs(5), live_rx.recv()).await {
                Ok(Some(message)) => {
                    if let ServerMessage::Event { event } = message.as_ref() {
                        events.push(Arc::clone(event));
                    }
                }
                _ => break,
            }
        }
        events
    });

    let publishers: Vec<_> = (0..PUBLISHERS)
        .map(|publisher| {
            let router = Arc::clone(&gw.router);
            tokio::spawn(async move {
                let mut acks: usize = 0;
                for seq in 0..EVENTS_PER_PUBLISHER {
                    let event = Event::new(
                        "AGENT_UPDATED",
                        "agent-events",
                        json!({"publisher": publisher, "seq": seq}),
                    );
                    let ack = router.publish(event).await.unwrap();
                    assert_eq!(ack.delivered, 3);
                    acks += 1;
                }
                acks
            })
        })
        .collect();

    let mut acks: usize = 0;
    for publisher in publishers {
        acks += publisher.await.unwrap();
    }
    let live = consumer.await.unwrap();

    assert_eq!(acks, TOTAL);
    assert_eq!(gw.history.len(), acks);

    let mut copies = vec![live];
    for rx in receivers.iter_mut() {
        copies.push(drain_events(rx));
    }
    for events in &copies {
        assert_eq!(events.len(), TOTAL);
        let unique: HashSet<&str> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(unique.len(), TOTAL);

        // 同一發布者的事件保持發布順序
        let sequence: Vec<u64> = events
            .iter()
            .filter(|event| event.data["publisher"] == 0)
            .filter_map(|event| event.data["seq"].as_u64())
            .collect();
        assert_eq!(sequence, (0..EVENTS_PER_PUBLISHER).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removal_during_concurrent_ingest_is_silent() {
    const EVENTS: usize = 200;

    let gw = gateway_with_limits("instance-a", roomy_limits());
    let (stay, mut rx_stay) = connect(&gw.registry, "stay", "O1");
    let (leaving, mut rx_leaving) = connect(&gw.registry, "leaving", "O2");
    gw.registry.subscribe(&stay, "agent-events", None).unwrap();
    gw.registry.subscribe(&leaving, "agent-events", None).unwrap();

    let publisher = {
        let router = Arc::clone(&gw.router);
        tokio::spawn(async move {
            for seq in 0..EVENTS {
                router
                    .publish(Event::new("AGENT_UPDATED", "agent-events", json!({"seq": seq})))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let remover = {
        let registry = Arc::clone(&gw.registry);
        let leaving = leaving.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            registry.remove(&leaving, DisconnectReason::ClientClosed)
        })
    };

    publisher.await.unwrap();
    assert!(remover.await.unwrap());

    assert_eq!(drain_events(&mut rx_stay).len(), EVENTS);
    assert!(drain_events(&mut rx_leaving).len() <= EVENTS);
    assert!(rx_leaving.recv().await.is_none());

    assert!(gw.registry.contains(&stay));
    assert!(!gw.registry.contains(&leaving));
    assert_eq!(gw.registry.subscription_count(), 1);
    assert_eq!(gw.metrics.disconnect_count(DisconnectReason::ClientClosed), 1);
    assert_eq!(gw.history.len(), EVENTS);
}
