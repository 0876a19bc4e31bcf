use futures::StreamExt;
use kawase_core::common::Record;
use kawase_core::config::AppConfig;
use kawase_core::market::history::HISTORY_CAP;
use kawase_core::market::port::{CloseReason, ConnectionPhase};
use kawase_core::market::state::{SnapshotPolicy, StrategyHistory};
use kawase_core::testing::MockTransport;
use kawase_market::store::MarketStore;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn record(value: Value) -> Record {
    Record::try_from(value).expect("test payload must be an object")
}

fn setup_with(delay_ms: u64, policy: SnapshotPolicy) -> (Arc<MarketStore>, MockTransport) {
    let mut config = AppConfig::default();
    config.stream.reconnect_delay_ms = delay_ms;
    config.positions.snapshot_policy = policy;
    let transport = MockTransport::new();
    let store = MarketStore::new(&config, Arc::new(transport.clone())).unwrap();
    (store, transport)
}

fn setup() -> (Arc<MarketStore>, MockTransport) {
    setup_with(3_000, SnapshotPolicy::Authoritative)
}

/// 轮询直到条件成立；暂停时钟下每次等待会自动推进虚拟时间。
async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met: {}", what);
}

async fn connected(store: &MarketStore) {
    eventually("store connected", || store.status().connected).await;
}

#[tokio::test]
async fn test_connect_uses_derived_ws_url() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    assert_eq!(transport.urls(), vec!["ws://localhost:8001/ws/prices"]);
    let status = store.status();
    assert_eq!(status.phase, ConnectionPhase::Connected);
    assert!(!status.reconnect_pending);
}

#[tokio::test]
async fn test_envelopes_are_reduced_into_state() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    socket.push_text(r#"{"type":"ticker","data":{"symbol":"USD_JPY","bid":151.2}}"#);
    socket.push_text(r#"{"type":"candle","data":{"timeframe":"M1","close":151.3}}"#);
    socket.push_text(r#"{"type":"indicator","data":{"timeframe":"M1","rsi":55}}"#);
    socket.push_text(
        r#"{"type":"signal","data":{"strategy":"sma","strategy_name":"SMA Cross","side":"BUY"}}"#,
    );

    eventually("signal applied", || !store.snapshot().signals.is_empty()).await;
    let state = store.snapshot();
    assert_eq!(
        state.latest_ticker.unwrap().get("bid"),
        Some(&json!(151.2))
    );
    assert_eq!(state.candles["M1"].get("close"), Some(&json!(151.3)));
    assert_eq!(state.indicators["M1"].get("rsi"), Some(&json!(55)));
    assert_eq!(state.strategy_history["sma"].label, "SMA Cross");
    assert_eq!(state.strategy_history["sma"].events.len(), 1);
}

#[tokio::test]
async fn test_connect_is_noop_when_connected() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let mut status_rx = store.watch_status();
    status_rx.mark_unchanged();
    store.connect();

    // 信箱按序处理：帧被归约时第二次 connect 一定已处理完毕
    let socket = transport.last_socket().unwrap();
    socket.push_text(r#"{"type":"ticker","data":{"bid":1}}"#);
    eventually("ticker applied", || store.snapshot().latest_ticker.is_some()).await;

    assert_eq!(transport.open_count(), 1);
    assert!(!status_rx.has_changed().unwrap());
    assert!(store.status().connected);
}

#[tokio::test]
async fn test_disconnect_then_connect_leaves_single_connection() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    store.disconnect();
    store.connect();
    eventually("second connection opened", || {
        transport.open_count() == 2 && store.status().connected
    })
    .await;

    let first = transport.socket(0).unwrap();
    eventually("first socket closed", || first.close_reason().is_some()).await;
    assert_eq!(first.close_reason(), Some(CloseReason::ManualDisconnect));
    assert_eq!(transport.live_count(), 1);
    assert!(!store.status().reconnect_pending);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_reconnects_after_delay() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let closed_at = Instant::now();
    transport.last_socket().unwrap().close_from_server();
    eventually("connection marked lost", || !store.status().connected).await;

    let status = store.status();
    assert_eq!(status.phase, ConnectionPhase::Reconnecting);
    assert!(status.reconnect_pending);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(transport.attempts(), 1, "must not reconnect before the delay");

    eventually("reconnected", || {
        transport.open_count() == 2 && store.status().connected
    })
    .await;
    assert!(closed_at.elapsed() >= Duration::from_secs(3));
    assert!(!store.status().reconnect_pending);
}

#[tokio::test(start_paused = true)]
async fn test_error_force_closes_and_reconnects() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let first = transport.last_socket().unwrap();
    first.push_error("connection reset");
    eventually("errored socket closed", || first.close_reason().is_some()).await;
    assert_eq!(first.close_reason(), Some(CloseReason::Error));
    assert!(!store.status().connected);
    assert!(store.status().reconnect_pending);

    eventually("reconnected", || {
        transport.open_count() == 2 && store.status().connected
    })
    .await;
    assert_eq!(transport.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    transport.last_socket().unwrap().close_from_server();
    eventually("reconnect scheduled", || store.status().reconnect_pending).await;

    store.disconnect();
    eventually("disconnected", || {
        store.status().phase == ConnectionPhase::Disconnected
    })
    .await;
    assert!(!store.status().reconnect_pending);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(!store.status().connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_preempts_scheduled_reconnect() {
    let (store, transport) = setup_with(60_000, SnapshotPolicy::Authoritative);
    store.connect();
    connected(&store).await;

    let first = transport.last_socket().unwrap();
    first.push_error("boom");
    eventually("reconnect scheduled", || store.status().reconnect_pending).await;

    store.connect();
    eventually("manual reconnect", || store.status().connected).await;
    assert!(!store.status().reconnect_pending);

    // 旧连接已解除挂载，其数据不再进入状态
    first.push_text(r#"{"type":"ticker","data":{"from":"stale"}}"#);
    let second = transport.last_socket().unwrap();
    second.push_text(r#"{"type":"ticker","data":{"from":"live"}}"#);
    eventually("live ticker applied", || store.snapshot().latest_ticker.is_some()).await;
    assert_eq!(
        store.snapshot().latest_ticker.unwrap().str_field("from"),
        Some("live")
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn test_connect_while_connecting_replaces_in_flight_connection() {
    let (store, transport) = setup();
    // 两条指令在事件循环处理之前已进入信箱，第二次 connect 发生在 Connecting 阶段
    store.connect();
    store.connect();

    connected(&store).await;
    let status = store.status();
    assert_eq!(status.phase, ConnectionPhase::Connected);
    assert!(!status.reconnect_pending);
    assert!(transport.attempts() <= 2);

    let replaced = transport.open_count() - 1;
    for index in 0..replaced {
        let socket = transport.socket(index).unwrap();
        eventually("replaced socket closed", || socket.close_reason().is_some()).await;
        assert_eq!(socket.close_reason(), Some(CloseReason::Reconnecting));
    }
    assert_eq!(transport.live_count(), 1);

    // 已解除挂载的连接不再影响状态
    let mut status_rx = store.watch_status();
    status_rx.mark_unchanged();
    let live = transport.last_socket().unwrap();
    live.push_text(r#"{"type":"ticker","data":{"bid":1}}"#);
    eventually("ticker applied", || store.snapshot().latest_ticker.is_some()).await;
    assert!(!status_rx.has_changed().unwrap());
    assert!(store.status().connected);
    assert_eq!(transport.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failures_keep_retrying() {
    let (store, transport) = setup();
    transport.fail_next_opens(2);
    store.connect();

    eventually("first attempt failed", || {
        store.status().phase == ConnectionPhase::Reconnecting
    })
    .await;
    assert!(!store.status().connected);

    eventually("connected after retries", || store.status().connected).await;
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    socket.push_text("not json");
    socket.push_binary(vec![0xff, 0xfe]);
    socket.push_text(r#"{"type":"ticker","data":"nope"}"#);
    socket.push_text(r#"{"data":{"bid":1}}"#);
    socket.push_text(r#"{"type":"heartbeat","data":{}}"#);
    socket.push_binary(br#"{"type":"ticker","data":{"bid":2}}"#.to_vec());

    eventually("valid frame applied", || store.snapshot().latest_ticker.is_some()).await;
    assert_eq!(
        store.snapshot().latest_ticker.unwrap().get("bid"),
        Some(&json!(2))
    );
    assert!(store.status().connected);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn test_set_open_positions_supersedes_derived_entries() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    socket.push_text(r#"{"type":"position","data":{"type":"OPEN","symbol":"EUR_JPY"}}"#);
    eventually("position derived", || {
        store.snapshot().open_positions.contains_key("EUR_JPY")
    })
    .await;

    let status_before = store.status();
    store.set_open_positions(vec![record(json!({"symbol": "USD_JPY", "units": 1000}))]);
    eventually("snapshot applied", || {
        store.snapshot().open_positions.contains_key("USD_JPY")
    })
    .await;

    let state = store.snapshot();
    assert_eq!(state.open_positions.len(), 1);
    assert_eq!(state.position_events.len(), 1);
    assert_eq!(store.status(), status_before);
}

#[tokio::test]
async fn test_set_open_positions_while_disconnected() {
    let (store, transport) = setup();
    store.set_open_positions(vec![
        record(json!({"symbol": "USD_JPY"})),
        record(json!({"units": 5})),
    ]);

    eventually("snapshot applied", || {
        !store.snapshot().open_positions.is_empty()
    })
    .await;
    assert_eq!(
        store.snapshot().open_positions.keys().collect::<Vec<_>>(),
        vec!["USD_JPY"]
    );
    assert_eq!(store.status().phase, ConnectionPhase::Disconnected);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test]
async fn test_keep_derived_policy_ignores_empty_snapshot() {
    let (store, transport) = setup_with(3_000, SnapshotPolicy::KeepDerivedWhenEmpty);
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    socket.push_text(r#"{"type":"position","data":{"type":"OPEN","symbol":"GBP_JPY"}}"#);
    eventually("position derived", || {
        store.snapshot().open_positions.contains_key("GBP_JPY")
    })
    .await;

    store.set_open_positions(Vec::new());
    // 以一帧作为屏障，确认替换指令已处理
    socket.push_text(r#"{"type":"ticker","data":{"bid":1}}"#);
    eventually("barrier applied", || store.snapshot().latest_ticker.is_some()).await;
    assert!(store.snapshot().open_positions.contains_key("GBP_JPY"));
}

#[tokio::test]
async fn test_seeded_history_receives_live_signals() {
    let (store, transport) = setup();
    let mut seeded = BTreeMap::new();
    seeded.insert(
        "sma".to_string(),
        StrategyHistory::new("SMA Cross", vec![record(json!({"seq": 0}))]),
    );
    store.set_strategy_history(seeded);
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    socket.push_text(r#"{"type":"signal","data":{"strategy":"sma","seq":1}}"#);
    eventually("signal applied", || !store.snapshot().signals.is_empty()).await;

    let state = store.snapshot();
    let history = &state.strategy_history["sma"];
    assert_eq!(history.events.len(), 2);
    assert_eq!(history.events.latest().unwrap().get("seq"), Some(&json!(1)));
}

#[tokio::test]
async fn test_signal_history_is_capped() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    let socket = transport.last_socket().unwrap();
    for seq in 0..=HISTORY_CAP {
        socket.push_text(format!(
            r#"{{"type":"signal","data":{{"strategy":"s1","seq":{}}}}}"#,
            seq
        ));
    }
    eventually("all signals applied", || {
        store
            .snapshot()
            .signals
            .latest()
            .and_then(|s| s.get("seq").cloned())
            == Some(json!(HISTORY_CAP))
    })
    .await;

    let state = store.snapshot();
    assert_eq!(state.signals.len(), HISTORY_CAP);
    assert_eq!(state.strategy_history["s1"].events.len(), HISTORY_CAP);
    assert_eq!(state.signals.iter().last().unwrap().get("seq"), Some(&json!(1)));
}

#[tokio::test]
async fn test_updates_stream_sees_atomic_transitions() {
    let (store, transport) = setup();
    let mut updates = store.updates();
    let initial = updates.next().await.unwrap();
    assert!(initial.signals.is_empty());

    store.connect();
    connected(&store).await;
    transport
        .last_socket()
        .unwrap()
        .push_text(r#"{"type":"signal","data":{"strategy":"rsi"}}"#);

    let next = updates.next().await.unwrap();
    assert_eq!(next.signals.len(), 1);
    assert_eq!(next.strategy_history["rsi"].events.len(), 1);
}

#[tokio::test]
async fn test_dispose_closes_and_ignores_later_commands() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    store.dispose();
    let socket = transport.socket(0).unwrap();
    eventually("socket closed", || socket.close_reason().is_some()).await;
    assert_eq!(socket.close_reason(), Some(CloseReason::Shutdown));

    store.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(!store.status().connected);
}

#[tokio::test]
async fn test_dropping_store_closes_connection() {
    let (store, transport) = setup();
    store.connect();
    connected(&store).await;

    drop(store);
    let socket = transport.socket(0).unwrap();
    eventually("socket closed on drop", || socket.close_reason().is_some()).await;
    assert_eq!(socket.close_reason(), Some(CloseReason::Shutdown));
}
