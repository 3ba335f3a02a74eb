use mockito::Matcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use trigger_engine::api::{ClientConfig, FuturesClient};
use trigger_engine::execution::{ExecutionCoordinator, SymbolRulesCache, TriggerStore};
use trigger_engine::persistence::{JsonOrderFile, OrderRepository, RuleCacheFile};
use trigger_engine::*;

const EXCHANGE_INFO: &str = r#"{"timezone":"UTC","symbols":[
    {"symbol":"BTCUSDT","status":"TRADING","pricePrecision":2,"quantityPrecision":3,
     "filters":[
        {"filterType":"PRICE_FILTER","minPrice":"556.80","maxPrice":"4529764","tickSize":"0.10"},
        {"filterType":"LOT_SIZE","minQty":"0.001","maxQty":"1000","stepSize":"0.001"},
        {"filterType":"MIN_NOTIONAL","notional":"100"}
     ]}
]}"#;

struct Engine {
    _dir: tempfile::TempDir,
    orders_path: std::path::PathBuf,
    store: Arc<TriggerStore>,
    coordinator: ExecutionCoordinator,
}

fn engine(server: &mockito::ServerGuard, dir: tempfile::TempDir) -> Engine {
    let orders_path = dir.path().join("conditional_orders.json");
    let store = Arc::new(TriggerStore::open(Arc::new(JsonOrderFile::new(&orders_path))));

    let client = Arc::new(
        FuturesClient::new(ClientConfig {
            base_url: server.url(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            recv_window_ms: 5000,
            timeout: Duration::from_secs(2),
        })
        .unwrap(),
    );
    let rules = Arc::new(SymbolRulesCache::with_file(
        client.clone(),
        RuleCacheFile::new(dir.path().join("symbol_rules.json")),
    ));
    let coordinator = ExecutionCoordinator::new(store.clone(), client.clone(), client, rules);

    Engine {
        _dir: dir,
        orders_path,
        store,
        coordinator,
    }
}

async fn mock_market(server: &mut mockito::ServerGuard, price: &str) {
    server
        .mock("GET", "/fapi/v1/ticker/price")
        .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
        .with_body(format!(
            r#"{{"symbol":"BTCUSDT","price":"{}","time":1717000000000}}"#,
            price
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .with_body(EXCHANGE_INFO)
        .create_async()
        .await;
}

fn reload(path: &std::path::Path) -> Vec<ConditionalOrder> {
    JsonOrderFile::new(path).load().unwrap()
}

#[tokio::test]
async fn test_stop_loss_fires_and_persists_execution() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, "59000.00").await;
    let order_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("side".into(), "SELL".into()),
            Matcher::UrlEncoded("type".into(), "MARKET".into()),
            Matcher::UrlEncoded("quantity".into(), "0.01".into()),
            Matcher::Regex("signature=[0-9a-f]{64}$".into()),
        ]))
        .with_body(r#"{"orderId":283194212,"clientOrderId":"te-1-0a1b2c3d","status":"NEW"}"#)
        .expect(1)
        .create_async()
        .await;

    let engine = engine(&server, tempfile::tempdir().unwrap());
    let id = assert_ok!(engine.store.create(
        OrderDraft::new("btcusdt", OrderSide::Sell, OrderType::StopLoss, 0.0104, 60000.0)
            .with_remark("protect long"),
    ));

    let report = engine.coordinator.tick().await.unwrap();
    assert_eq!(report.executed, 1);

    // a second sweep has nothing left to do
    let again = engine.coordinator.tick().await.unwrap();
    assert_eq!(again.evaluated, 0);
    order_mock.assert_async().await;

    let stored = reload(&engine.orders_path);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].symbol, "BTCUSDT");
    assert_eq!(stored[0].status, OrderStatus::Executed);
    assert_eq!(stored[0].exchange_order_id.as_deref(), Some("283194212"));
    assert_eq!(stored[0].remark, "protect long");
}

#[tokio::test]
async fn test_rejected_order_is_failed_on_disk() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, "59000.00").await;
    server
        .mock("POST", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
        .expect(1)
        .create_async()
        .await;

    let engine = engine(&server, tempfile::tempdir().unwrap());
    let id = assert_ok!(engine.store.create(OrderDraft::new(
        "BTCUSDT",
        OrderSide::Sell,
        OrderType::StopMarket,
        0.01,
        60000.0,
    )));

    engine.coordinator.tick().await.unwrap();
    engine.coordinator.tick().await.unwrap();

    let stored = reload(&engine.orders_path);
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].status, OrderStatus::Failed);
    assert_eq!(stored[0].fail_reason.as_deref(), Some("Margin is insufficient."));
    assert!(stored[0].exchange_order_id.is_none());
}

#[tokio::test]
async fn test_price_away_from_trigger_keeps_order_pending() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, "61000.00").await;
    let order_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let engine = engine(&server, tempfile::tempdir().unwrap());
    let id = assert_ok!(engine.store.create(OrderDraft::new(
        "BTCUSDT",
        OrderSide::Sell,
        OrderType::StopLoss,
        0.01,
        60000.0,
    )));

    let report = engine.coordinator.tick().await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.fired, 0);
    assert_eq!(engine.store.get(id).unwrap().status, OrderStatus::Pending);
    order_mock.assert_async().await;
}

#[tokio::test]
async fn test_restart_leaves_triggered_orders_alone() {
    let mut server = mockito::Server::new_async().await;
    mock_market(&mut server, "59000.00").await;
    let order_mock = server
        .mock("POST", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orders_path = dir.path().join("conditional_orders.json");

    // simulate a run that stopped between the fire decision and the exchange reply
    {
        let store = TriggerStore::open(Arc::new(JsonOrderFile::new(&orders_path)));
        let id = store
            .create(OrderDraft::new(
                "BTCUSDT",
                OrderSide::Sell,
                OrderType::StopLoss,
                0.01,
                60000.0,
            ))
            .unwrap();
        assert!(assert_ok!(store.mark_triggered(id, 59000.0, chrono::Utc::now())).is_some());
    }

    let engine = engine(&server, dir);
    let stuck = engine.coordinator.report_in_flight();
    assert_eq!(stuck.len(), 1);

    let report = engine.coordinator.tick().await.unwrap();
    assert_eq!(report.evaluated, 0);
    order_mock.assert_async().await;

    let stored = reload(&engine.orders_path);
    assert_eq!(stored[0].status, OrderStatus::Triggered);
    assert!(stored[0].trigger_time.is_some());
}

#[tokio::test]
async fn test_ids_continue_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conditional_orders.json");

    let first = TriggerStore::open(Arc::new(JsonOrderFile::new(&path)));
    let draft = OrderDraft::new("ETHUSDT", OrderSide::Buy, OrderType::TakeProfit, 0.5, 3000.0);
    let a = assert_ok!(first.create(draft.clone()));
    let b = assert_ok!(first.create(draft.clone()));
    assert_ok!(first.cancel(b));
    drop(first);

    let second = TriggerStore::open(Arc::new(JsonOrderFile::new(&path)));
    let c = assert_ok!(second.create(draft));

    assert!(c > a && c > b);
    assert_eq!(second.get(b).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(second.active().len(), 2);
}
