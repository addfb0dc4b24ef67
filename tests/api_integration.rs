//! Integration tests for the REST facade.
//!
//! Each test spins up an Axum server on a random port and drives the real
//! HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use parcel_router::api::api_routes;
use parcel_router::config::{AppConfig, RetryPolicy};
use parcel_router::pipeline::DeliveryPipeline;
use parcel_router::registry::AdapterRegistries;
use parcel_router::routing::{JournalTarget, RoutingEngine};
use parcel_router::store::DeliveryStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const DHL_ANNOUNCED: &str = "From: DHL Paket <noreply@dhl.de>\r\n\
    Subject: Ihre DHL Sendung ist unterwegs\r\n\
    \r\n\
    Sendungsnummer: 123456789\r\n\
    Voraussichtliche Zustellung: 21.10.2026 zwischen 14:00 - 16:00 Uhr\r\n";

const DHL_OUT_FOR_DELIVERY: &str = "From: DHL Paket <noreply@dhl.de>\r\n\
    Subject: Ihre DHL Sendung kommt heute\r\n\
    \r\n\
    Sendungsnummer: 123456789\r\n\
    Ihre Sendung ist heute in Zustellung.\r\n";

struct TestServer {
    base: String,
    journal: Arc<JournalTarget>,
    client: reqwest::Client,
}

impl TestServer {
    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn submit(&self, raw: &str) -> Value {
        let resp = self
            .post(
                "/api/emails",
                json!({ "raw_email": raw, "mail_account": "gmail_marco" }),
            )
            .await;
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

/// Start a test server on a random port.
async fn start_server() -> TestServer {
    let journal = Arc::new(JournalTarget::new());
    let registries = Arc::new(AdapterRegistries::builtin(journal.clone()));
    let router = Arc::new(RoutingEngine::new(
        AppConfig::sample(),
        Arc::clone(&registries),
        RetryPolicy::default(),
    ));
    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&registries),
        DeliveryStore::new(),
        router,
    ));
    let app = api_routes(pipeline, registries);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://{addr}"),
        journal,
        client: reqwest::Client::new(),
    }
}

// ── Health ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_and_ping() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let health: Value = server.get("/health").await.json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let ping: Value = server.get("/ping").await.json().await.unwrap();
        assert_eq!(ping["message"], "pong");
    })
    .await
    .expect("test timed out");
}

// ── Ingestion ───────────────────────────────────────────────────────────

#[tokio::test]
async fn dhl_email_is_stored_and_delivered_to_both_targets() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let report = server.submit(DHL_ANNOUNCED).await;
        assert_eq!(report["result"], "routed");
        assert_eq!(report["was_new"], true);
        assert_eq!(report["event"]["carrier"], "DE_DHL");
        assert_eq!(report["event"]["tracking_id"], "123456789");
        assert_eq!(report["event"]["status"], "announced");
        assert_eq!(report["event"]["date_expected"], "2026-10-21");
        assert_eq!(report["event"]["time_window"]["start"], "14:00:00");
        assert_eq!(report["route"]["dispatched"], json!(["ntfy_daily", "calendar_home"]));

        let id = report["event"]["id"].as_str().unwrap().to_string();
        let outcomes: Value = server
            .get(&format!("/deliveries/{id}/outcomes"))
            .await
            .json()
            .await
            .unwrap();
        let outcomes = outcomes.as_array().unwrap();
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert_eq!(outcome["state"], "delivered");
            assert_eq!(outcome["attempt_count"], 1);
        }

        let deliveries: Value = server.get("/deliveries").await.json().await.unwrap();
        assert_eq!(deliveries.as_array().unwrap().len(), 1);
        assert_eq!(server.journal.entries().await.len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn repeated_email_is_deduplicated() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        server.submit(DHL_ANNOUNCED).await;
        let second = server.submit(DHL_ANNOUNCED).await;

        assert_eq!(second["was_new"], false);
        assert_eq!(second["route"]["dispatched"], json!([]));
        let deliveries: Value = server.get("/deliveries").await.json().await.unwrap();
        assert_eq!(deliveries.as_array().unwrap().len(), 1);
        assert_eq!(server.journal.entries().await.len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_update_redelivers_and_extends_history() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        server.submit(DHL_ANNOUNCED).await;
        let update = server.submit(DHL_OUT_FOR_DELIVERY).await;
        assert_eq!(update["event"]["status"], "out_for_delivery");
        assert_eq!(update["route"]["dispatched"].as_array().unwrap().len(), 2);

        let id = update["event"]["id"].as_str().unwrap().to_string();
        let history: Value = server
            .get(&format!("/deliveries/{id}/history"))
            .await
            .json()
            .await
            .unwrap();
        let statuses: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["to"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["announced", "out_for_delivery"]);
        assert_eq!(server.journal.entries().await.len(), 4);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_account_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = server
            .post(
                "/api/emails",
                json!({ "raw_email": DHL_ANNOUNCED, "mail_account": "hotmail_bob" }),
            )
            .await;
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("hotmail_bob"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_delivery_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        assert_eq!(server.get("/deliveries/nope/outcomes").await.status(), 404);
        assert_eq!(server.get("/deliveries/nope/history").await.status(), 404);
    })
    .await
    .expect("test timed out");
}

// ── Date views ──────────────────────────────────────────────────────────

#[tokio::test]
async fn deliveries_by_date() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.submit(DHL_ANNOUNCED).await;

        let today = Local::now().date_naive().format("%d.%m.%Y").to_string();
        let hermes_today = format!(
            "From: noreply@myhermes.de\r\n\
             Subject: Deine Hermes Sendung\r\n\
             \r\n\
             Sendungsnummer: HERMES-987654\r\n\
             Zustellung am {today}\r\n"
        );
        let resp = server
            .post(
                "/api/emails",
                json!({ "raw_email": hermes_today, "mail_account": "gmail_partner" }),
            )
            .await;
        assert_eq!(resp.status(), 200);

        let carriers = |list: &Value| -> Vec<String> {
            list.as_array()
                .unwrap()
                .iter()
                .map(|e| e["carrier"].as_str().unwrap().to_string())
                .collect()
        };

        let on_date: Value = server.get("/deliveries/date/2026-10-21").await.json().await.unwrap();
        assert!(carriers(&on_date).contains(&"DE_DHL".to_string()));

        let todays: Value = server.get("/deliveries/today").await.json().await.unwrap();
        assert!(carriers(&todays).contains(&"DE_HERMES".to_string()));
        assert!(todays.as_array().unwrap().len() <= 2);

        assert_eq!(server.get("/deliveries/date/21.10.2026").await.status(), 400);
    })
    .await
    .expect("test timed out");
}

// ── Metadata ────────────────────────────────────────────────────────────

#[tokio::test]
async fn meta_endpoints_list_registered_keys() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let adapters: Value = server.get("/meta/adapters").await.json().await.unwrap();
        assert_eq!(adapters["providers"], json!(["gmail", "generic_imap"]));
        assert_eq!(adapters["parsers"], json!(["DE_DHL", "DE_HERMES", "AMAZON_UK"]));
        assert_eq!(
            adapters["targets"],
            json!(["google_calendar", "calendar_ics", "todo_generic", "ntfy_push"])
        );

        let parsers: Value = server.get("/meta/parsers").await.json().await.unwrap();
        assert_eq!(parsers, adapters["parsers"]);

        let config: Value = server.get("/meta/config").await.json().await.unwrap();
        assert_eq!(config["routing_rules"][0]["id"], "rule-dhl-marco");
    })
    .await
    .expect("test timed out");
}

// ── Debug parse ─────────────────────────────────────────────────────────

#[tokio::test]
async fn debug_parse_does_not_store() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let parsed: Value = server
            .post(
                "/debug/parse-email",
                json!({ "raw_email": DHL_ANNOUNCED, "provider_hint": "gmail" }),
            )
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(parsed["parsed"], true);
        assert_eq!(parsed["event"]["tracking_id"], "123456789");
        assert_eq!(parsed["event"]["raw_metadata"]["provider"], "gmail");

        let deliveries: Value = server.get("/deliveries").await.json().await.unwrap();
        assert!(deliveries.as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn debug_parse_reports_failure_reason() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let failed: Value = server
            .post(
                "/debug/parse-email",
                json!({ "raw_email": "From: alice@example.com\r\nSubject: hi\r\n\r\nLunch?\r\n" }),
            )
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(failed["parsed"], false);
        assert_eq!(failed["failure"]["reason"], "no_matching_parser");
        assert_eq!(failed["available_parsers"].as_array().unwrap().len(), 3);
    })
    .await
    .expect("test timed out");
}
