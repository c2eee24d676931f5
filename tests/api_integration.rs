//! Integration tests for the outreach REST, webhook, and WebSocket surface.
//!
//! Each test spins up an Axum server on a random port with a stub telephony
//! transport, then drives it with reqwest and tokio-tungstenite.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use shelter_outreach::api::routes;
use shelter_outreach::config::{OutreachConfig, SafetyConfig};
use shelter_outreach::error::TelephonyError;
use shelter_outreach::orchestrator::Orchestrator;
use shelter_outreach::scripting::ScriptGenerator;
use shelter_outreach::telephony::{PlaceCallRequest, Telephony};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub transport: sequential SIDs, no network.
#[derive(Default)]
struct StubTelephony {
    next: AtomicU64,
    messages: AtomicU64,
}

#[async_trait]
impl Telephony for StubTelephony {
    fn name(&self) -> &str {
        "stub"
    }

    async fn place_call(&self, _request: PlaceCallRequest) -> Result<String, TelephonyError> {
        Ok(format!("CA{:04}", self.next.fetch_add(1, Ordering::SeqCst)))
    }

    async fn send_message(&self, _to: &str, _body: &str) -> Result<String, TelephonyError> {
        self.messages.fetch_add(1, Ordering::SeqCst);
        Ok("SM0001".into())
    }
}

/// Start an Axum server on a random port, return (base url, orchestrator, transport).
async fn start_server() -> (String, Arc<Orchestrator>, Arc<StubTelephony>) {
    let telephony = Arc::new(StubTelephony::default());
    let config = OutreachConfig {
        public_base_url: Some("https://outreach.example".into()),
        safety: SafetyConfig {
            require_escalation_for_live: true,
            blocked_numbers: vec!["+15105550999".into()],
        },
        ..OutreachConfig::default()
    };
    let orchestrator = Arc::new(
        Orchestrator::new(config)
            .with_live_telephony(telephony.clone())
            .with_dry_run_telephony(telephony.clone())
            .with_scripts(ScriptGenerator::fallback_only()),
    );
    let app = routes(Arc::clone(&orchestrator));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("127.0.0.1:{port}"), orchestrator, telephony)
}

fn job_body(mode: &str, context: &str) -> Value {
    json!({
        "mode": mode,
        "survivor_context": context,
        "callback_number": "415-555-0199",
        "targets": [
            {"shelter_id": 1, "shelter_name": "No Phone Shelter", "intake_phone": null},
            {"shelter_id": 2, "shelter_name": "Harbor House", "intake_phone": "(510) 555-0102", "city": "Oakland", "state": "CA"}
        ]
    })
}

async fn post_job(client: &reqwest::Client, addr: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("http://{addr}/api/call-jobs"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn post_status(client: &reqwest::Client, addr: &str, sid: &str, status: &str) -> Value {
    client
        .post(format!("http://{addr}/webhooks/twilio/status"))
        .form(&[("CallSid", sid), ("CallStatus", status)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

// ── WebSocket ────────────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_empty_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("WS connect failed");

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "snapshot");
        assert!(json["jobs"].as_array().unwrap().is_empty());
        assert!(json["transfers"].as_array().unwrap().is_empty());
        assert!(json["escalations"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_streams_job_updates() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let _ = ws.next().await.unwrap().unwrap();

        let client = reqwest::Client::new();
        let job: Value = post_job(&client, &addr, job_body("dry_run", "one adult"))
            .await
            .json()
            .await
            .unwrap();

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "job_updated");
        assert_eq!(json["job"]["job_id"], job["job_id"]);
    })
    .await
    .expect("test timed out");
}

// ── Call jobs ────────────────────────────────────────────────────────

#[tokio::test]
async fn call_job_lifecycle_through_webhooks() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;
        let client = reqwest::Client::new();

        let resp = post_job(&client, &addr, job_body("dry_run", "one adult")).await;
        assert_eq!(resp.status(), 201);
        let job: Value = resp.json().await.unwrap();
        let job_id = job["job_id"].as_str().unwrap().to_string();

        assert_eq!(job["status"], "in_progress");
        assert_eq!(job["attempts"][0]["status"], "failed");
        assert_eq!(job["attempts"][0]["error"], "No intake phone number on file");
        assert_eq!(job["attempts"][1]["status"], "initiated");
        assert_eq!(job["attempts"][1]["script_source"], "fallback");
        let sid = job["attempts"][1]["provider_call_sid"].as_str().unwrap().to_string();

        let ack = post_status(&client, &addr, &sid, "ringing").await;
        assert_eq!(ack["status"], "applied");
        let ack = post_status(&client, &addr, &sid, "completed").await;
        assert_eq!(ack["status"], "applied");

        let job: Value = reqwest::get(format!("http://{addr}/api/call-jobs/{job_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(job["attempts"][1]["status"], "completed");
        assert_eq!(job["status"], "failed");

        let jobs: Value = reqwest::get(format!("http://{addr}/api/call-jobs"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transcript_webhook_attaches_parsed_outcome() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, tel) = start_server().await;
        let client = reqwest::Client::new();

        let job: Value = post_job(&client, &addr, job_body("live", "one adult"))
            .await
            .json()
            .await
            .unwrap();
        let job_id = job["job_id"].as_str().unwrap();
        let sid = job["attempts"][1]["provider_call_sid"].as_str().unwrap();

        let ack: Value = client
            .post(format!("http://{addr}/webhooks/twilio/transcript"))
            .json(&json!({"call_sid": sid, "transcript": "We have 4 beds available. Bring ID."}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ack["status"], "applied");

        let job: Value = reqwest::get(format!("http://{addr}/api/call-jobs/{job_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let parsed = &job["attempts"][1]["parsed_transcript"];
        assert_eq!(parsed["availability_status"], "available");
        assert_eq!(parsed["reported_available_beds"], 4);
        assert_eq!(tel.messages.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn high_risk_live_job_is_denied() {
    timeout(TEST_TIMEOUT, async {
        let (addr, orch, _tel) = start_server().await;
        let client = reqwest::Client::new();

        let resp = post_job(&client, &addr, job_body("live", "reports trafficking concerns")).await;
        assert_eq!(resp.status(), 403);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "policy_denied");
        let escalation_id = body["escalation_id"].as_str().unwrap().to_string();

        let escalations: Value = reqwest::get(format!("http://{addr}/api/safety/escalations?limit=5"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(escalations[0]["escalation_id"], escalation_id);
        assert_eq!(escalations[0]["source"], "call_job");
        assert!(orch.jobs().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reset_drops_jobs_and_late_webhooks_are_ignored() {
    timeout(TEST_TIMEOUT, async {
        let (addr, orch, _tel) = start_server().await;
        let client = reqwest::Client::new();

        let job: Value = post_job(&client, &addr, job_body("dry_run", "one adult"))
            .await
            .json()
            .await
            .unwrap();
        let sid = job["attempts"][1]["provider_call_sid"].as_str().unwrap().to_string();

        let resp = client
            .post(format!("http://{addr}/api/admin/reset"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(orch.jobs().is_empty());

        let ack = post_status(&client, &addr, &sid, "completed").await;
        assert_eq!(ack["status"], "ignored");
    })
    .await
    .expect("test timed out");
}

// ── Warm transfers ───────────────────────────────────────────────────

#[tokio::test]
async fn warm_transfer_status_is_last_write_wins() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;
        let client = reqwest::Client::new();

        let job: Value = post_job(&client, &addr, job_body("dry_run", "one adult"))
            .await
            .json()
            .await
            .unwrap();

        let resp = client
            .post(format!("http://{addr}/api/warm-transfers"))
            .json(&json!({
                "job_id": job["job_id"],
                "attempt_id": job["attempts"][1]["attempt_id"],
                "survivor_phone": "415-555-0199",
                "survivor_name": "J"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let session: Value = resp.json().await.unwrap();
        let transfer_id = session["transfer_id"].as_str().unwrap();
        assert_eq!(session["status"], "connecting");
        assert_eq!(session["shelter_phone"], "+15105550102");
        let survivor_sid = session["call_sids"]["survivor"].as_str().unwrap();
        let shelter_sid = session["call_sids"]["shelter"].as_str().unwrap();

        post_status(&client, &addr, survivor_sid, "answered").await;
        let current: Value = reqwest::get(format!("http://{addr}/api/warm-transfers/{transfer_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(current["status"], "bridged");

        post_status(&client, &addr, shelter_sid, "busy").await;
        let current: Value = reqwest::get(format!("http://{addr}/api/warm-transfers/{transfer_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(current["status"], "failed");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn warm_transfer_for_unknown_job_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/api/warm-transfers"))
            .json(&json!({
                "job_id": uuid::Uuid::new_v4(),
                "attempt_id": uuid::Uuid::new_v4(),
                "survivor_phone": "415-555-0199"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

// ── Safety + health ──────────────────────────────────────────────────

#[tokio::test]
async fn health_and_safety_config() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _orch, _tel) = start_server().await;

        let health: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["live_telephony"], true);
        assert_eq!(health["llm"], false);

        let config: Value = reqwest::get(format!("http://{addr}/api/safety/config"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(config["require_escalation_for_live"], true);
        assert_eq!(config["blocked_numbers_count"], 1);

        let blocked: Value = reqwest::get(format!("http://{addr}/api/safety/blocked-numbers"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(blocked["blocked_numbers"][0], "+15105550999");
    })
    .await
    .expect("test timed out");
}
