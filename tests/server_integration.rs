//! End-to-end tests for the HTTP surface.
//!
//! The pipelines run for real (agent loop, freshness gate, synthesis,
//! coercion, notification dispatch); only the external services are
//! replaced by in-process stubs. Each test binds a real server to a free
//! port and talks to it with `reqwest`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crm_insight::agent::{AgentOptions, QuestionAnswerer, ToolAgent};
use crm_insight::config::{load_config, SamplingConfig, UploadConfig};
use crm_insight::index::DocumentIndex;
use crm_insight::issue::IssueStage;
use crm_insight::llm::{AssistantMessage, ChatMessage, LanguageModel, ToolCall, ToolSpec};
use crm_insight::models::{IssueRecord, RawDoc, RetrievedDocument, Severity};
use crm_insight::notify::Notifier;
use crm_insight::retriever::{FreshnessGatedRetriever, FreshnessPolicy};
use crm_insight::server::{run_server, run_server_with, Services};
use crm_insight::storage::ObjectStore;
use crm_insight::synthesize::GroundedSynthesizer;
use crm_insight::templates::TemplateStage;
use crm_insight::tools::{PdfSearchTool, ToolRegistry};
use crm_insight::upload::VocUploader;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Stubs ──────────────────────────────────────────────────────────

const QUESTION: &str = "장바구니 이탈이 높은 이유는?";
const CONTEXT: &str = "이탈율 62%, 로딩 3.2s";

const ISSUE_JSON: &str = r#"{
  "title": "장바구니 로딩 지연으로 이탈 증가",
  "severity": "High",
  "tasks": {
    "Dev": ["결제 페이지 TTFB 1s 이하로 개선", "이미지 지연 로딩 적용", "장바구니 보존 7일"],
    "PM": ["이탈 구간 데이터 분석", "리마인드 시나리오 설계", "AB 테스트 기획"],
    "Design": ["로딩 상태 안내 UX 개선", "이어하기 CTA 고정", "배송비 안내 시각화"]
  }
}"#;

const TEMPLATES_JSON: &str = r#"[
  {"copy": "장바구니에 담긴 상품이 기다려요", "rationale": "재방문 유도"},
  {"copy": "지금 결제하면 무료배송", "rationale": "배송비 불안 해소"},
  {"copy": "오늘만 5% 추가 할인", "rationale": "긴급성"}
]"#;

/// Model stub that answers by stage, recognized from the prompt.
///
/// - Agent turns (tools offered): call `pdf_search` once, then echo the
///   tool result as the final answer.
/// - Synthesis: a bullet built from the context when the stub context is
///   present.
/// - Issue and template prompts: fixed JSON.
struct RoutingModel {
    issue_reply: String,
    issue_prompts: Mutex<Vec<String>>,
    agent_calls: AtomicUsize,
}

impl RoutingModel {
    fn new(issue_reply: &str) -> Arc<Self> {
        Arc::new(Self {
            issue_reply: issue_reply.to_string(),
            issue_prompts: Mutex::new(Vec::new()),
            agent_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageModel for RoutingModel {
    fn model_name(&self) -> &str {
        "routing-stub"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        _sampling: SamplingConfig,
    ) -> Result<AssistantMessage> {
        if !tools.is_empty() {
            self.agent_calls.fetch_add(1, Ordering::SeqCst);
            let tool_result = messages.iter().rev().find_map(|m| match m {
                ChatMessage::Tool { content, .. } => Some(content.clone()),
                _ => None,
            });
            return Ok(match tool_result {
                Some(content) => AssistantMessage::text(content),
                None => {
                    let question = messages
                        .iter()
                        .find_map(|m| match m {
                            ChatMessage::User(q) => Some(q.clone()),
                            _ => None,
                        })
                        .unwrap_or_default();
                    AssistantMessage {
                        content: None,
                        tool_calls: vec![ToolCall {
                            id: "call_1".into(),
                            name: "pdf_search".into(),
                            arguments: json!({ "query": question }),
                        }],
                    }
                }
            });
        }

        let prompt = match messages.last() {
            Some(ChatMessage::User(p)) => p.clone(),
            _ => String::new(),
        };

        if prompt.contains("triage-ready issue") {
            self.issue_prompts.lock().unwrap().push(prompt);
            return Ok(AssistantMessage::text(self.issue_reply.clone()));
        }
        if prompt.contains("CRM copywriter") {
            return Ok(AssistantMessage::text(TEMPLATES_JSON));
        }
        if prompt.contains(&format!("Context:\n{}", CONTEXT)) {
            return Ok(AssistantMessage::text(format!("• {} → 결제 로딩 개선 필요", CONTEXT)));
        }
        Ok(AssistantMessage::text("문서에서 답을 찾을 수 없습니다."))
    }
}

/// Primary index stub returning fixed pre-typed documents.
struct StubIndex {
    label: &'static str,
    docs: Vec<&'static str>,
    calls: AtomicUsize,
}

impl StubIndex {
    fn new(label: &'static str, docs: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            label,
            docs,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentIndex for StubIndex {
    fn name(&self) -> &str {
        self.label
    }

    async fn query(&self, _text: &str) -> Result<Vec<RawDoc>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .docs
            .iter()
            .map(|d| RawDoc::Document(RetrievedDocument::from_text(*d)))
            .collect())
    }
}

/// Object store stub: fixed freshness, uploads kept in memory.
struct MemoryStore {
    newest: Option<DateTime<Utc>>,
    uploads: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn latest_modified(&self, _suffix: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.newest)
    }

    async fn put_object(&self, key: &str, _body: Vec<u8>, content_type: &str) -> Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string()));
        Ok(format!("https://storage.test/uploads/{}", key))
    }
}

struct RecordingNotifier {
    sent: Mutex<Vec<IssueRecord>>,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, issue: &IssueRecord) -> Result<()> {
        self.sent.lock().unwrap().push(issue.clone());
        if self.fail {
            anyhow::bail!("webhook returned 500");
        }
        Ok(())
    }
}

/// Answerer that outlives any short request timeout.
struct StalledAnswerer;

#[async_trait]
impl QuestionAnswerer for StalledAnswerer {
    async fn answer(&self, _question: &str) -> crm_insight::error::Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("too late".to_string())
    }
}

struct Harness {
    model: Arc<RoutingModel>,
    primary: Arc<StubIndex>,
    secondary: Arc<StubIndex>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(issue_reply: &str, notify_fails: bool) -> Self {
        Self {
            model: RoutingModel::new(issue_reply),
            primary: StubIndex::new("primary index", vec![CONTEXT]),
            secondary: StubIndex::new("secondary index", vec![]),
            store: Arc::new(MemoryStore {
                newest: Some(Utc::now() - ChronoDuration::days(2)),
                uploads: Mutex::new(Vec::new()),
            }),
            notifier: Arc::new(RecordingNotifier {
                sent: Mutex::new(Vec::new()),
                fail: notify_fails,
            }),
        }
    }

    fn services(&self) -> Services {
        let sampling = SamplingConfig {
            temperature: 0.0,
            max_tokens: 512,
        };
        let retriever = Arc::new(FreshnessGatedRetriever::new(
            self.primary.clone(),
            self.secondary.clone(),
            self.store.clone(),
            FreshnessPolicy::default(),
        ));
        let synthesizer = Arc::new(GroundedSynthesizer::new(self.model.clone(), sampling));

        let mut tools = ToolRegistry::new();
        tools.register(Box::new(PdfSearchTool::new(retriever.clone(), synthesizer)));
        let agent = Arc::new(ToolAgent::new(
            self.model.clone(),
            tools,
            AgentOptions {
                max_rounds: 10,
                tool_timeout: Duration::from_secs(10),
                sampling,
            },
        ));

        Services {
            retriever,
            answerer: agent.clone(),
            issues: Arc::new(IssueStage::new(self.model.clone(), sampling).with_answerer(agent)),
            templates: Arc::new(TemplateStage::new(self.model.clone(), sampling)),
            uploader: Arc::new(VocUploader::new(
                self.store.clone(),
                UploadConfig::default(),
                None,
            )),
            notifier: self.notifier.clone(),
            notify_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    async fn start(&self) -> (u16, tokio::task::JoinHandle<()>) {
        self.start_with(self.services()).await
    }

    async fn start_with(&self, services: Services) -> (u16, tokio::task::JoinHandle<()>) {
        let port = find_free_port();
        let handle = tokio::spawn(async move {
            run_server_with(services, &format!("127.0.0.1:{}", port))
                .await
                .ok();
        });
        wait_for_server(port).await;
        (port, handle)
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn wait_for_notifications(notifier: &RecordingNotifier, count: usize) {
    for _ in 0..50 {
        if notifier.sent.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("notification was not dispatched");
}

// ─── Tests ──────────────────────────────────────────────────────────

/// Question → agent → pdf_search → grounded answer → issue record, with
/// the record returned verbatim and handed to the notifier.
#[tokio::test]
async fn test_issue_end_to_end_with_tools() {
    let h = Harness::new(ISSUE_JSON, false);
    let (port, server) = h.start().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/issues", port))
        .json(&json!({ "question": QUESTION, "useTools": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let issue: IssueRecord = resp.json().await.unwrap();
    let expected: IssueRecord = serde_json::from_str(ISSUE_JSON).unwrap();
    assert_eq!(issue, expected);
    assert_eq!(issue.severity, Severity::High);
    for (_, tasks) in issue.tasks.by_role() {
        assert_eq!(tasks.len(), 3);
    }

    // The issue prompt was grounded in the retrieved document.
    let prompts = h.model.issue_prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(CONTEXT), "issue prompt: {}", prompts[0]);

    // Fresh corpus with hits: the secondary index is never consulted.
    assert_eq!(h.primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.secondary.calls.load(Ordering::SeqCst), 0);

    wait_for_notifications(&h.notifier, 1).await;
    assert_eq!(h.notifier.sent.lock().unwrap()[0], expected);

    server.abort();
}

#[tokio::test]
async fn test_issue_without_tools_skips_agent() {
    let h = Harness::new(ISSUE_JSON, false);
    let (port, server) = h.start().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/issues", port))
        .json(&json!({ "question": QUESTION }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(h.model.agent_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.primary.calls.load(Ordering::SeqCst), 0);
    let prompts = h.model.issue_prompts.lock().unwrap().clone();
    assert!(prompts[0].contains(&format!("Answer (context):\n{}", QUESTION)));

    server.abort();
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_request() {
    let h = Harness::new(ISSUE_JSON, true);
    let (port, server) = h.start().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/issues", port))
        .json(&json!({ "question": QUESTION, "use_tools": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    wait_for_notifications(&h.notifier, 1).await;

    server.abort();
}

#[tokio::test]
async fn test_malformed_issue_is_500_with_stage_prefix() {
    let h = Harness::new("I could not produce JSON today.", false);
    let (port, server) = h.start().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/issues", port))
        .json(&json!({ "question": QUESTION }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.starts_with("Issue Error:"), "got: {}", message);
    assert!(message.contains("malformed model output"));

    // Nothing to notify about.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.notifier.sent.lock().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_request_timeout_is_500_with_stage_prefix() {
    let h = Harness::new(ISSUE_JSON, false);
    let mut services = h.services();
    services.answerer = Arc::new(StalledAnswerer);
    services.request_timeout = Duration::from_millis(200);
    let (port, server) = h.start_with(services).await;

    let started = std::time::Instant::now();
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/research", port))
        .json(&json!({ "question": QUESTION }))
        .send()
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.starts_with("QA Error:"), "got: {}", message);
    assert!(message.contains("timed out after 200ms"), "got: {}", message);

    server.abort();
}

#[tokio::test]
async fn test_research_answer() {
    let h = Harness::new(ISSUE_JSON, false);
    let (port, server) = h.start().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/api/research", port))
        .json(&json!({ "question": QUESTION }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let answer = body["answer"].as_str().unwrap();
    assert!(answer.contains("62%"), "got: {}", answer);

    server.abort();
}

#[tokio::test]
async fn test_templates_accept_both_casings() {
    let h = Harness::new(ISSUE_JSON, false);
    let (port, server) = h.start().await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/api/templates", port);

    for body in [
        json!({
            "businessDesc": "패션 커머스",
            "funnelStage": "cart",
            "tone": "친근한",
            "insight": "장바구니 이탈 62%"
        }),
        json!({
            "business_desc": "패션 커머스",
            "funnel_stage": "cart",
            "tone": "친근한",
            "insight": "장바구니 이탈 62%"
        }),
    ] {
        let resp = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let messages: Vec<Value> = resp.json().await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["copy"], "지금 결제하면 무료배송");
    }

    server.abort();
}

#[tokio::test]
async fn test_voc_upload_rules() {
    let h = Harness::new(ISSUE_JSON, false);
    let (port, server) = h.start().await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/api/voc", port);

    // Valid upload.
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"customer said checkout is slow".to_vec())
            .file_name("March_VOC.txt"),
    );
    let resp = client.post(&url).multipart(form).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["fileUrl"], "https://storage.test/uploads/March_VOC.txt");
    assert_eq!(
        h.store.uploads.lock().unwrap()[0],
        ("March_VOC.txt".to_string(), "text/plain".to_string())
    );

    // Missing marker.
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![1, 2, 3]).file_name("report.pdf"),
    );
    let resp = client.post(&url).multipart(form).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // No file field.
    let form = reqwest::multipart::Form::new().text("note", "hello");
    let resp = client.post(&url).multipart(form).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "file is required");

    assert_eq!(h.store.uploads.lock().unwrap().len(), 1);
    server.abort();
}

/// A server built purely from a config file with every external service
/// left unconfigured still starts, and reports each failure under its
/// stage prefix.
#[tokio::test]
async fn test_server_from_unconfigured_config() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("crmi.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "[server]\nbind = \"127.0.0.1:{}\"", port).unwrap();
    drop(f);

    let cfg = load_config(&path).unwrap();
    let server = tokio::spawn(async move {
        run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/research", port))
        .json(&json!({ "question": QUESTION }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("QA Error:"));

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![0u8; 4]).file_name("a_voc.pdf"),
    );
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/voc", port))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["error"]["message"],
        "upload failed: storage connection not configured"
    );

    server.abort();
}
