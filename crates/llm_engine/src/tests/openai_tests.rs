use super::*;
use crate::MissingEngineFactory;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::ChatRole;
use std::sync::Mutex;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct MockEngineState {
    completion_bodies: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    fail_completions: bool,
}

impl MockEngineState {
    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.auth_headers.lock().expect("lock").push(auth);
    }
}

async fn list_models(State(state): State<MockEngineState>, headers: HeaderMap) -> Json<Value> {
    state.record_auth(&headers);
    Json(json!({
        "object": "list",
        "data": [{ "id": "tiny-chat", "object": "model" }]
    }))
}

async fn complete(
    State(state): State<MockEngineState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.record_auth(&headers);
    if state.fail_completions {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let last = body["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|message| message["content"].as_str())
        .unwrap_or_default()
        .to_string();
    state.completion_bodies.lock().expect("lock").push(body);
    Ok(Json(json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": format!("echo: {last}") }
        }]
    })))
}

async fn spawn_mock_engine(state: MockEngineState) -> anyhow::Result<Url> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(complete))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(Url::parse(&format!("http://{addr}"))?)
}

fn factory(base_url: Url, api_key: Option<&str>) -> OpenAiCompatFactory {
    OpenAiCompatFactory::new(OpenAiCompatConfig {
        base_url,
        api_key: api_key.map(str::to_string),
        request_timeout: Duration::from_secs(5),
    })
    .expect("factory")
}

fn collecting_sink() -> (Arc<dyn ProgressSink>, Arc<Mutex<Vec<InitProgress>>>) {
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let sink_ticks = ticks.clone();
    let sink: Arc<dyn ProgressSink> = Arc::new(move |tick: InitProgress| {
        sink_ticks.lock().expect("lock").push(tick);
    });
    (sink, ticks)
}

#[tokio::test]
async fn create_reports_progress_then_completes_against_served_model() {
    let state = MockEngineState::default();
    let base_url = spawn_mock_engine(state.clone()).await.expect("mock engine");
    let (sink, ticks) = collecting_sink();

    let engine = factory(base_url, None)
        .create("tiny-chat", sink)
        .await
        .expect("engine");

    {
        let ticks = ticks.lock().expect("lock");
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].progress, 0.0);
        assert!(ticks[0].text.starts_with("Connecting to http://127.0.0.1:"));
        assert_eq!(ticks[1], InitProgress::new("Model tiny-chat available", 1.0));
    }

    let history = vec![ChatTurn::system("be brief"), ChatTurn::user("hello")];
    let text = engine
        .chat_completion(&history)
        .await
        .expect("completion")
        .into_text()
        .expect("text");
    assert_eq!(text, "echo: hello");

    let bodies = state.completion_bodies.lock().expect("lock");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "tiny-chat");
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert_eq!(bodies[0]["messages"][1]["role"], "user");
}

#[tokio::test]
async fn create_fails_when_model_is_not_served() {
    let base_url = spawn_mock_engine(MockEngineState::default())
        .await
        .expect("mock engine");
    let (sink, ticks) = collecting_sink();

    let err = match factory(base_url, None).create("giant-chat", sink).await {
        Ok(_) => panic!("unknown model should not produce an engine"),
        Err(err) => err,
    };

    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::ModelNotFound(model)) if model == "giant-chat"
    ));
    assert_eq!(ticks.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn api_key_is_sent_as_bearer_token() {
    let state = MockEngineState::default();
    let base_url = spawn_mock_engine(state.clone()).await.expect("mock engine");
    let (sink, _) = collecting_sink();

    let engine = factory(base_url, Some("secret"))
        .create("tiny-chat", sink)
        .await
        .expect("engine");
    engine
        .chat_completion(&[ChatTurn::user("hi")])
        .await
        .expect("completion");

    let auth = state.auth_headers.lock().expect("lock");
    assert_eq!(auth.len(), 2);
    assert!(auth
        .iter()
        .all(|value| value.as_deref() == Some("Bearer secret")));
}

#[tokio::test]
async fn completion_server_error_is_reported() {
    let state = MockEngineState {
        fail_completions: true,
        ..MockEngineState::default()
    };
    let base_url = spawn_mock_engine(state).await.expect("mock engine");
    let (sink, _) = collecting_sink();
    let engine = factory(base_url, None)
        .create("tiny-chat", sink)
        .await
        .expect("engine");

    let err = engine
        .chat_completion(&[ChatTurn::new(ChatRole::User, "hi")])
        .await
        .expect_err("should fail");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn missing_factory_never_produces_an_engine() {
    let (sink, ticks) = collecting_sink();
    let err = match MissingEngineFactory.create("tiny-chat", sink).await {
        Ok(_) => panic!("missing factory should fail"),
        Err(err) => err,
    };
    assert_eq!(err.to_string(), "inference engine is unavailable");
    assert!(ticks.lock().expect("lock").is_empty());
}

#[test]
fn endpoint_keeps_base_path_prefix() {
    let base = Url::parse("http://localhost:8080/api").expect("url");
    assert_eq!(
        endpoint(&base, "v1/models").expect("endpoint").as_str(),
        "http://localhost:8080/api/v1/models"
    );
    let root = Url::parse("http://localhost:8080").expect("url");
    assert_eq!(
        endpoint(&root, "v1/chat/completions")
            .expect("endpoint")
            .as_str(),
        "http://localhost:8080/v1/chat/completions"
    );
}
