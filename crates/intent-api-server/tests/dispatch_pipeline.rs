use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intent_api_server::config::ClassifierConfig;
use intent_api_server::models::ClassifyRequest;
use intent_api_server::services::action_runner::{ActionError, ActionOutput, ActionRunner};
use intent_api_server::services::dispatch_service::DispatchError;
use intent_api_server::services::session::Role;
use intent_api_server::services::{ClassifierService, DispatchConfig, DispatchService, SessionStore};

const CHAT_PATH: &str = "/v1/chat/completions";
const INSTRUCTION: &str = "Available actions: llamada, mensaje, correo.";

#[derive(Default)]
struct RecordingRunner {
    ran: Mutex<Vec<String>>,
}

#[async_trait]
impl ActionRunner for RecordingRunner {
    async fn run_action(&self, name: &str) -> Result<ActionOutput, ActionError> {
        self.ran.lock().push(name.to_string());
        Ok(ActionOutput {
            message: "ok".into(),
            status: "success".into(),
        })
    }
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

async fn classifier_answering(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
        .mount(&server)
        .await;
    server
}

fn pipeline(server: &MockServer, runner: Arc<RecordingRunner>) -> DispatchService {
    let config = ClassifierConfig::new(format!("{}{}", server.uri(), CHAT_PATH), "gemma-3-1b-it");
    let classifier = Arc::new(ClassifierService::new(&config, INSTRUCTION).unwrap());
    DispatchService::new(
        Arc::new(SessionStore::new(16)),
        classifier,
        runner,
        DispatchConfig {
            allowed_actions: vec!["llamada".into(), "mensaje".into(), "correo".into()],
            system_instruction: INSTRUCTION.into(),
            serialize_turns: false,
        },
    )
}

#[tokio::test]
async fn test_first_request_classifies_and_runs_action() {
    let server = classifier_answering(r#"{"action":"mensaje"}"#).await;
    let runner = Arc::new(RecordingRunner::default());
    let svc = pipeline(&server, runner.clone());
    let before = svc.store().get_context("s1").metadata().last_updated;

    let response = svc
        .dispatch(
            &ClassifyRequest::new("s1", "quiero enviar un mensaje"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"action": "mensaje", "message": "ok", "status": "success"})
    );
    assert_eq!(*runner.ran.lock(), vec!["mensaje".to_string()]);

    let ctx = svc.store().get_context("s1");
    assert!(ctx.metadata().last_updated > before);
    let messages = ctx.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "quiero enviar un mensaje");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], INSTRUCTION);
    assert_eq!(body["messages"][1]["content"], "quiero enviar un mensaje");
}

#[tokio::test]
async fn test_second_turn_sends_whole_history() {
    let server = classifier_answering(r#"{"action":"llamada"}"#).await;
    let svc = pipeline(&server, Arc::new(RecordingRunner::default()));
    let cancel = CancellationToken::new();

    svc.dispatch(&ClassifyRequest::new("s1", "call mom"), &cancel)
        .await
        .unwrap();
    svc.dispatch(&ClassifyRequest::new("s1", "again please"), &cancel)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[1].body_json().unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"], "call mom");
    assert_eq!(messages[2]["content"], "again please");

    let system_count = svc
        .store()
        .get_context("s1")
        .messages()
        .iter()
        .filter(|m| m.role == Role::System)
        .count();
    assert_eq!(system_count, 1);
}

#[tokio::test]
async fn test_unknown_action_never_reaches_runner() {
    let server = classifier_answering(r#"{"action":"volar"}"#).await;
    let runner = Arc::new(RecordingRunner::default());
    let svc = pipeline(&server, runner.clone());

    let err = svc
        .dispatch(&ClassifyRequest::new("s2", "fly me"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::UnknownAction(ref a) if a == "volar"));
    assert!(runner.ran.lock().is_empty());
    // the user turn is kept even though the request failed
    assert_eq!(svc.store().get_context("s2").message_count(), 2);
}

#[tokio::test]
async fn test_classifier_outage_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .mount(&server)
        .await;
    let runner = Arc::new(RecordingRunner::default());
    let svc = pipeline(&server, runner.clone());

    let err = svc
        .dispatch(&ClassifyRequest::new("s3", "hola"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ClassifierUnavailable");
    assert!(err.to_string().contains("model loading"));
    assert!(runner.ran.lock().is_empty());
}

#[tokio::test]
async fn test_concurrent_first_reference_shares_one_context() {
    let store = Arc::new(SessionStore::new(8));

    let handles = (0..16).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let ctx = store.get_context("shared");
            ctx.add_message(Role::User, format!("message {}", i));
            ctx
        })
    });
    let contexts: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(store.len(), 1);
    assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
    assert_eq!(contexts[0].message_count(), 16);
}
