use super::*;
use crate::chunking::{Chunk, Chunker, ChunkingConfig};
use crate::corpus::CorpusLoader;
use crate::database::{InMemoryVectorIndex, VectorIndex};
use crate::embeddings::HashedEmbedder;
use crate::generation::{Generation, GenerationError, Generator};
use crate::memory::{ConversationMemory, ConversationTurn, MemoryConfig};
use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, header};
use serde_json::Value;
use std::fs;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct FirstChunkGenerator;

#[async_trait]
impl Generator for FirstChunkGenerator {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: Option<u32>,
    ) -> std::result::Result<String, GenerationError> {
        Ok(prompt.to_string())
    }

    async fn generate(
        &self,
        _question: &str,
        context: &[Chunk],
        _history: &[ConversationTurn],
    ) -> std::result::Result<Generation, GenerationError> {
        if context.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(Generation {
            answer: context[0].content.clone(),
            sources: context.to_vec(),
        })
    }

    fn model(&self) -> &str {
        "first-chunk"
    }
}

/// Records every question it sees and how many generations ran at once
#[derive(Default)]
struct RecordingGenerator {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    questions: StdMutex<Vec<String>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: Option<u32>,
    ) -> std::result::Result<String, GenerationError> {
        Ok(prompt.to_string())
    }

    async fn generate(
        &self,
        question: &str,
        context: &[Chunk],
        _history: &[ConversationTurn],
    ) -> std::result::Result<Generation, GenerationError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.questions
            .lock()
            .expect("questions mutex poisoned")
            .push(question.to_string());

        tokio::time::sleep(Duration::from_millis(20)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Generation {
            answer: format!("answer to {question}"),
            sources: context.to_vec(),
        })
    }

    fn model(&self) -> &str {
        "recording"
    }
}

fn pipeline(temp_dir: &TempDir) -> RagPipeline {
    pipeline_with_generator(temp_dir, Arc::new(FirstChunkGenerator))
}

fn pipeline_with_generator(temp_dir: &TempDir, generator: Arc<dyn Generator>) -> RagPipeline {
    let data_dir = temp_dir.path().join("data");
    let loader = CorpusLoader::from_data_dir(data_dir.clone());
    loader.ensure_layout().expect("should create layout");
    fs::write(
        data_dir.join("notes").join("capital.txt"),
        "The capital of France is Paris.",
    )
    .expect("should write note");

    RagPipeline::new(
        loader,
        Chunker::new(ChunkingConfig::default()).expect("default chunking is valid"),
        Arc::new(HashedEmbedder::new(64)),
        Arc::new(InMemoryVectorIndex::new()) as Arc<dyn VectorIndex>,
        ConversationMemory::new(MemoryConfig::default()),
        generator,
    )
}

async fn ready_app(temp_dir: &TempDir) -> Router {
    let mut pipeline = pipeline(temp_dir);
    pipeline.initialize().await.expect("should initialize");
    router(ApiState::new(pipeline))
}

fn post_query(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn live_is_always_ok() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let app = router(ApiState::new(pipeline(&temp_dir)));

    let response = app
        .oneshot(Request::builder().uri("/live").body(Body::empty()).expect("request"))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn ready_reflects_pipeline_state() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let not_ready = router(ApiState::new(pipeline(&temp_dir)));

    let response = not_ready
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let ready = ready_app(&temp_dir).await;
    let response = ready
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
        .await
        .expect("router response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_returns_answer_and_sources() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let app = ready_app(&temp_dir).await;

    let response = app
        .oneshot(post_query(r#"{"question": "What is the capital of France?"}"#))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["answer"], "The capital of France is Paris.");
    assert_eq!(body["sources"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["sources"][0]["source"], "data/notes/capital.txt");
    assert!(body["sources"][0]["page"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_are_serialized() {
    const QUERIES: usize = 6;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let generator = Arc::new(RecordingGenerator::default());
    let mut pipeline =
        pipeline_with_generator(&temp_dir, Arc::clone(&generator) as Arc<dyn Generator>);
    pipeline.initialize().await.expect("should initialize");
    let state = ApiState::new(pipeline);
    let app = router(state.clone());

    let requests = (0..QUERIES).map(|i| {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(post_query(&format!(r#"{{"question": "question {i}"}}"#)))
                .await
                .expect("router response")
        })
    });
    let responses = futures::future::join_all(requests).await;

    for response in responses {
        let response = response.expect("request task should not panic");
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 1);

    let seen = generator
        .questions
        .lock()
        .expect("questions mutex poisoned")
        .clone();
    assert_eq!(seen.len(), QUERIES);

    let history = state.pipeline.lock().await.history();
    let remembered: Vec<String> = history.iter().map(|turn| turn.question.clone()).collect();
    assert_eq!(remembered, seen);
    for turn in &history {
        assert_eq!(turn.answer, format!("answer to {}", turn.question));
    }
}

#[tokio::test]
async fn blank_question_is_a_bad_request() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let app = ready_app(&temp_dir).await;

    let response = app
        .oneshot(post_query(r#"{"question": "  "}"#))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["detail"].is_string());
}

#[tokio::test]
async fn missing_question_field_is_unprocessable() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let app = ready_app(&temp_dir).await;

    let response = app
        .oneshot(post_query(r#"{"prompt": "hi"}"#))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json_body(response).await["detail"].is_string());
}

#[tokio::test]
async fn query_before_initialize_is_a_server_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let app = router(ApiState::new(pipeline(&temp_dir)));

    let response = app
        .oneshot(post_query(r#"{"question": "Anyone home?"}"#))
        .await
        .expect("router response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"]
        .as_str()
        .map(str::to_string)
        .expect("detail should be a string");
    assert!(detail.contains("not initialized"));
}

#[test]
fn api_error_status_codes() {
    let cases = [
        (
            ApiError::from(ThesiaError::InvalidQuestion("empty".to_string())),
            StatusCode::BAD_REQUEST,
        ),
        (
            ApiError::from(ThesiaError::NotInitialized),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            ApiError::UnprocessableEntity("bad json".to_string()),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
    ];

    for (error, expected) in cases {
        assert_eq!(error.into_response().status(), expected);
    }
}
