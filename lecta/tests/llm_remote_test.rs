use lecta::category::Category;
use lecta::llm::classifier::{ClassifyError, LlmClassifier, RemoteClassifier, RetryPolicy};
use lecta::llm::remote::RemoteLlmProvider;
use lecta::llm::{LlmError, LlmProvider, LlmRequest};
use lecta::processing::Severity;
use mockito::Matcher;
use std::sync::Arc;
use std::time::Duration;

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
    .to_string()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_header("x-title", "Lecta")
        .match_body(Matcher::PartialJsonString(
            r#"{"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "Test prompt"}]}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("This is a test response"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini")
        .with_attribution(None, Some("Lecta".to_string()));

    let request = LlmRequest {
        prompt: "Test prompt".to_string(),
        max_tokens: Some(100),
        timeout_seconds: Some(10),
        ..Default::default()
    };

    let response = provider.generate(request).await.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_without_usage() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "Sports"}}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "key", "fallback-model");
    let response = provider.generate(LlmRequest::default()).await.unwrap();
    assert_eq!(response.content, "Sports");
    assert_eq!(response.usage.total_tokens, 0);
    assert_eq!(response.model, "fallback-model");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_batch_classification_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("1\\. Cup final tonight".to_string()))
        .with_status(200)
        .with_body(completion("```json\n[\"Sports\", \"technology\", \"Weather\"]\n```"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "key", "gpt-4o-mini");
    let classifier = LlmClassifier::new(Arc::new(provider)).with_retry(fast_retry());

    let headlines = vec![
        "Cup final tonight".to_string(),
        "New chip unveiled".to_string(),
        "Storm warning".to_string(),
    ];
    let categories = classifier.classify_headlines(&headlines).await.unwrap();
    assert_eq!(categories, vec![Category::Sports, Category::Tech, Category::General]);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_persistent_rate_limit_is_retried_once() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_body("too many requests")
        .expect(2)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "key", "gpt-4o-mini");
    let classifier = LlmClassifier::new(Arc::new(provider)).with_retry(fast_retry());

    let err = classifier.classify_headline("Anything").await.unwrap_err();
    assert!(matches!(err, ClassifyError::RateLimited { attempts: 2 }));
    assert_eq!(err.severity(), Severity::Warning);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(401)
        .with_body("invalid key")
        .expect(1)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "bad-key", "gpt-4o-mini");
    let classifier = LlmClassifier::new(Arc::new(provider)).with_retry(fast_retry());

    let err = classifier
        .classify_headlines(&["Anything".to_string()])
        .await
        .unwrap_err();
    match &err {
        ClassifyError::Provider(LlmError::Api { status, body }) => {
            assert_eq!(*status, 401);
            assert_eq!(body, "invalid key");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.severity(), Severity::Error);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_unresponsive_endpoint_times_out() {
    // Accepts connections through the backlog but never answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());

    let provider = RemoteLlmProvider::new(url, "key", "gpt-4o-mini");
    let request = LlmRequest {
        prompt: "Hello".to_string(),
        timeout_seconds: Some(1),
        ..Default::default()
    };

    let err = provider.generate(request).await.unwrap_err();
    assert!(matches!(err, LlmError::Timeout(_)));
    assert!(err.to_string().contains("timed out"));
    drop(listener);
}
