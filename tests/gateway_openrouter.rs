use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use consistency_harness::gateway::openrouter::{ChatProvider, OpenRouterAdapter};
use consistency_harness::gateway::{
    chat_cost, Attribution, ChatGateway, ChatModel, ChatRequest, CostLedger, FinishReason,
    GatewayConfig, Message, ProviderError, ProviderGateway,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenRouterAdapter {
    OpenRouterAdapter::with_config(
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
        None,
        Some("consistency-tests".to_string()),
    )
    .unwrap()
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(
        ChatModel::openrouter(model),
        vec![Message::user("A train travels 60 miles in 2 hours.")],
        Attribution::new("test"),
    )
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
    })
}

#[tokio::test]
async fn success_parses_content_usage_and_cost() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("x-title", "consistency-tests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "Answer is 30" },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 20,
                "cost_details": { "upstream_inference_cost": 0.000002 }
            }
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server)
        .chat(&request("openai/gpt-4o-mini"))
        .await
        .unwrap();
    assert_eq!(resp.content, "Answer is 30");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 20);
    assert_eq!(resp.cost_nanodollars, chat_cost("openai/gpt-4o-mini", 10, 20));
    assert_eq!(resp.upstream_cost_nanodollars, Some(2_000));
}

#[tokio::test]
async fn json_mode_sends_response_format_and_sampling_params() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-4o-mini",
            "temperature": 0.0,
            "max_tokens": 256,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"thought": "all say 30", "solution_letter": "A"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let req = request("openai/gpt-4o-mini")
        .temperature(0.0)
        .max_tokens(256)
        .json();
    let resp = adapter(&server).chat(&req).await.unwrap();
    assert!(resp.content.contains("solution_letter"));
}

#[tokio::test]
async fn empty_content_falls_back_to_tool_call_arguments() {
    let server = MockServer::start().await;
    let args = r#"{"solution": "Answer is 30"}"#;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{"function": {"arguments": args}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server)
        .chat(&request("openai/gpt-4o-mini").json())
        .await
        .unwrap();
    assert_eq!(resp.content, args);
    assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
}

#[tokio::test]
async fn refusal_content_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I cannot help with that.")),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .chat(&request("openai/gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Refused { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn http_429_is_a_remote_rate_limit_with_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .chat(&request("openai/gpt-4o-mini"))
        .await
        .unwrap_err();
    match err {
        ProviderError::RateLimited {
            retry_after,
            context,
        } => {
            assert_eq!(retry_after, Duration::from_secs(60));
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("req-42"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_input_is_rejected_before_sending() {
    let server = MockServer::start().await;

    let req = ChatRequest::new(
        ChatModel::openrouter("openai/gpt-4o-mini"),
        vec![Message::user("x".repeat(600_000))],
        Attribution::new("test"),
    );
    let err = adapter(&server).chat(&req).await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// Serves `failures` server errors, then successes.
struct FailFirst {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl Respond for FailFirst {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "transient error", "code": "internal" }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(completion("ok"))
        }
    }
}

#[tokio::test]
async fn gateway_retries_server_errors_and_accounts_every_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FailFirst {
            calls: Arc::new(AtomicUsize::new(0)),
            failures: 1,
        })
        .mount(&server)
        .await;

    let ledger = Arc::new(CostLedger::new());
    let gateway = ProviderGateway::with_config(
        adapter(&server),
        ledger.clone(),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(0),
            ..GatewayConfig::default()
        },
    );

    let resp = gateway.chat(request("openai/gpt-4o-mini")).await.unwrap();
    assert_eq!(resp.content, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    assert_eq!(ledger.calls(), 2);
    assert_eq!(ledger.failed_calls(), 1);
    let expected = chat_cost("openai/gpt-4o-mini", 100, 50);
    assert_eq!(ledger.total_nanodollars(), expected);
    assert_eq!(
        ChatGateway::session_cost_nanodollars(&gateway),
        Some(expected)
    );
}

#[tokio::test]
async fn gateway_gives_up_after_max_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FailFirst {
            calls: Arc::new(AtomicUsize::new(0)),
            failures: usize::MAX,
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(
        adapter(&server),
        Arc::new(CostLedger::new()),
        GatewayConfig {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(0),
            ..GatewayConfig::default()
        },
    );

    let err = gateway.chat(request("openai/gpt-4o-mini")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
