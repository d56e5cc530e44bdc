use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use consistency_harness::evaluation::{evaluate, MathProblem};
use consistency_harness::gateway::openrouter::OpenRouterAdapter;
use consistency_harness::gateway::{chat_cost, ChatGateway, CostLedger, GatewayConfig, ProviderGateway};
use consistency_harness::{FillMode, SelfConsistency, SolveError, SolverConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const TRAIN: &str = "If a train travels 60 miles in 2 hours, what is its speed?";
const ADJUDICATION_MARKER: &str = "Several solutions have been generated";

fn user_content(request: &Request) -> String {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    body["messages"][0]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
    }))
}

/// Letter of the first solution block whose text contains `needle`.
fn letter_containing(prompt: &str, needle: &str) -> Option<char> {
    ('A'..='Z').find(|letter| {
        let marker = format!("{letter}: \n");
        prompt
            .find(&marker)
            .map(|start| {
                let rest = &prompt[start + marker.len()..];
                let end = rest.find("\n\n\n").unwrap_or(rest.len());
                rest[..end].contains(needle)
            })
            .unwrap_or(false)
    })
}

/// Stands in for the model on both steps.
///
/// Generation: the first reply says 35, every later one says 30.
/// Adjudication: picks the first candidate that says 30.
struct MajorityModel {
    generations: AtomicUsize,
}

impl MajorityModel {
    fn new() -> Self {
        Self {
            generations: AtomicUsize::new(0),
        }
    }
}

impl Respond for MajorityModel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let prompt = user_content(request);
        if prompt.contains(ADJUDICATION_MARKER) {
            return match letter_containing(&prompt, "Answer is 30") {
                Some(letter) => completion(&format!(
                    "<thought>Four solutions give 30 mph.</thought>\n<solution_letter> {} </solution_letter>",
                    letter.to_ascii_lowercase()
                )),
                None => completion("<thought>No agreement.</thought>"),
            };
        }
        let n = self.generations.fetch_add(1, Ordering::SeqCst);
        let speed = if n == 0 { 35 } else { 30 };
        completion(&format!(
            "<solution>\nSpeed is distance over time: 60 / 2.\nAnswer is {speed}\n</solution>"
        ))
    }
}

async fn mount(responder: impl Respond + 'static) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(responder)
        .mount(&server)
        .await;
    server
}

fn gateway(server: &MockServer, ledger: Arc<CostLedger>) -> Arc<dyn ChatGateway> {
    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
            .unwrap();
    Arc::new(ProviderGateway::with_config(
        adapter,
        ledger,
        GatewayConfig {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(0),
            ..GatewayConfig::default()
        },
    ))
}

#[tokio::test]
async fn train_problem_selects_a_majority_candidate() {
    let server = mount(MajorityModel::new()).await;
    let ledger = Arc::new(CostLedger::new());
    let solver =
        SelfConsistency::from_config(gateway(&server, ledger.clone()), &SolverConfig::default())
            .unwrap();

    let outcome = solver.solve(TRAIN).await.unwrap();

    assert_eq!(outcome.candidates.len(), 5);
    assert!(outcome.candidates[0].as_str().ends_with("Answer is 35"));
    assert!(outcome.answer.as_str().ends_with("Answer is 30"));
    assert_eq!(outcome.selection.index, 1);
    assert_eq!(outcome.selection.label.to_string(), "B");
    assert!(!outcome.selection.fallback_used);
    assert_eq!(outcome.selection.thought, "Four solutions give 30 mph.");

    // Five generations plus one adjudication.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6);
    let adjudication = user_content(&requests[5]);
    assert!(adjudication.contains(TRAIN));
    assert!(adjudication.contains("E: \n"));
    assert!(!adjudication.contains("F: \n"));

    let per_call = chat_cost("openai/gpt-4o-mini", 100, 50);
    assert_eq!(ledger.calls(), 6);
    assert_eq!(outcome.session_cost_nanodollars, Some(6 * per_call));
}

#[tokio::test]
async fn session_cost_keeps_accumulating_across_problems() {
    let server = mount(MajorityModel::new()).await;
    let ledger = Arc::new(CostLedger::new());
    let solver =
        SelfConsistency::from_config(gateway(&server, ledger.clone()), &SolverConfig::default())
            .unwrap();

    let first = solver.solve(TRAIN).await.unwrap();
    let second = solver.solve(TRAIN).await.unwrap();

    let per_call = chat_cost("openai/gpt-4o-mini", 100, 50);
    assert_eq!(first.session_cost_nanodollars, Some(6 * per_call));
    assert_eq!(second.session_cost_nanodollars, Some(12 * per_call));
    assert_eq!(ledger.total_nanodollars(), 12 * per_call);
}

/// JSON-mode model whose adjudication omits the letter.
struct NullLetterModel;

impl Respond for NullLetterModel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if user_content(request).contains(ADJUDICATION_MARKER) {
            completion(r#"{"thought": "unsure", "solution_letter": null}"#)
        } else {
            completion(r#"{"solution": "60 / 2 = 30. Answer is 30"}"#)
        }
    }
}

#[tokio::test]
async fn json_mode_missing_letter_falls_back_to_first_candidate() {
    let server = mount(NullLetterModel).await;
    let config = SolverConfig {
        samples: 3,
        generation_mode: FillMode::Json,
        adjudication_mode: FillMode::Json,
        ..SolverConfig::default()
    };
    let solver =
        SelfConsistency::from_config(gateway(&server, Arc::new(CostLedger::new())), &config)
            .unwrap();

    let outcome = solver.solve(TRAIN).await.unwrap();
    assert_eq!(outcome.selection.index, 0);
    assert!(outcome.selection.fallback_used);
    assert_eq!(outcome.answer.as_str(), "60 / 2 = 30. Answer is 30");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["response_format"]["type"], "json_object");
}

/// Adjudicator names a letter past the end of the pool.
struct OutOfRangeModel;

impl Respond for OutOfRangeModel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if user_content(request).contains(ADJUDICATION_MARKER) {
            completion("<thought>pick</thought><solution_letter>Q</solution_letter>")
        } else {
            completion("<solution>Answer is 30</solution>")
        }
    }
}

#[tokio::test]
async fn out_of_range_letter_fails_the_problem() {
    let server = mount(OutOfRangeModel).await;
    let solver = SelfConsistency::from_config(
        gateway(&server, Arc::new(CostLedger::new())),
        &SolverConfig::default(),
    )
    .unwrap();

    let err = solver.solve(TRAIN).await.unwrap_err();
    assert!(err.to_string().contains("'Q'"), "{err}");
    assert!(matches!(err, SolveError::Aggregate(_)));
}

/// Fails generation for any prompt mentioning "poison".
struct PoisonModel;

impl Respond for PoisonModel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let prompt = user_content(request);
        if prompt.contains(ADJUDICATION_MARKER) {
            completion("<thought>first</thought><solution_letter>A</solution_letter>")
        } else if prompt.contains("poison") {
            ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "bad request", "code": "invalid" }
            }))
        } else {
            completion("<solution>2 + 2 = 4\nAnswer is 4</solution>")
        }
    }
}

#[tokio::test]
async fn evaluation_isolates_failures_and_scores_the_rest() {
    let server = mount(PoisonModel).await;
    let ledger = Arc::new(CostLedger::new());
    let config = SolverConfig {
        samples: 2,
        ..SolverConfig::default()
    };
    let solver = SelfConsistency::from_config(gateway(&server, ledger.clone()), &config).unwrap();

    let problems = vec![
        MathProblem {
            question: "What is 2 + 2?".to_string(),
            answer: "2 + 2 = 4\n#### 4".to_string(),
        },
        MathProblem {
            question: "What is the poison dose?".to_string(),
            answer: "#### 1".to_string(),
        },
        MathProblem {
            question: "What is 2 + 3?".to_string(),
            answer: "#### 5".to_string(),
        },
    ];

    let report = evaluate(&solver, &problems, 2).await;

    let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, [0, 1, 2]);

    assert!(report.results[0].correct);
    assert_eq!(report.results[0].predicted, Some(4.0));

    assert!(!report.results[1].correct);
    assert!(report.results[1].error.is_some());
    assert!(report.results[1].answer.is_none());

    assert!(!report.results[2].correct);
    assert_eq!(report.results[2].expected, Some(5.0));

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.correct, 1);
    assert_eq!(report.summary.failed, 1);
    assert!((report.summary.accuracy - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.summary.generation_template, "answer_is_v1");
    assert_eq!(
        report.summary.session_cost_nanodollars,
        Some(ledger.total_nanodollars())
    );
}
