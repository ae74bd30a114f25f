//! End-to-end integration tests for the stepwise agent runtime.
//!
//! These tests drive the full pipeline from a user message to the final
//! answer: prompt construction, streamed model output, decision decoding,
//! the built-in tools, and the step trace.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stepwise_agent::{AgentLoop, AgentRequest, AgentStep, AgentStepKind, NoopObserver, accumulate};
use stepwise_core::agent::AgentConfig;
use stepwise_core::error::{AgentError, ProviderError, ToolError};
use stepwise_core::message::{Message, Role};
use stepwise_core::provider::{
    ChatRequest, ChatResponse, FragmentReceiver, MessageDelta, Provider, StreamFragment, Usage,
};
use stepwise_core::tool::{InvocationContext, Tool, ToolRegistry};
use stepwise_tools::default_registry;
use tokio::sync::mpsc;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that plays back scripted replies in sequence, streaming
/// each one in small chunks.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk: usize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            chunk: 4,
            delay: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ChatRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    async fn next(&self, request: ChatRequest) -> String {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted")
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let text = self.next(request).await;
        Ok(ChatResponse {
            message: Some(Message::assistant(text)),
            usage: Some(usage()),
            model: "mock".into(),
        })
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentReceiver, ProviderError> {
        let text = self.next(request).await;
        let chars: Vec<char> = text.chars().collect();
        let (tx, rx) = mpsc::channel(chars.len() + 1);
        for piece in chars.chunks(self.chunk) {
            let piece: String = piece.iter().collect();
            tx.send(Ok(StreamFragment::Delta(MessageDelta::text(piece))))
                .await
                .unwrap();
        }
        tx.send(Ok(StreamFragment::Settlement(usage()))).await.unwrap();
        Ok(rx)
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A tool that counts how often it ran.
struct CountingTool {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Counts invocations"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "string"})
    }

    async fn execute(
        &self,
        _input: &str,
        _context: Option<&InvocationContext>,
    ) -> Result<String, ToolError> {
        Ok((self.calls.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn action(tool: &str, input: serde_json::Value) -> String {
    serde_json::json!({
        "title": format!("Use {tool}"),
        "reasoning": format!("I should call {tool}."),
        "decision": {"type": "action", "tool": tool, "input": input},
    })
    .to_string()
}

fn final_answer(content: &str) -> String {
    serde_json::json!({
        "reasoning": "I have what I need.",
        "decision": {"type": "final_answer", "content": content},
    })
    .to_string()
}

fn plan(content: &str) -> String {
    serde_json::json!({"decision": {"type": "plan", "content": content}}).to_string()
}

fn config(tools: &[&str], max_thoughts: u32) -> AgentConfig {
    AgentConfig {
        tools: tools.iter().map(|s| s.to_string()).collect(),
        max_thoughts,
        ..AgentConfig::with_all_steps()
    }
}

fn ask(config: AgentConfig, question: &str) -> AgentRequest {
    AgentRequest::new("mock-model", config, vec![Message::user(question)])
}

async fn run_with_steps(
    agent: &AgentLoop,
    request: AgentRequest,
) -> (Result<Message, AgentError>, Vec<AgentStep>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = agent.run(request, Arc::new(tx)).await;
    let mut steps = Vec::new();
    while let Ok(step) = rx.try_recv() {
        steps.push(step);
    }
    (result, steps)
}

/// Collapse repeated updates of a streamed thought into one entry.
fn distinct_kinds(steps: &[AgentStep]) -> Vec<AgentStepKind> {
    let mut kinds: Vec<(String, AgentStepKind)> = Vec::new();
    for step in steps {
        if kinds.last().map(|(id, _)| id) != Some(&step.id) {
            kinds.push((step.id.clone(), step.kind));
        }
    }
    kinds.into_iter().map(|(_, kind)| kind).collect()
}

// ── E2E: Tool use ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_calculator_then_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        action("calculator", serde_json::json!({"expression": "2 + 2"})),
        final_answer("2 + 2 = 4"),
    ]));
    let agent = AgentLoop::new(provider.clone(), Arc::new(default_registry()));

    let (result, steps) = run_with_steps(&agent, ask(config(&["calculator"], 5), "What is 2+2?")).await;

    let answer = result.unwrap();
    assert_eq!(answer.content, "2 + 2 = 4");
    assert_eq!(answer.role, Role::Assistant);
    assert_eq!(answer.usage, Some(usage()));
    assert_eq!(
        distinct_kinds(&steps),
        vec![
            AgentStepKind::Thought,
            AgentStepKind::Action,
            AgentStepKind::Observation,
            AgentStepKind::Thought,
        ]
    );

    let action_step = steps.iter().find(|s| s.kind == AgentStepKind::Action).unwrap();
    assert_eq!(action_step.title.as_deref(), Some("Use calculator"));
    let observation = steps
        .iter()
        .find(|s| s.kind == AgentStepKind::Observation)
        .unwrap();
    assert_eq!(observation.content, "Observation: 4");

    // The observation is the last thing the model sees before answering.
    let last = provider.last_request();
    assert_eq!(last.messages.last().unwrap().content, "Observation: 4");
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn e2e_unknown_tool_is_fatal() {
    let provider = Arc::new(ScriptedProvider::new(vec![action(
        "web_search",
        serde_json::json!("rust"),
    )]));
    let agent = AgentLoop::new(provider, Arc::new(default_registry()));

    let (result, steps) = run_with_steps(&agent, ask(config(&["calculator"], 5), "Search")).await;

    assert!(matches!(result, Err(AgentError::ToolNotFound(name)) if name == "web_search"));
    assert_eq!(
        distinct_kinds(&steps),
        vec![AgentStepKind::Thought, AgentStepKind::Action]
    );
}

#[tokio::test]
async fn e2e_tool_error_is_reported_to_the_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        action("calculator", serde_json::json!("1 / 0")),
        final_answer("That division is undefined."),
    ]));
    let agent = AgentLoop::new(provider.clone(), Arc::new(default_registry()));

    let (result, steps) = run_with_steps(&agent, ask(config(&["calculator"], 5), "1/0?")).await;

    assert_eq!(result.unwrap().content, "That division is undefined.");
    let observation = steps
        .iter()
        .find(|s| s.kind == AgentStepKind::Observation)
        .unwrap();
    assert_eq!(observation.content, "Error: division by zero");
    assert_eq!(
        provider.last_request().messages.last().unwrap().content,
        "Tool execution failed: division by zero"
    );
}

// ── E2E: Bounds and degradation ──────────────────────────────────────────

#[tokio::test]
async fn e2e_thought_budget_bounds_the_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan("step one"),
        plan("step two"),
        plan("step three"),
    ]));
    let agent = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()));

    let result = agent
        .run(ask(config(&[], 3), "Loop forever"), Arc::new(NoopObserver))
        .await;

    assert!(matches!(
        result,
        Err(AgentError::MaxThoughtsReached { max_thoughts: 3 })
    ));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn e2e_prose_reply_becomes_the_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "The capital of France is Paris.".into(),
    ]));
    let agent = AgentLoop::new(provider, Arc::new(default_registry()));

    let (result, steps) = run_with_steps(&agent, ask(config(&[], 5), "Capital of France?")).await;

    assert_eq!(result.unwrap().content, "The capital of France is Paris.");
    assert!(steps.iter().all(|s| s.kind == AgentStepKind::Thought));
}

#[tokio::test]
async fn e2e_direct_chat_skips_the_protocol() {
    let provider = Arc::new(ScriptedProvider::new(vec!["Bonjour!".into()]));
    let agent = AgentLoop::new(provider.clone(), Arc::new(default_registry()));

    let (result, steps) =
        run_with_steps(&agent, ask(AgentConfig::default(), "Say hi in French")).await;

    assert_eq!(result.unwrap().content, "Bonjour!");
    assert!(steps.is_empty());
    let sent = provider.last_request();
    assert_eq!(sent.messages.len(), 1);
    assert_eq!(sent.messages[0].role, Role::User);
}

#[tokio::test]
async fn e2e_non_streaming_matches_streaming() {
    let script = vec![
        action("calculator", serde_json::json!("6 * 7")),
        final_answer("42"),
    ];
    let streamed = AgentLoop::new(
        Arc::new(ScriptedProvider::new(script.clone())),
        Arc::new(default_registry()),
    );
    let blocking = AgentLoop::new(
        Arc::new(ScriptedProvider::new(script)),
        Arc::new(default_registry()),
    )
    .with_streaming(false);

    let (a, a_steps) = run_with_steps(&streamed, ask(config(&["calculator"], 5), "6*7")).await;
    let (b, b_steps) = run_with_steps(&blocking, ask(config(&["calculator"], 5), "6*7")).await;

    assert_eq!(a.unwrap().content, b.unwrap().content);
    assert_eq!(distinct_kinds(&a_steps), distinct_kinds(&b_steps));
    assert!(a_steps.len() > b_steps.len());
}

// ── E2E: Step trace ──────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_step_numbers_never_decrease() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan("compute"),
        action("calculator", serde_json::json!("3 ^ 2")),
        final_answer("9"),
    ]));
    let agent = AgentLoop::new(provider, Arc::new(default_registry()));

    let (result, steps) = run_with_steps(&agent, ask(config(&["calculator"], 5), "3^2")).await;
    assert_eq!(result.unwrap().content, "9");

    assert!(steps.windows(2).all(|w| w[0].step_number <= w[1].step_number));
    for pair in steps.windows(2) {
        if pair[0].step_number == pair[1].step_number {
            assert_eq!(pair[0].id, pair[1].id);
        }
    }
    let last = steps.last().unwrap();
    assert!(last.content.ends_with('9'));
}

// ── E2E: Cancellation and concurrency ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_cancelled_run_produces_nothing() {
    let counter = Arc::new(CountingTool {
        calls: AtomicUsize::new(0),
    });
    let registry = Arc::new(ToolRegistry::new());
    registry.register(counter.clone());

    let provider = Arc::new(
        ScriptedProvider::new(vec![
            action("counter", serde_json::json!("")),
            final_answer("done"),
        ])
        .with_delay(Duration::from_millis(50)),
    );
    let agent = AgentLoop::new(provider.clone(), registry);

    let (tx, mut steps) = mpsc::unbounded_channel::<AgentStep>();
    let mut run = agent.execute(ask(config(&["counter"], 5), "count"), Arc::new(tx));
    tokio::time::sleep(Duration::from_millis(5)).await;
    run.cancel();

    assert!(run.next().await.is_none());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls(), 0);
    assert!(steps.try_recv().is_err());
}

#[tokio::test]
async fn e2e_concurrent_runs_share_a_registry() {
    let registry = Arc::new(default_registry());
    let mut runs = Vec::new();
    for n in 1..=4 {
        let provider = Arc::new(ScriptedProvider::new(vec![
            action("calculator", serde_json::json!(format!("{n} * 10"))),
            final_answer(&format!("{}", n * 10)),
        ]));
        let agent = AgentLoop::new(provider, registry.clone());
        runs.push(agent.execute(ask(config(&["calculator"], 5), "multiply"), Arc::new(NoopObserver)));
    }

    for (i, run) in runs.into_iter().enumerate() {
        let answer = run.finish().await.unwrap();
        assert_eq!(answer.content, format!("{}", (i + 1) * 10));
    }
}

// ── E2E: Stream folding ──────────────────────────────────────────────────

#[test]
fn e2e_fragment_folding_is_split_independent() {
    let fragments: Vec<StreamFragment> = ["{\"reasoning\": ", "\"ok\", ", "\"decision\": {}}"]
        .into_iter()
        .map(|s| StreamFragment::Delta(MessageDelta::text(s)))
        .chain(std::iter::once(StreamFragment::Settlement(usage())))
        .collect();

    let whole = accumulate(None, fragments.clone()).unwrap();
    for split in 0..=fragments.len() {
        let (head, tail) = fragments.split_at(split);
        let staged = accumulate(accumulate(None, head.to_vec()), tail.to_vec()).unwrap();
        assert_eq!(staged.content, whole.content);
        assert_eq!(staged.usage, whole.usage);
    }
}
