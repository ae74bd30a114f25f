//! `stepwise run`: single-message or interactive agent mode.
//!
//! Steps are written to stderr as they happen; answers go to stdout so they
//! can be piped.

use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use stepwise_agent::{AgentLoop, AgentRequest, AgentStep, AgentStepKind, StepObserver};
use stepwise_config::AppConfig;
use stepwise_core::error::AgentError;
use stepwise_core::message::{ConversationId, Message};
use tokio::io::{AsyncBufReadExt, BufReader};

pub struct RunOptions {
    pub message: Option<String>,
    pub no_stream: bool,
    pub max_thoughts: Option<u32>,
    pub direct: bool,
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max) = opts.max_thoughts {
        config.agent.max_thoughts = max;
    }
    if opts.direct {
        config.agent.allowed_steps.clear();
    }
    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {e}"))?;

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STEPWISE_API_KEY, OPENAI_API_KEY, OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = stepwise_providers::build_from_config(&config);
    let provider = router
        .default()
        .ok_or_else(|| missing_provider_message(router.default_name(), &router.list()))?;
    let tools = Arc::new(stepwise_tools::default_registry());
    let streaming = config.streaming && !opts.no_stream;
    let agent = AgentLoop::new(provider, tools).with_streaming(streaming);
    tracing::debug!(
        provider = %config.default_provider,
        model = %config.default_model,
        max_thoughts = config.agent.max_thoughts,
        streaming,
        "Starting agent session"
    );

    let mut session = Session {
        agent,
        config,
        conversation_id: ConversationId::new(),
        history: Vec::new(),
        printer: Arc::new(StepPrinter::default()),
    };

    if let Some(message) = opts.message {
        let answer = session.turn(message).await?;
        println!("{}", answer.content);
        return Ok(());
    }

    eprintln!();
    eprintln!("  Stepwise interactive mode");
    eprintln!("  Provider:  {}", session.config.default_provider);
    eprintln!("  Model:     {}", session.config.default_model);
    eprintln!("  Tools:     {}", session.config.agent.tools.join(", "));
    eprintln!("  Type 'exit' to quit; Ctrl+C cancels the current run.");
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("  You > ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        match session.turn(line.to_string()).await {
            Ok(answer) => {
                println!("{}", answer.content);
                println!();
            }
            Err(e) => eprintln!("  [Error] {e}"),
        }
    }

    Ok(())
}

fn missing_provider_message(name: &str, available: &[&str]) -> String {
    let available = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    format!(
        "Provider '{name}' has no well-known URL; set api_url under [providers.{name}] \
         (usable providers: {available})"
    )
}

struct Session {
    agent: AgentLoop,
    config: AppConfig,
    conversation_id: ConversationId,
    history: Vec<Message>,
    printer: Arc<StepPrinter>,
}

impl Session {
    /// One user message through the agent; Ctrl+C cancels the run.
    async fn turn(&mut self, input: String) -> Result<Message, AgentError> {
        self.history.push(Message::user(input));
        let request = AgentRequest::new(
            &self.config.default_model,
            self.config.agent.clone(),
            self.history.clone(),
        )
        .with_conversation_id(self.conversation_id.clone());

        let mut run = self.agent.execute(request, self.printer.clone());
        let result = tokio::select! {
            result = run.next() => result.unwrap_or(Err(AgentError::Cancelled)),
            _ = tokio::signal::ctrl_c() => {
                run.cancel();
                Err(AgentError::Cancelled)
            }
        };
        self.printer.finish();

        match &result {
            Ok(answer) => self.history.push(answer.clone()),
            // Keep user/assistant turns paired for the next request.
            Err(_) => {
                self.history.pop();
            }
        }
        result
    }
}

#[derive(Default)]
struct PrinterState {
    /// The thought currently being streamed, and what was printed of it.
    open_thought: Option<String>,
    printed: String,
}

impl PrinterState {
    /// Text to write for a step. Updates of the open thought only add
    /// their new suffix.
    fn render(&mut self, step: &AgentStep) -> String {
        let updates_open_thought = step.kind == AgentStepKind::Thought
            && self.open_thought.as_deref() == Some(step.id.as_str());
        if updates_open_thought {
            let out = match step.content.strip_prefix(self.printed.as_str()) {
                Some(rest) => rest.to_string(),
                None => format!("\n    {}", step.content),
            };
            self.printed = step.content.clone();
            return out;
        }

        let mut out = self.close();
        let title = step
            .title
            .as_deref()
            .map(|t| format!(" ({t})"))
            .unwrap_or_default();
        out.push_str(&format!(
            "  [{}] {}{}: {}",
            step.step_number,
            step.event_type(),
            title,
            step.content
        ));
        if step.kind == AgentStepKind::Thought {
            self.open_thought = Some(step.id.clone());
            self.printed = step.content.clone();
        } else {
            out.push('\n');
        }
        out
    }

    /// Terminate an open thought line, if any.
    fn close(&mut self) -> String {
        self.printed.clear();
        match self.open_thought.take() {
            Some(_) => "\n".into(),
            None => String::new(),
        }
    }
}

#[derive(Default)]
struct StepPrinter {
    state: Mutex<PrinterState>,
}

impl StepPrinter {
    fn finish(&self) {
        let out = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        write_stderr(&out);
    }
}

#[async_trait]
impl StepObserver for StepPrinter {
    async fn on_step(&self, step: AgentStep) {
        let out = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(&step);
        write_stderr(&out);
    }
}

fn write_stderr(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut err = std::io::stderr().lock();
    let _ = err.write_all(text.as_bytes());
    let _ = err.flush();
}
