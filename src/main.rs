use std::path::PathBuf;
use std::sync::Arc;

use handoff_agent_sdk::agent::Agent;
use handoff_agent_sdk::cli::{Console, TraceRenderer};
use handoff_agent_sdk::core::SdkConfig;
use handoff_agent_sdk::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Message, OpenAiProvider,
    ScriptedProvider, ToolCall,
};
use handoff_agent_sdk::logging;
use handoff_agent_sdk::runner::{RunConfig, Runner};
use handoff_agent_sdk::traces::types::gen_trace_id;
use handoff_agent_sdk::traces::{
    DatabaseTraceProcessor, LogTraceProcessor, TraceStore, DEFAULT_BATCH_SIZE,
};

const STREAM_PREFIX: &str = "Assistant";

const USAGE: &str = "usage: handoff-agent [--scripted] [--stream] [--db <path>] <query>";

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    scripted: bool,
    stream: bool,
    db: Option<PathBuf>,
    query: String,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut parsed = CliArgs::default();
        let mut words = Vec::new();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--scripted" => parsed.scripted = true,
                "--stream" => parsed.stream = true,
                "--db" => {
                    let path = args.next().ok_or("--db needs a path")?;
                    parsed.db = Some(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => return Err(format!("unknown flag {}", flag)),
                _ => words.push(arg),
            }
        }

        if words.is_empty() {
            return Err("missing query".into());
        }
        parsed.query = words.join(" ");
        Ok(parsed)
    }
}

/// Offline stand-in for the completion API
///
/// Triage routes refund and shipping questions by keyword; specialists answer
/// from their instructions.
fn scripted_support_desk() -> ScriptedProvider {
    ScriptedProvider::from_fn(|request: &CompletionRequest| {
        let query = request
            .messages
            .last()
            .map(|m| m.text().to_lowercase())
            .unwrap_or_default();
        let tools = request.tool_names();

        let route = if ["refund", "broken", "damaged"].iter().any(|w| query.contains(*w)) {
            Some(("transfer_to_refund", "damaged item"))
        } else if ["ship", "late", "where"].iter().any(|w| query.contains(*w)) {
            Some(("transfer_to_shipping", "delivery question"))
        } else {
            None
        };

        let message = match route {
            Some((tool, reason)) if tools.contains(&tool) => Message::assistant_with_tool_calls(
                Some("Let me get the right team for you. ".into()),
                vec![ToolCall::new(
                    "call_1",
                    tool,
                    serde_json::json!({ "reason": reason }).to_string(),
                )],
            ),
            _ => {
                let persona = request.messages.first().map(|m| m.text()).unwrap_or("");
                Message::assistant(format!("({}) I can help with that.", persona))
            }
        };

        Ok(CompletionResponse::from_message(
            "scripted",
            &request.model,
            message,
            Some(FinishReason::Stop),
        ))
    })
}

/// Agents leave their model empty and run on the configured default
fn support_desk() -> Arc<Agent> {
    let refund = Arc::new(
        Agent::new("Refund", "You process refunds for damaged or missing items.")
            .with_handoff_description("Handles refunds and returns."),
    );
    let shipping = Arc::new(
        Agent::new("Shipping", "You answer questions about deliveries.")
            .with_handoff_description("Tracks orders and delivery delays."),
    );

    Arc::new(
        Agent::new(
            "Triage",
            "You route customer requests to the right specialist. Hand off whenever a specialist fits.",
        )
        .with_handoff_to(refund)
        .with_handoff_to(shipping),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let guard = logging::init_logging()?;
    let console = Console::new();

    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            console.print_error(&e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    tracing::info!("=== Handoff Agent Starting ===");

    let config = SdkConfig::from_env();
    let provider: Arc<dyn LlmProvider> = if args.scripted {
        Arc::new(scripted_support_desk())
    } else {
        Arc::new(OpenAiProvider::new(&config)?)
    };

    let mut store = TraceStore::from_config(&config).with_processor(Arc::new(LogTraceProcessor));
    let db = match &args.db {
        Some(path) => {
            let db = Arc::new(DatabaseTraceProcessor::open(path, DEFAULT_BATCH_SIZE)?);
            store = store.with_processor(db.clone());
            Some(db)
        }
        None => None,
    };

    let trace_id = gen_trace_id();
    let runner = Runner::from_config(provider, &config)
        .with_trace_store(store.clone())
        .with_config(
            RunConfig::new()
                .with_workflow_name("Customer support")
                .with_trace_id(&trace_id),
        );

    console.print_banner("Customer support desk");
    console.print_user(&args.query);

    let entry = support_desk();

    let result = if args.stream {
        // Tokens from every agent in the handoff chain share this line
        console.print_agent_prefix(STREAM_PREFIX);
        let result = runner
            .run_streamed(entry, &args.query, |token| console.print_chunk(token))
            .await;
        console.println();
        result
    } else {
        let renderer = if config.tracing_disabled {
            None
        } else {
            let subscription = store.subscribe(&trace_id).await;
            Some(tokio::spawn(TraceRenderer::new(subscription).run()))
        };

        let result = runner.run(entry, &args.query).await;
        if let Some(renderer) = renderer {
            renderer.await?;
        }
        if let (Some(output), Some(agent)) = (&result.final_output, &result.metadata.last_agent) {
            console.print_agent(&agent.name, output);
        }
        result
    };

    console.print_result(&result);
    if let Some(trace) = store.get_trace(&trace_id).await {
        console.print_trace(&trace);
    }

    if let Some(db) = db {
        db.flush().await?;
        console.print_system(&format!("Trace persisted to {:?}", args.db.unwrap_or_default()));
    }
    store.shutdown();

    tracing::info!("=== Handoff Agent Shutting Down ===");

    if !result.success {
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<CliArgs, String> {
        CliArgs::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags_and_query() {
        let parsed = args(&["--scripted", "my", "mug", "--stream", "broke"]).unwrap();
        assert!(parsed.scripted);
        assert!(parsed.stream);
        assert_eq!(parsed.query, "my mug broke");

        let parsed = args(&["--db", "traces.db", "hello"]).unwrap();
        assert_eq!(parsed.db, Some(PathBuf::from("traces.db")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["--db"]).is_err());
        assert!(args(&["--verbose", "hi"]).is_err());
    }

    #[test]
    fn test_stream_prefix_is_not_an_agent_name() {
        let triage = support_desk();
        let mut names = vec![triage.name.clone()];
        names.extend(triage.handoffs.iter().map(|h| h.target().name.clone()));
        assert!(names.iter().all(|name| name != STREAM_PREFIX));
    }

    #[tokio::test]
    async fn test_scripted_desk_routes_damaged_items_to_refund() {
        let runner = Runner::new(Arc::new(scripted_support_desk()));
        let result = runner
            .run(support_desk(), "My mug arrived damaged")
            .await;

        assert!(result.success);
        assert_eq!(result.metadata.handoff_path, vec!["Triage", "Refund"]);
        assert!(result.output().contains("refunds"));
    }
}
