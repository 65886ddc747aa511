//! Runs one goal against an MCP server with an OpenAI-compatible model.

#[macro_use]
extern crate tracing;

use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::Value;
use tokio::{select, signal};
use toolrelay::SessionBuilder;
use toolrelay::core::tool::Error as ToolError;
use toolrelay::core::{
    AgentConfig, RetryConfig, ToolFailureMode, ToolInvocation,
};
use toolrelay_openai_model::{OpenAIConfigBuilder, OpenAIProvider};

const DEFAULT_GOAL: &str = "What's the weather like in Istanbul today?";
const DEFAULT_MCP_URL: &str = "http://localhost:8931/mcp";
const BAR_CHAR: &str = "▎";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Relays tool calls between a model and an MCP server"
)]
struct Args {
    /// The goal to hand to the model.
    #[arg(default_value = DEFAULT_GOAL)]
    goal: String,

    /// API key of the completion service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL of the completion service.
    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,

    /// Model to use.
    #[arg(long, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Streamable HTTP endpoint of the MCP server.
    #[arg(long, env = "TOOLRELAY_MCP_URL", default_value = DEFAULT_MCP_URL)]
    mcp_url: String,

    /// Give up if the model still calls tools after this many rounds.
    #[arg(long)]
    max_rounds: Option<NonZeroUsize>,

    /// Send tool failures to the model instead of stopping.
    #[arg(long)]
    report_tool_errors: bool,

    /// Run the tool calls of one round concurrently.
    #[arg(long)]
    parallel_tools: bool,

    /// Retry rate-limited or unavailable model requests.
    #[arg(long)]
    retries: bool,
}

impl Args {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_rounds: self.max_rounds.map(NonZeroUsize::get),
            tool_failure: if self.report_tool_errors {
                ToolFailureMode::ReportToModel
            } else {
                ToolFailureMode::Propagate
            },
            parallel_tool_calls: self.parallel_tools,
            retry: self.retries.then(RetryConfig::default),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = OpenAIConfigBuilder::with_api_key(args.api_key.clone());
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    let model_provider = OpenAIProvider::new(config.build());

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::with_template("{spinner} {wide_msg}")
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );

    let builder =
        SessionBuilder::with_model_provider(model_provider, &args.mcp_url)
            .with_config(args.agent_config())
            .on_tool_call({
                let progress_bar = progress_bar.clone();
                move |invocation: &ToolInvocation| {
                    progress_bar.suspend(|| {
                        println!(
                            "{}🔧 {} {}",
                            BAR_CHAR.bright_yellow(),
                            invocation.call.name.bright_white().bold(),
                            invocation.arguments
                        );
                        if let Some(err) = &invocation.argument_error {
                            println!(
                                "{}   malformed arguments: {err}",
                                BAR_CHAR.bright_yellow()
                            );
                        }
                    });
                    progress_bar.set_message(format!(
                        "Running {}...",
                        invocation.call.name
                    ));
                }
            })
            .on_tool_result({
                let progress_bar = progress_bar.clone();
                move |_: &ToolInvocation, result: Result<&Value, &ToolError>| {
                    progress_bar.suspend(|| match result {
                        Ok(value) => {
                            println!("{}   {value}", BAR_CHAR.bright_yellow())
                        }
                        Err(err) => println!(
                            "{}   {}",
                            BAR_CHAR.bright_red(),
                            err.red()
                        ),
                    });
                    progress_bar.set_message("🤔 Thinking...");
                }
            });

    let mut session = match builder.connect().await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{} {err}", "error:".bright_red().bold());
            return ExitCode::FAILURE;
        }
    };

    println!("Tools from {}:", session.mcp_url());
    for tool in session.catalog() {
        println!(
            "{}{} {}",
            BAR_CHAR.bright_cyan(),
            tool.name.bright_white().bold(),
            tool.description.as_deref().unwrap_or_default().dimmed()
        );
    }
    println!("\n> {}\n", args.goal);

    progress_bar.set_message("🤔 Thinking...");
    progress_bar.enable_steady_tick(Duration::from_millis(100));

    let result = select! {
        result = session.run(&args.goal) => Some(result),
        _ = signal::ctrl_c() => None,
    };
    progress_bar.finish_and_clear();
    session.close().await;

    match result {
        Some(Ok(outcome)) => {
            println!("{}: {}", "Assistant".bright_cyan(), outcome.answer);
            debug!(
                "{} rounds, {} tokens",
                outcome.rounds, outcome.usage.total_tokens
            );
            ExitCode::SUCCESS
        }
        Some(Err(err)) => {
            eprintln!("{} {err}", "error:".bright_red().bold());
            ExitCode::FAILURE
        }
        None => {
            eprintln!("interrupted");
            ExitCode::from(130)
        }
    }
}
