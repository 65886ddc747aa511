use std::future::ready;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;
use toolrelay_model::{
    AssistantMessage, ErrorKind, ModelFinishReason, ModelMessage, TokenUsage,
    ToolCall, ToolCallResult,
};
use toolrelay_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use crate::catalog::ToolDescriptor;
use crate::tool::{
    Error as ToolError, LocalTools, Tool, ToolResult, ToolService,
};
use crate::{
    AgentBuilder, AgentConfig, AgentError, RetryConfig, ToolFailureMode,
    ToolInvocation,
};

/// A tool service that records calls and answers from a fixed table.
#[derive(Default)]
struct FakeTools {
    calls: Mutex<Vec<(String, Value)>>,
    delays: Vec<(&'static str, Duration)>,
}

impl FakeTools {
    fn with_delay(mut self, name: &'static str, delay: Duration) -> Self {
        self.delays.push((name, delay));
        self
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolService for FakeTools {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(vec![
            ToolDescriptor {
                name: "get_weather".to_owned(),
                description: Some("Get current weather.".to_owned()),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": { "location": { "type": "string" } },
                    "required": ["location"],
                })),
            },
            ToolDescriptor {
                name: "get_time".to_owned(),
                description: None,
                input_schema: None,
            },
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_owned(), arguments.clone()));
        if let Some((_, delay)) = self.delays.iter().find(|(n, _)| *n == name) {
            tokio::time::sleep(*delay).await;
        }
        match name {
            "get_weather" => Ok(json!({
                "location": arguments["location"],
                "temperature": 21,
            })),
            "get_time" => Ok(json!({ "time": "12:00" })),
            _ => Err(ToolError::not_found().with_reason(name)),
        }
    }
}

fn weather_round(id: &str, location: &str) -> PresetResponse {
    let args = format!(r#"{{"location":"{location}"}}"#);
    let (head, tail) = args.split_at(5);
    PresetResponse::with_events([
        PresetEvent::tool_call_start(0, id, "get_weather"),
        PresetEvent::tool_call_arguments(0, head),
        PresetEvent::tool_call_arguments(0, tail),
    ])
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_owned(),
        kind: "function".to_owned(),
        name: name.to_owned(),
        arguments: arguments.to_owned(),
    }
}

#[tokio::test]
async fn test_text_answer() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("4".to_owned()),
        PresetEvent::Usage(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 1,
            total_tokens: 11,
        }),
    ]));

    let transcript = Arc::new(Mutex::new(String::new()));
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .on_transcript({
            let transcript = Arc::clone(&transcript);
            move |delta: &str| transcript.lock().unwrap().push_str(delta)
        })
        .build();

    let outcome = agent.run("2+2?").await.unwrap();
    assert_eq!(outcome.answer, "4");
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.usage.total_tokens, 11);
    assert_eq!(outcome.finish_reason, Some(ModelFinishReason::Stop));
    assert_eq!(*transcript.lock().unwrap(), "4");
    assert_eq!(
        agent.conversation().messages(),
        [
            ModelMessage::User("2+2?".to_owned()),
            ModelMessage::assistant_text("4"),
        ]
    );
    assert_eq!(model_provider.requests().len(), 1);
    assert!(model_provider.requests()[0].tools.is_empty());
}

#[tokio::test]
async fn test_single_tool_round() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(weather_round("call_1", "Paris"));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Sunny, 21°C."));

    let tools = Arc::new(FakeTools::default());
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(Arc::clone(&tools))
        .build();

    let outcome = agent.run("Weather in Paris?").await.unwrap();
    assert_eq!(outcome.answer, "Sunny, 21°C.");
    assert_eq!(outcome.rounds, 2);
    assert_eq!(
        tools.calls(),
        [("get_weather".to_owned(), json!({ "location": "Paris" }))]
    );

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 2);
    assert_eq!(requests[0].tools[1].description, "No description.");

    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(
        second[1],
        ModelMessage::Assistant(AssistantMessage {
            content: None,
            tool_calls: vec![tool_call(
                "call_1",
                "get_weather",
                r#"{"location":"Paris"}"#
            )],
        })
    );
    let ModelMessage::Tool(ToolCallResult { id, content }) = &second[2] else {
        panic!("expected a tool result, got {:?}", second[2]);
    };
    assert_eq!(id, "call_1");
    let content: Value = serde_json::from_str(content).unwrap();
    assert_eq!(content, json!({ "location": "Paris", "temperature": 21 }));
}

#[tokio::test]
async fn test_two_calls_in_one_round() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(1, "call_b", "get_time"),
        PresetEvent::tool_call_start(0, "call_a", "get_weather"),
        PresetEvent::tool_call_arguments(0, r#"{"location":"#),
        PresetEvent::tool_call_arguments(1, "{}"),
        PresetEvent::tool_call_arguments(0, r#""Oslo"}"#),
    ]));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Done."));

    let tools = Arc::new(FakeTools::default());
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(Arc::clone(&tools))
        .build();
    agent.run("Weather and time in Oslo?").await.unwrap();

    let names: Vec<_> =
        tools.calls().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, ["get_weather", "get_time"]);

    let messages = &model_provider.requests()[1].messages;
    let ids: Vec<_> = messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result.id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, ["call_a", "call_b"]);
}

#[tokio::test]
async fn test_parallel_results_keep_call_order() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(0, "call_a", "get_weather"),
        PresetEvent::tool_call_arguments(0, r#"{"location":"Rome"}"#),
        PresetEvent::tool_call_start(1, "call_b", "get_time"),
    ]));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Done."));

    // The first call finishes last.
    let tools = FakeTools::default()
        .with_delay("get_weather", Duration::from_millis(50));
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(tools)
        .with_config(AgentConfig {
            parallel_tool_calls: true,
            ..Default::default()
        })
        .build();
    agent.run("Weather and time in Rome?").await.unwrap();

    let messages = agent.conversation().messages();
    assert!(matches!(&messages[2], ModelMessage::Tool(r) if r.id == "call_a"));
    assert!(matches!(&messages[3], ModelMessage::Tool(r) if r.id == "call_b"));
}

#[tokio::test]
async fn test_history_is_replayed_as_prefix() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(weather_round("call_1", "Paris"));
    model_provider.add_assistant_response_step(weather_round("call_2", "Lyon"));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Both sunny."));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(FakeTools::default())
        .build();
    let outcome = agent.run("Paris and Lyon?").await.unwrap();
    assert_eq!(outcome.rounds, 3);

    let requests = model_provider.requests();
    for pair in requests.windows(2) {
        let (prev, next) = (&pair[0].messages, &pair[1].messages);
        assert!(next.len() > prev.len());
        assert_eq!(&next[..prev.len()], prev.as_slice());
    }
    let last = requests.last().unwrap();
    assert_eq!(
        &agent.conversation().messages()[..last.messages.len()],
        last.messages.as_slice()
    );
    assert_eq!(agent.conversation().len(), last.messages.len() + 1);
}

#[tokio::test]
async fn test_malformed_arguments_do_not_stop_the_loop() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(0, "call_1", "get_time"),
        PresetEvent::tool_call_arguments(0, "{not json"),
    ]));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Noon."));

    let seen = Arc::new(Mutex::new(vec![]));
    let tools = Arc::new(FakeTools::default());
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(Arc::clone(&tools))
        .on_tool_call({
            let seen = Arc::clone(&seen);
            move |invocation: &ToolInvocation| {
                seen.lock()
                    .unwrap()
                    .push(invocation.argument_error.is_some());
            }
        })
        .build();

    let outcome = agent.run("Time?").await.unwrap();
    assert_eq!(outcome.answer, "Noon.");
    assert_eq!(*seen.lock().unwrap(), [true]);
    assert_eq!(tools.calls(), [("get_time".to_owned(), json!({}))]);

    // The raw text goes back to the model untouched.
    let requests = model_provider.requests();
    let ModelMessage::Assistant(turn) = &requests[1].messages[1] else {
        panic!("expected an assistant turn");
    };
    assert_eq!(turn.tool_calls[0].arguments, "{not json");
}

#[tokio::test]
async fn test_round_limit() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(weather_round("call_1", "Paris"));
    model_provider
        .add_assistant_response_step(weather_round("call_2", "Paris"));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Fine."));

    let tools = Arc::new(FakeTools::default());
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(Arc::clone(&tools))
        .with_max_rounds(2)
        .build();

    let err = agent.run("Weather?").await.unwrap_err();
    assert!(matches!(err, AgentError::RoundLimitExceeded { max_rounds: 2 }));
    assert_eq!(model_provider.requests().len(), 2);
    // The second round never dispatched its call.
    assert_eq!(tools.calls().len(), 1);
    assert_eq!(agent.conversation().len(), 3);
}

#[tokio::test]
async fn test_round_limit_allows_final_answer() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(weather_round("call_1", "Paris"));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Fine."));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool_service(FakeTools::default())
        .with_max_rounds(2)
        .build();
    assert_eq!(agent.run("Weather?").await.unwrap().answer, "Fine.");
}

#[tokio::test]
async fn test_tool_failure_is_propagated() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(0, "call_1", "launch_rocket"),
    ]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool_service(FakeTools::default())
        .build();

    let err = agent.run("Launch!").await.unwrap_err();
    let AgentError::Tool { call, error } = err else {
        panic!("expected a tool error, got {err:?}");
    };
    assert_eq!(call.id, "call_1");
    assert_eq!(error.reason(), "launch_rocket");
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn test_tool_failure_is_reported_to_model() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(0, "call_1", "launch_rocket"),
    ]));
    model_provider.add_assistant_response_step(PresetResponse::with_text(
        "I can't do that.",
    ));

    let results = Arc::new(Mutex::new(vec![]));
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(FakeTools::default())
        .with_config(AgentConfig {
            tool_failure: ToolFailureMode::ReportToModel,
            ..Default::default()
        })
        .on_tool_result({
            let results = Arc::clone(&results);
            move |_: &ToolInvocation, result: Result<&Value, &ToolError>| {
                results.lock().unwrap().push(result.is_ok());
            }
        })
        .build();

    let outcome = agent.run("Launch!").await.unwrap();
    assert_eq!(outcome.answer, "I can't do that.");
    assert_eq!(*results.lock().unwrap(), [false]);

    let ModelMessage::Tool(result) = &model_provider.requests()[1].messages[2]
    else {
        panic!("expected a tool result");
    };
    let content: Value = serde_json::from_str(&result.content).unwrap();
    assert!(content["error"].as_str().unwrap().contains("launch_rocket"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(
        weather_round("call_1", "Paris").with_failures(2),
    );
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Sunny."));

    let tools = Arc::new(FakeTools::default());
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(Arc::clone(&tools))
        .with_config(AgentConfig {
            retry: Some(RetryConfig {
                initial_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(50),
                max_elapsed_time: Duration::from_secs(5),
            }),
            ..Default::default()
        })
        .build();

    let outcome = agent.run("Weather?").await.unwrap();
    assert_eq!(outcome.answer, "Sunny.");
    assert_eq!(outcome.rounds, 2);
    assert_eq!(model_provider.requests().len(), 4);
    // Retries don't duplicate the round.
    assert_eq!(tools.calls().len(), 1);
    assert_eq!(agent.conversation().len(), 4);
}

#[tokio::test]
async fn test_model_failure_without_retry() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(
        PresetResponse::with_text("Sunny.").with_failures(1),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    let err = agent.run("Weather?").await.unwrap_err();
    let AgentError::Model(err) = err else {
        panic!("expected a model error, got {err:?}");
    };
    assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn test_broken_stream_fails_the_run() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(weather_round("call_1", "Paris"));
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("It's sun".to_owned()),
        PresetEvent::StreamError,
    ]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool_service(FakeTools::default())
        .build();
    let err = agent.run("Weather?").await.unwrap_err();
    let AgentError::Model(err) = err else {
        panic!("expected a model error, got {err:?}");
    };
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    // Only the completed tool round is kept.
    let messages = agent.conversation().messages();
    assert_eq!(messages.len(), 3);
    assert!(matches!(messages[2], ModelMessage::Tool(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_completed_rounds() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Hi!"));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("Again?"));
    model_provider.set_delay(Duration::from_millis(100));

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    agent.run("Hello").await.unwrap();
    assert_eq!(agent.conversation().len(), 2);

    let result =
        timeout(Duration::from_millis(150), agent.run("Hello again")).await;
    assert!(result.is_err());
    assert_eq!(agent.conversation().len(), 2);
}

#[derive(Deserialize, JsonSchema)]
struct EchoInput {
    text: String,
}

struct EchoTool;

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text back."
    }

    fn execute(
        &self,
        input: EchoInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(json!({ "echo": input.text })))
    }
}

#[tokio::test]
async fn test_local_tools() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call_start(0, "call_1", "echo"),
        PresetEvent::tool_call_arguments(0, r#"{"text":"ping"}"#),
    ]));
    model_provider
        .add_assistant_response_step(PresetResponse::with_text("pong"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool_service(LocalTools::default().with_tool(EchoTool))
        .build();

    let catalog = agent.load_tools().await.unwrap();
    assert_eq!(catalog[0].name, "echo");
    assert_eq!(agent.run("Echo ping").await.unwrap().answer, "pong");

    let requests = model_provider.requests();
    assert_eq!(requests[0].tools[0].description, "Echoes the text back.");
    let ModelMessage::Tool(result) = &requests[1].messages[2] else {
        panic!("expected a tool result");
    };
    assert_eq!(result.content, r#"{"echo":"ping"}"#);
}
