use std::mem;

use backoff::Error as BackoffError;
use futures_util::future::join_all;
use serde_json::json;
use toolrelay_model::{
    AssistantMessage, ModelFinishReason, ModelMessage, ModelRequest,
    TokenUsage, ToolCall, ToolCallResult,
};

use super::{Agent, AgentError, AgentOutcome, ToolFailureMode};
use crate::dispatcher::{ToolInvocation, dispatch};
use crate::model_client::RoundResponse;
use crate::tool::ToolResult;

enum Stage {
    AwaitingModel,
    AwaitingTools(Vec<ToolCall>),
    Finished(String, Option<ModelFinishReason>),
}

impl Agent {
    /// Runs the agent loop for a goal until the model answers without
    /// requesting tools.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. If the future is dropped, the
    /// conversation keeps every round that completed before, and nothing
    /// of the round in progress.
    pub async fn run<S: Into<String>>(
        &mut self,
        goal: S,
    ) -> Result<AgentOutcome, AgentError> {
        if self.catalog.is_none() {
            self.load_tools().await?;
        }

        let mut pending = vec![ModelMessage::User(goal.into())];
        let mut rounds = 0;
        let mut usage = TokenUsage::default();
        let mut stage = Stage::AwaitingModel;

        loop {
            stage = match stage {
                Stage::AwaitingModel => {
                    rounds += 1;
                    debug!("starting round {rounds}");
                    let resp = self.request_completion(&pending).await?;
                    usage += resp.usage;

                    let RoundResponse {
                        content,
                        tool_calls,
                        finish_reason,
                        ..
                    } = resp;
                    if tool_calls.is_empty() {
                        pending.push(ModelMessage::assistant_text(
                            content.clone(),
                        ));
                        Stage::Finished(content, finish_reason)
                    } else {
                        if let Some(max_rounds) = self.config.max_rounds {
                            if rounds >= max_rounds {
                                warn!(
                                    "model still calls tools after {rounds} \
                                     rounds"
                                );
                                return Err(AgentError::RoundLimitExceeded {
                                    max_rounds,
                                });
                            }
                        }
                        pending.push(ModelMessage::Assistant(AssistantMessage {
                            content: Some(content).filter(|c| !c.is_empty()),
                            tool_calls: tool_calls.clone(),
                        }));
                        Stage::AwaitingTools(tool_calls)
                    }
                }
                Stage::AwaitingTools(tool_calls) => {
                    let results = self.run_tools(tool_calls).await?;
                    pending.extend(results.into_iter().map(ModelMessage::Tool));
                    self.conversation.commit(mem::take(&mut pending));
                    Stage::AwaitingModel
                }
                Stage::Finished(answer, finish_reason) => {
                    self.conversation.commit(mem::take(&mut pending));
                    info!("finished after {rounds} rounds");
                    return Ok(AgentOutcome {
                        answer,
                        rounds,
                        usage,
                        finish_reason,
                    });
                }
            };
        }
    }

    async fn request_completion(
        &self,
        pending: &[ModelMessage],
    ) -> Result<RoundResponse, AgentError> {
        let req = ModelRequest {
            messages: self
                .conversation
                .messages()
                .iter()
                .chain(pending)
                .cloned()
                .collect(),
            tools: self.model_tools.clone(),
        };
        let on_transcript = self.observers.on_transcript.clone();

        let Some(retry) = &self.config.retry else {
            return self
                .model_client
                .send_request(req, on_transcript)
                .await
                .map_err(AgentError::Model);
        };

        let model_client = &self.model_client;
        backoff::future::retry_notify(
            retry.backoff(),
            || {
                let req = req.clone();
                let on_transcript = on_transcript.clone();
                async move {
                    model_client.send_request(req, on_transcript).await.map_err(
                        |err| {
                            if err.kind().is_transient() {
                                BackoffError::transient(err)
                            } else {
                                BackoffError::permanent(err)
                            }
                        },
                    )
                }
            },
            |err, delay| {
                warn!("model request failed: {err}, retrying in {delay:?}");
            },
        )
        .await
        .map_err(AgentError::Model)
    }

    async fn run_tools(
        &self,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Vec<ToolCallResult>, AgentError> {
        let invocations: Vec<_> =
            tool_calls.into_iter().map(ToolInvocation::parse).collect();

        if self.config.parallel_tool_calls {
            let outputs =
                join_all(invocations.iter().map(|inv| self.invoke(inv))).await;
            return invocations
                .into_iter()
                .zip(outputs)
                .map(|(inv, output)| self.settle(inv, output))
                .collect();
        }

        let mut results = Vec::with_capacity(invocations.len());
        for inv in invocations {
            let output = self.invoke(&inv).await;
            results.push(self.settle(inv, output)?);
        }
        Ok(results)
    }

    async fn invoke(&self, invocation: &ToolInvocation) -> ToolResult {
        if let Some(on_tool_call) = &self.observers.on_tool_call {
            on_tool_call(invocation);
        }
        let result = dispatch(self.tool_service.as_ref(), invocation).await;
        if let Some(on_tool_result) = &self.observers.on_tool_result {
            on_tool_result(invocation, result.as_ref());
        }
        result
    }

    fn settle(
        &self,
        invocation: ToolInvocation,
        output: ToolResult,
    ) -> Result<ToolCallResult, AgentError> {
        let content = match output {
            Ok(value) => value.to_string(),
            Err(error) => match self.config.tool_failure {
                ToolFailureMode::Propagate => {
                    return Err(AgentError::Tool {
                        call: invocation.call,
                        error,
                    });
                }
                ToolFailureMode::ReportToModel => {
                    json!({ "error": error.to_string() }).to_string()
                }
            },
        };
        Ok(ToolCallResult {
            id: invocation.call.id,
            content,
        })
    }
}
