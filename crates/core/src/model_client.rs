use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use toolrelay_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, TokenUsage, ToolCall,
};
use tracing::Instrument;

use crate::accumulator::StreamAccumulator;

type SendRequestResult = Result<RoundResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
pub(crate) type TranscriptFn = Arc<dyn Fn(&str) + Send + Sync>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<TranscriptFn>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_transcript| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_transcript).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and drains the whole response.
    ///
    /// Text deltas are passed to `on_transcript` as they arrive.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_transcript: Option<TranscriptFn>,
    ) -> SendRequestResult {
        (self.handler_fn)(req, on_transcript).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub struct RoundResponse {
    /// All text of the response.
    pub content: String,
    /// Tool calls requested by the model, ordered by slot index.
    pub tool_calls: Vec<ToolCall>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    /// Token usage, zero if the provider didn't report it.
    pub usage: TokenUsage,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: Option<TranscriptFn>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut accumulator = StreamAccumulator::default();
    let mut finish_reason = None;
    let mut usage = TokenUsage::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                accumulator.push_text(&msg);
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(&msg);
                }
            }
            ModelResponseEvent::ToolCallDelta(delta) => {
                accumulator.push_tool_call_delta(delta);
            }
            ModelResponseEvent::Completed(reason) => {
                if reason == ModelFinishReason::ContentFilter {
                    warn!("response was cut by the content filter");
                }
                finish_reason = Some(reason);
            }
            ModelResponseEvent::Usage(round_usage) => {
                usage += round_usage;
            }
        }
    }

    trace!("finished a request");

    let (content, tool_calls) = accumulator.finish();
    Ok(RoundResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use toolrelay_model::{ErrorKind, ModelMessage};
    use toolrelay_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
                PresetEvent::Usage(TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 3,
                    total_tokens: 4,
                }),
            ]),
        );

        let model_client = ModelClient::new(model_provider);

        for _ in 0..3 {
            let on_transcript_called = Arc::new(AtomicBool::new(false));
            let resp = model_client
                .send_request(request(), {
                    let on_transcript_called =
                        Arc::clone(&on_transcript_called);
                    let on_transcript: TranscriptFn =
                        Arc::new(move |_: &str| {
                            on_transcript_called
                                .store(true, Ordering::Relaxed);
                        });
                    Some(on_transcript)
                })
                .await
                .unwrap();
            assert_eq!(resp.content, "How are you?");
            assert!(resp.tool_calls.is_empty());
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
            assert_eq!(resp.usage.total_tokens, 4);
            assert!(on_transcript_called.load(Ordering::Relaxed));
        }
    }

    #[tokio::test]
    async fn test_tool_call_round() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::tool_call_start(0, "call_1", "get_weather"),
                PresetEvent::tool_call_arguments(0, r#"{"loc"#),
                PresetEvent::tool_call_arguments(0, r#"ation":"Paris"}"#),
            ]),
        );

        let model_client = ModelClient::new(model_provider);
        let resp = model_client.send_request(request(), None).await.unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments, r#"{"location":"Paris"}"#);
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let resp_or_err = model_client.send_request(request(), None).await;
        assert!(matches!(resp_or_err, Err(_)));

        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::MessageDelta("Half".to_owned()),
                PresetEvent::StreamError,
            ]),
        );
        let model_client = ModelClient::new(model_provider);
        let err = model_client
            .send_request(request(), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
