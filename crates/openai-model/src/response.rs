use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use toolrelay_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    TokenUsage, ToolCallDelta,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{ChatCompletionChunk, ErrorBody};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // One chunk may translate to several events, they are queued here and
    // handed out one by one before pulling the next chunk.
    pending_events: VecDeque<ModelResponseEvent>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_events: Default::default(),
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok((None, partial_state)),
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.0, ErrorKind::Unavailable));
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            return Ok((None, partial_state));
        }

        let chunk = parse_chunk(&sse_event)?;
        if !chunk.id.is_empty() {
            let id = partial_state.id.get_or_insert_with(|| chunk.id.clone());
            if *id != chunk.id {
                return Err(Error::new("chunk id mismatch", ErrorKind::Other));
            }
        }
        partial_state.pending_events.extend(chunk_events(chunk));
    }
}

fn parse_chunk(data: &str) -> Result<ChatCompletionChunk, Error> {
    // Some servers report failures in the middle of a stream. Every chunk
    // field is optional, so an error body must be checked for first.
    if let Ok(body) = serde_json::from_str::<ErrorBody>(data) {
        let kind = body.error.error_kind();
        return Err(Error::new(body.error.message, kind));
    }
    serde_json::from_str::<ChatCompletionChunk>(data)
        .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))
}

/// Translates a chunk into events.
///
/// Text comes before tool call deltas, and the finish reason comes last,
/// which is the order the fields are meant to be applied in.
fn chunk_events(chunk: ChatCompletionChunk) -> Vec<ModelResponseEvent> {
    let mut events = vec![];
    for choice in chunk.choices {
        if let Some(content) =
            choice.delta.content.filter(|content| !content.is_empty())
        {
            events.push(ModelResponseEvent::MessageDelta(content));
        }
        for (pos, tool_call) in
            choice.delta.tool_calls.into_iter().flatten().enumerate()
        {
            let (name, arguments) = match tool_call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            events.push(ModelResponseEvent::ToolCallDelta(ToolCallDelta {
                index: tool_call.index.unwrap_or(pos as u32),
                id: tool_call.id,
                kind: tool_call.r#type,
                name,
                arguments,
            }));
        }
        if let Some(finish_reason) = choice.finish_reason {
            let finish_reason = match finish_reason.as_str() {
                "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
                "length" => ModelFinishReason::Length,
                "content_filter" => ModelFinishReason::ContentFilter,
                _ => ModelFinishReason::Stop,
            };
            events.push(ModelResponseEvent::Completed(finish_reason));
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(ModelResponseEvent::Usage(TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }));
    }
    events
}
