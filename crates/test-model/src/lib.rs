//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use toolrelay_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            let preset_events = &this.events;
            if this.event_idx < preset_events.len() {
                let event = match &preset_events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::ToolCallDelta(delta) => {
                        ModelResponseEvent::ToolCallDelta(delta.clone())
                    }
                    PresetEvent::Usage(usage) => {
                        ModelResponseEvent::Usage(*usage)
                    }
                    PresetEvent::StreamError => {
                        // Stay on this event, the response is broken.
                        return Poll::Ready(Err(Error {
                            message: "stream interrupted",
                            kind: ErrorKind::Unavailable,
                        }));
                    }
                };
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(event)));
            } else if this.event_idx == preset_events.len() {
                this.event_idx += 1;
                let has_tool_call = preset_events.iter().any(|event| {
                    matches!(event, PresetEvent::ToolCallDelta(_))
                });
                return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                    if has_tool_call {
                        ModelFinishReason::ToolCalls
                    } else {
                        ModelFinishReason::Stop
                    },
                ))));
            } else {
                // In case this method is called after completion.
                return Poll::Ready(Ok(None));
            }
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<ModelRequest>>,
    attempts: Mutex<HashMap<usize, u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. A step is selected by the
/// number of assistant turns in the request history, so the first request
/// gets the first step, the request after one tool round gets the second,
/// and so on. If there are no enough steps in the script, an error will be
/// returned.
///
/// Every request received is recorded, clones of a provider share the same
/// record.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<PresetResponse>,
    delay: Option<Duration>,
    recorder: Arc<Recorder>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script.push(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, including failed attempts.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.recorder.requests).clone()
    }

    fn step_for(req: &ModelRequest) -> usize {
        req.messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count()
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        lock(&self.recorder.requests).push(req.clone());

        let step_idx = Self::step_for(req);
        let result = 'blk: {
            let Some(step) = self.conversation_script.get(step_idx) else {
                break 'blk Err(Error {
                    message: "no enough steps",
                    kind: ErrorKind::Other,
                });
            };

            let attempt = {
                let mut attempts = lock(&self.recorder.attempts);
                let attempt = attempts.entry(step_idx).or_default();
                *attempt += 1;
                *attempt
            };
            let should_fail = match step.failures {
                Some(0) => true,
                Some(failures) => attempt <= failures,
                None => false,
            };
            if should_fail {
                break 'blk Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }

            Ok(TestModelResponse {
                events: step.events.clone(),
                event_idx: 0,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            })
        };
        ready(result)
    }
}
