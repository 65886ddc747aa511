//! Conversation-related types.

use toolrelay_model::ModelMessage;

/// The message history of one conversation.
///
/// The history only grows: messages are appended by the agent loop and are
/// never rewritten, so replaying it sends exactly what the model saw
/// before.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Returns the messages in conversation order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing has been said yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends the messages of a whole round at once.
    #[inline]
    pub(crate) fn commit(&mut self, msgs: Vec<ModelMessage>) {
        self.messages.extend(msgs);
    }
}
