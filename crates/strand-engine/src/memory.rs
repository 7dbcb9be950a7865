use async_trait::async_trait;
use parking_lot::RwLock;

use strand_core::errors::MemoryError;
use strand_core::memory::MemoryStore;
use strand_core::messages::Message;

/// Process-local conversation history.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, message: Message) -> Result<(), MemoryError> {
        self.messages.write().push(message);
        Ok(())
    }

    async fn add_batch(&self, messages: Vec<Message>) -> Result<(), MemoryError> {
        self.messages.write().extend(messages);
        Ok(())
    }

    async fn history(&self) -> Result<Vec<Message>, MemoryError> {
        Ok(self.messages.read().clone())
    }

    fn clone_store(&self) -> Box<dyn MemoryStore> {
        Box::new(Self::with_messages(self.messages.read().clone()))
    }
}

/// Keep the most recent `window` messages. A non-positive window keeps all.
///
/// The cut never starts on a tool message: the assistant message carrying
/// the matching calls must stay in view, so the window extends backwards
/// until it reaches a non-tool message.
pub fn apply_window(mut history: Vec<Message>, window: i64) -> Vec<Message> {
    if window <= 0 {
        return history;
    }
    let window = usize::try_from(window).unwrap_or(usize::MAX);
    if history.len() <= window {
        return history;
    }
    let mut start = history.len() - window;
    while start > 0 && history[start].role == strand_core::Role::Tool {
        start -= 1;
    }
    history.split_off(start)
}
