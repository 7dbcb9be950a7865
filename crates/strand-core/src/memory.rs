use async_trait::async_trait;

use crate::errors::MemoryError;
use crate::messages::Message;

/// Append-only conversation history. The engine is the only writer during a run.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, message: Message) -> Result<(), MemoryError>;

    async fn add_batch(&self, messages: Vec<Message>) -> Result<(), MemoryError> {
        for message in messages {
            self.add(message).await?;
        }
        Ok(())
    }

    async fn history(&self) -> Result<Vec<Message>, MemoryError>;

    /// Independent copy for a parallel branch; later writes to either side
    /// are invisible to the other.
    fn clone_store(&self) -> Box<dyn MemoryStore>;
}
