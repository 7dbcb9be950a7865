use async_trait::async_trait;
use dashmap::DashMap;

use strand_core::checkpoint::Checkpointer;
use strand_core::context::RunContext;
use strand_core::errors::CheckpointError;
use strand_core::ids::RunId;
use strand_core::run::Checkpoint;

/// Checkpoints kept in a concurrent map, one snapshot per run id.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    snapshots: DashMap<RunId, Checkpoint>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, ctx: &RunContext, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if ctx.is_done() {
            return Err(CheckpointError::Storage("context finished before save".into()));
        }
        if checkpoint.run_id.is_empty() {
            return Err(CheckpointError::Invalid("empty run id".into()));
        }
        self.snapshots
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, _ctx: &RunContext, run_id: &RunId) -> Result<Checkpoint, CheckpointError> {
        self.snapshots
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))
    }
}
