use async_trait::async_trait;

use crate::context::RunContext;
use crate::errors::CheckpointError;
use crate::ids::RunId;
use crate::run::Checkpoint;

/// Persists run snapshots. `save` replaces any earlier snapshot for the same
/// run id wholesale; `load` of an unknown run is [`CheckpointError::NotFound`].
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, ctx: &RunContext, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    async fn load(&self, ctx: &RunContext, run_id: &RunId) -> Result<Checkpoint, CheckpointError>;
}
