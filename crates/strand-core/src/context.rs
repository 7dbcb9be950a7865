use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ContextError;

/// Releases a derived [`RunContext`]. Must be called exactly once; the engine
/// releases these in reverse acquisition order once the guarded call returns.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Cancellation and deadline scope threaded through every engine call.
///
/// Deriving a context (`with_cancel`, `with_timeout`) creates a child scope:
/// cancelling the child never affects the parent, while cancelling the parent
/// is observed by every child.
#[derive(Clone, Debug)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this scope and all scopes derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn with_cancel(&self) -> (Self, CancelFn) {
        let child = self.token.child_token();
        let release = child.clone();
        (
            Self {
                token: child,
                deadline: self.deadline,
            },
            Box::new(move || release.cancel()),
        )
    }

    /// Derive a scope that expires after `timeout`. An existing earlier
    /// deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelFn) {
        let (mut ctx, cancel) = self.with_cancel();
        let candidate = Instant::now() + timeout;
        ctx.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        (ctx, cancel)
    }

    /// `Some` once the scope is finished.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the scope finishes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
