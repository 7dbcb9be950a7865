use std::time::Instant;

use strand_core::observer::{TraceIds, TraceSpan, Tracer};
use tracing::{debug, warn};

/// [`Tracer`] backed by `tracing` spans. Each engine span becomes an
/// `engine_span` carrying the run/step/span ids; its duration and error are
/// logged when it ends.
pub struct TracingTracer;

struct TracingSpan {
    span: tracing::Span,
    name: String,
    started: Instant,
    error: Option<String>,
}

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str, ids: &TraceIds) -> Box<dyn TraceSpan> {
        let span = tracing::info_span!(
            "engine_span",
            label = %name,
            run_id = %ids.run_id,
            step_id = %ids.step_id,
            span_id = %ids.span_id,
        );
        Box::new(TracingSpan {
            span,
            name: name.to_string(),
            started: Instant::now(),
            error: None,
        })
    }
}

impl TraceSpan for TracingSpan {
    fn record_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
    }

    fn end(self: Box<Self>) {
        let _entered = self.span.enter();
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match &self.error {
            Some(error) => warn!(span = %self.name, duration_ms, error = %error, "span failed"),
            None => debug!(span = %self.name, duration_ms, "span completed"),
        }
    }
}
