use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use strand_core::checkpoint::Checkpointer;
use strand_core::context::RunContext;
use strand_core::errors::ModelError;
use strand_core::guardrail::GuardrailStage;
use strand_core::ids::{RunId, SpanId, StepId};
use strand_core::memory::MemoryStore;
use strand_core::messages::{Message, ToolCall, ToolResult};
use strand_core::model::{Model, ModelEvent, ModelRequest, ModelResponse, ResponseFormat, Usage};
use strand_core::observer::{
    LlmEnd, LlmStart, NoopObserver, NoopTracer, Observer, ToolEnd, ToolStart, TraceIds, Tracer,
};
use strand_core::run::{Checkpoint, RunResult};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::agent::Agent;
use crate::error::{EngineError, GuardrailViolation};
use crate::invoker::{ParallelInvoker, SerialInvoker, ToolInvoker};
use crate::memory::{apply_window, InMemoryStore};
use crate::middleware::{
    CancelStack, Middleware, MiddlewareChain, ModelCall, RetryMiddleware, TimeoutMiddleware,
};
use crate::settings::RunnerSettings;
use crate::state::{State, ToolState};
use crate::stream::{RunEvent, RunEventKind};

const DEFAULT_MAX_TURNS: u32 = 4;
const DEFAULT_HISTORY_WINDOW: i64 = 20;
const DEFAULT_STREAM_BUFFER: usize = 64;

/// Drives the turn loop: model call, tool dispatch, repeat until the model
/// answers without tool calls or the turn budget runs out.
///
/// `run`, `run_stream` and `run_from_checkpoint` share one loop, so hook
/// order, checkpoint cadence and guardrail placement are identical across
/// them.
#[derive(Clone)]
pub struct Runner {
    model: Arc<dyn Model>,
    middlewares: MiddlewareChain,
    invoker: Arc<dyn ToolInvoker>,
    memory: Arc<dyn MemoryStore>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    observer: Arc<dyn Observer>,
    tracer: Arc<dyn Tracer>,
    max_turns: u32,
    history_window: i64,
    stream_buffer: usize,
    response_format: Option<ResponseFormat>,
}

pub struct RunnerBuilder {
    model: Option<Arc<dyn Model>>,
    middlewares: MiddlewareChain,
    invoker: Option<Arc<dyn ToolInvoker>>,
    memory: Option<Arc<dyn MemoryStore>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    observer: Option<Arc<dyn Observer>>,
    tracer: Option<Arc<dyn Tracer>>,
    max_turns: u32,
    history_window: i64,
    stream_buffer: usize,
    response_format: Option<ResponseFormat>,
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self {
            model: None,
            middlewares: MiddlewareChain::new(),
            invoker: None,
            memory: None,
            checkpointer: None,
            observer: None,
            tracer: None,
            max_turns: DEFAULT_MAX_TURNS,
            history_window: DEFAULT_HISTORY_WINDOW,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            response_format: None,
        }
    }
}

impl RunnerBuilder {
    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Registration order matters: hooks run in this order and the first
    /// registered LLM middleware is the outermost.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Zero or negative sends the whole history every turn.
    pub fn history_window(mut self, window: i64) -> Self {
        self.history_window = window;
        self
    }

    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Adopt loop limits from settings and register the matching built-in
    /// middlewares (retry, then timeout when any deadline is set).
    pub fn settings(mut self, settings: &RunnerSettings) -> Self {
        self.max_turns = settings.max_turns;
        self.history_window = settings.history_window;
        self.stream_buffer = settings.stream_buffer;
        self.middlewares
            .push(Arc::new(RetryMiddleware::new(settings.retry.to_config())));
        if settings.timeouts.llm_ms > 0 || settings.timeouts.tool_ms > 0 {
            self.middlewares.push(Arc::new(TimeoutMiddleware::new(
                Duration::from_millis(settings.timeouts.llm_ms),
                Duration::from_millis(settings.timeouts.tool_ms),
            )));
        }
        self.invoker = Some(if settings.parallel_tools {
            Arc::new(ParallelInvoker::new(settings.max_tool_concurrency))
        } else {
            Arc::new(SerialInvoker)
        });
        self
    }

    pub fn build(self) -> Result<Runner, EngineError> {
        let model = self
            .model
            .ok_or_else(|| EngineError::Config("a model is required".into()))?;
        if self.max_turns == 0 {
            return Err(EngineError::Config("max_turns must be at least 1".into()));
        }
        if self.stream_buffer == 0 {
            return Err(EngineError::Config("stream_buffer must be at least 1".into()));
        }
        Ok(Runner {
            model,
            middlewares: self.middlewares,
            invoker: self.invoker.unwrap_or_else(|| Arc::new(SerialInvoker)),
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            checkpointer: self.checkpointer,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            tracer: self.tracer.unwrap_or_else(|| Arc::new(NoopTracer)),
            max_turns: self.max_turns,
            history_window: self.history_window,
            stream_buffer: self.stream_buffer,
            response_format: self.response_format,
        })
    }
}

/// Where a run starts: a fresh input or a checkpoint boundary.
struct Progress {
    run_id: RunId,
    input: Message,
    start_turn: u32,
    tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolResult>,
    usage: Usage,
}

/// Sending half of a `run_stream` channel. Remembers the turn in progress so
/// the terminal event can be stamped with it.
struct Emitter {
    tx: mpsc::Sender<RunEvent>,
    run_id: RunId,
    position: Mutex<Option<(u32, StepId)>>,
}

impl Emitter {
    fn new(tx: mpsc::Sender<RunEvent>, run_id: RunId) -> Self {
        Self {
            tx,
            run_id,
            position: Mutex::new(None),
        }
    }

    fn enter_turn(&self, turn: u32, step_id: &StepId) {
        *self.position.lock() = Some((turn, step_id.clone()));
    }

    /// Last turn entered, or turn 0 with no step before the loop starts.
    fn position(&self) -> (u32, Option<StepId>) {
        match self.position.lock().clone() {
            Some((turn, step_id)) => (turn, Some(step_id)),
            None => (0, None),
        }
    }

    async fn emit(
        &self,
        turn: u32,
        step_id: Option<&StepId>,
        span_id: Option<&SpanId>,
        kind: RunEventKind,
    ) -> Result<(), EngineError> {
        let event = RunEvent {
            run_id: self.run_id.clone(),
            step_id: step_id.cloned(),
            span_id: span_id.cloned(),
            turn,
            kind,
        };
        self.tx.send(event).await.map_err(|_| {
            warn!(run_id = %self.run_id, "stream consumer dropped, stopping run");
            EngineError::Cancelled
        })
    }
}

/// Innermost step of the blocking chain.
struct Generate<'a> {
    model: &'a dyn Model,
}

#[async_trait]
impl ModelCall for Generate<'_> {
    async fn call(&self, ctx: &RunContext, request: &ModelRequest) -> Result<ModelResponse, EngineError> {
        Ok(ctx.run(self.model.generate(ctx, request)).await??)
    }
}

/// Innermost step of the streaming chain: relays deltas and aggregates the
/// final response.
struct StreamRelay<'a> {
    model: &'a dyn Model,
    emitter: &'a Emitter,
    turn: u32,
    step_id: &'a StepId,
    span_id: &'a SpanId,
}

#[async_trait]
impl ModelCall for StreamRelay<'_> {
    async fn call(&self, ctx: &RunContext, request: &ModelRequest) -> Result<ModelResponse, EngineError> {
        let mut stream = ctx.run(self.model.generate_stream(ctx, request)).await??;
        while let Some(event) = ctx.run(stream.next()).await? {
            match event {
                ModelEvent::Done(response) => return Ok(response),
                ModelEvent::Error(e) => return Err(e.into()),
                delta => {
                    self.emitter
                        .emit(
                            self.turn,
                            Some(self.step_id),
                            Some(self.span_id),
                            RunEventKind::Model(delta),
                        )
                        .await?
                }
            }
        }
        Err(ModelError::StreamInterrupted("stream ended without a final response".into()).into())
    }
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    /// Runner with built-in middlewares configured from `settings`.
    pub fn from_settings(model: Arc<dyn Model>, settings: &RunnerSettings) -> Result<Self, EngineError> {
        settings
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Self::builder().model(model).settings(settings).build()
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn middlewares(&self) -> &MiddlewareChain {
        &self.middlewares
    }

    /// Run to completion and return the final assistant message.
    pub async fn run(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        input: Message,
    ) -> Result<Message, EngineError> {
        Ok(self.run_with_result(ctx, agent, input).await?.message)
    }

    /// Run to completion and return the final message with its audit trail.
    #[instrument(skip_all, fields(agent = %agent.name()))]
    pub async fn run_with_result(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        input: Message,
    ) -> Result<RunResult, EngineError> {
        self.start(ctx, agent, RunId::new(), input, None).await
    }

    /// Run on a spawned task, streaming events into a bounded channel. The
    /// last event is either `Completed` or a single `Error`; the channel
    /// closes right after.
    pub fn run_stream(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        input: Message,
    ) -> mpsc::Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let runner = self.clone();
        let ctx = ctx.clone();
        let agent = Arc::clone(agent);
        let run_id = RunId::new();

        tokio::spawn(async move {
            let emitter = Emitter::new(tx, run_id.clone());
            let outcome = runner
                .start(&ctx, &agent, run_id, input, Some(&emitter))
                .await;
            let kind = match outcome {
                Ok(result) => RunEventKind::Completed(Box::new(result)),
                Err(e) => RunEventKind::Error(e),
            };
            let (turn, step_id) = emitter.position();
            if emitter.emit(turn, step_id.as_ref(), None, kind).await.is_err() {
                debug!(run_id = %emitter.run_id, "terminal stream event not delivered");
            }
        });

        rx
    }

    /// Resume at `checkpoint.turn + 1` with a fresh in-memory store holding
    /// the checkpointed conversation.
    pub async fn run_from_checkpoint(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        checkpoint: Checkpoint,
    ) -> Result<RunResult, EngineError> {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        self.run_from_checkpoint_with_memory(ctx, agent, checkpoint, store)
            .await
    }

    /// Like [`Runner::run_from_checkpoint`] but rehydrates into `store`.
    #[instrument(skip_all, fields(agent = %agent.name(), run_id = %checkpoint.run_id, turn = checkpoint.turn))]
    pub async fn run_from_checkpoint_with_memory(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        checkpoint: Checkpoint,
        store: Arc<dyn MemoryStore>,
    ) -> Result<RunResult, EngineError> {
        if checkpoint.run_id.is_empty() {
            return Err(EngineError::InvalidCheckpoint("empty run id".into()));
        }
        if checkpoint.turn >= self.max_turns {
            return Err(EngineError::MaxTurnsExceeded {
                max_turns: self.max_turns,
                run_id: checkpoint.run_id,
            });
        }
        store.add_batch(checkpoint.conversation()).await?;
        info!(run_id = %checkpoint.run_id, turn = checkpoint.turn, "resuming run from checkpoint");

        let progress = Progress {
            start_turn: checkpoint.turn + 1,
            run_id: checkpoint.run_id,
            input: checkpoint.input,
            tool_calls: checkpoint.tool_calls,
            tool_results: checkpoint.tool_results,
            usage: checkpoint.usage,
        };
        self.drive(ctx, agent, progress, store.as_ref(), None).await
    }

    /// Load the latest checkpoint for `run_id` from the configured
    /// checkpointer and resume from it.
    pub async fn resume(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        run_id: &RunId,
    ) -> Result<RunResult, EngineError> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| EngineError::Config("resume requires a checkpointer".into()))?;
        let checkpoint = checkpointer.load(ctx, run_id).await?;
        self.run_from_checkpoint(ctx, agent, checkpoint).await
    }

    async fn start(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        run_id: RunId,
        input: Message,
        emitter: Option<&Emitter>,
    ) -> Result<RunResult, EngineError> {
        self.check_guardrails(ctx, agent, &input, GuardrailStage::Input)
            .await?;
        self.memory.add(input.clone()).await?;
        info!(run_id = %run_id, agent = %agent.name(), "run started");

        let progress = Progress {
            run_id,
            input,
            start_turn: 1,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: Usage::default(),
        };
        self.drive(ctx, agent, progress, self.memory.as_ref(), emitter)
            .await
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        mut progress: Progress,
        memory: &dyn MemoryStore,
        emitter: Option<&Emitter>,
    ) -> Result<RunResult, EngineError> {
        for turn in progress.start_turn..=self.max_turns {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            let step_id = StepId::for_turn(&progress.run_id, turn);
            if let Some(em) = emitter {
                em.enter_turn(turn, &step_id);
            }
            debug!(run_id = %progress.run_id, turn, "turn started");

            let history = apply_window(memory.history().await?, self.history_window);
            let mut messages = Vec::with_capacity(history.len() + 1);
            if !agent.system_prompt().is_empty() {
                messages.push(Message::system(agent.system_prompt()));
            }
            messages.extend(history);

            let mut state = State {
                ctx: ctx.clone(),
                agent: Arc::clone(agent),
                run_id: progress.run_id.clone(),
                span_id: SpanId::llm(&step_id),
                step_id,
                turn,
                input: progress.input.clone(),
                messages,
                response: None,
            };
            self.middlewares.before_llm(&mut state).await?;

            let request = self.build_request(agent, &state);
            let response = self.call_model(ctx, &state, &request, emitter).await?;
            progress.usage += response.usage;
            state.response = Some(response);
            self.middlewares.after_llm(&mut state).await?;

            let assistant = state
                .response
                .take()
                .ok_or_else(|| EngineError::Internal("after_llm hook cleared the response".into()))?
                .message;
            memory.add(assistant.clone()).await?;

            if !assistant.has_tool_calls() {
                self.check_guardrails(ctx, agent, &assistant, GuardrailStage::Output)
                    .await?;
                self.emit_assistant(emitter, &state, &assistant).await?;
                self.save_checkpoint(ctx, agent, memory, &progress, turn)
                    .await?;
                info!(run_id = %progress.run_id, turn, "run completed");
                return Ok(RunResult {
                    run_id: progress.run_id,
                    message: assistant,
                    usage: progress.usage,
                    tool_calls: progress.tool_calls,
                    tool_results: progress.tool_results,
                    turns: turn,
                });
            }

            self.emit_assistant(emitter, &state, &assistant).await?;
            let (calls, results) = self
                .dispatch_tools(ctx, &state, &assistant.tool_calls, emitter)
                .await?;
            let tool_messages: Vec<Message> = results.iter().map(Message::tool_result).collect();
            memory.add_batch(tool_messages).await?;
            progress.tool_calls.extend(calls);
            progress.tool_results.extend(results);
            self.save_checkpoint(ctx, agent, memory, &progress, turn)
                .await?;
        }

        warn!(run_id = %progress.run_id, max_turns = self.max_turns, "turn budget exhausted");
        Err(EngineError::MaxTurnsExceeded {
            max_turns: self.max_turns,
            run_id: progress.run_id,
        })
    }

    async fn emit_assistant(
        &self,
        emitter: Option<&Emitter>,
        state: &State,
        assistant: &Message,
    ) -> Result<(), EngineError> {
        match emitter {
            Some(em) => {
                em.emit(
                    state.turn,
                    Some(&state.step_id),
                    Some(&state.span_id),
                    RunEventKind::AssistantMessage(assistant.clone()),
                )
                .await
            }
            None => Ok(()),
        }
    }

    fn build_request(&self, agent: &Agent, state: &State) -> ModelRequest {
        let tools = if self.model.supports_tools() && !agent.tools().is_empty() {
            agent.tools().specs()
        } else {
            Vec::new()
        };
        ModelRequest {
            messages: state.messages.clone(),
            tools,
            tool_choice: None,
            response_format: self.response_format.clone(),
        }
    }

    async fn call_model(
        &self,
        ctx: &RunContext,
        state: &State,
        request: &ModelRequest,
        emitter: Option<&Emitter>,
    ) -> Result<ModelResponse, EngineError> {
        let mut cancels = CancelStack::new();
        let llm_ctx = self.middlewares.llm_context(ctx, state, &mut cancels);
        let ids = state.trace_ids();
        let mut span = self.tracer.start_span("llm", &ids);
        self.observer.on_llm_start(&LlmStart {
            ids: &ids,
            turn: state.turn,
            model: self.model.name(),
            message_count: request.messages.len(),
        });

        let start = Instant::now();
        let result = match emitter {
            None => {
                let terminal = Generate {
                    model: self.model.as_ref(),
                };
                self.middlewares
                    .llm_next(&terminal)
                    .run(&llm_ctx, state, request)
                    .await
            }
            Some(emitter) => {
                let terminal = StreamRelay {
                    model: self.model.as_ref(),
                    emitter,
                    turn: state.turn,
                    step_id: &state.step_id,
                    span_id: &state.span_id,
                };
                self.middlewares
                    .llm_next(&terminal)
                    .run(&llm_ctx, state, request)
                    .await
            }
        };

        self.observer.on_llm_end(&LlmEnd {
            ids: &ids,
            turn: state.turn,
            model: self.model.name(),
            duration: start.elapsed(),
            usage: result.as_ref().ok().map(|r| r.usage),
            error: result.as_ref().err().map(ToString::to_string),
        });
        if let Err(e) = &result {
            span.record_error(&e.to_string());
        }
        span.end();
        cancels.release();
        result
    }

    async fn dispatch_tools(
        &self,
        ctx: &RunContext,
        state: &State,
        calls: &[ToolCall],
        emitter: Option<&Emitter>,
    ) -> Result<(Vec<ToolCall>, Vec<ToolResult>), EngineError> {
        let mut tool_states = Vec::with_capacity(calls.len());
        for (index, call) in calls.iter().enumerate() {
            let mut tool_state = ToolState {
                ctx: ctx.clone(),
                agent: Arc::clone(&state.agent),
                run_id: state.run_id.clone(),
                step_id: state.step_id.clone(),
                span_id: SpanId::tool(&state.step_id, index),
                turn: state.turn,
                call: call.clone(),
                result: None,
            };
            let ids = tool_state.trace_ids();
            self.observer.on_tool_start(&ToolStart { ids: &ids, call });
            self.middlewares.before_tool(&mut tool_state).await?;
            if let Some(em) = emitter {
                em.emit(
                    state.turn,
                    Some(&tool_state.step_id),
                    Some(&tool_state.span_id),
                    RunEventKind::ToolCallStart {
                        call: tool_state.call.clone(),
                    },
                )
                .await?;
            }
            tool_states.push(tool_state);
        }

        let batch: Vec<ToolCall> = tool_states.iter().map(|s| s.call.clone()).collect();
        let mut cancels = CancelStack::new();
        let tool_ctx = self
            .middlewares
            .tool_context(ctx, state, &batch, &mut cancels);
        let batch_ids = TraceIds {
            run_id: state.run_id.clone(),
            step_id: state.step_id.clone(),
            span_id: SpanId::tools(&state.step_id),
        };
        let mut span = self.tracer.start_span("tools", &batch_ids);
        let outcome = self
            .invoker
            .invoke(&tool_ctx, state.agent.tools(), &batch)
            .await;
        cancels.release();
        if let Err(e) = &outcome {
            span.record_error(&e.to_string());
        }
        span.end();

        let results = outcome?;
        if results.len() != batch.len() {
            return Err(EngineError::Internal(format!(
                "invoker returned {} results for {} calls",
                results.len(),
                batch.len()
            )));
        }

        let mut finished = Vec::with_capacity(results.len());
        for (mut tool_state, result) in tool_states.into_iter().zip(results) {
            tool_state.result = Some(result);
            self.middlewares.after_tool(&mut tool_state).await?;
            let result = tool_state
                .result
                .take()
                .ok_or_else(|| EngineError::Internal("after_tool hook cleared the result".into()))?;
            let ids = tool_state.trace_ids();
            self.observer.on_tool_end(&ToolEnd {
                ids: &ids,
                call: &tool_state.call,
                result: &result,
            });
            if let Some(em) = emitter {
                em.emit(
                    state.turn,
                    Some(&tool_state.step_id),
                    Some(&tool_state.span_id),
                    RunEventKind::ToolResult {
                        result: result.clone(),
                    },
                )
                .await?;
            }
            finished.push(result);
        }
        Ok((batch, finished))
    }

    async fn check_guardrails(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        message: &Message,
        stage: GuardrailStage,
    ) -> Result<(), EngineError> {
        let guardrails = match stage {
            GuardrailStage::Input => agent.input_guardrails(),
            GuardrailStage::Output => agent.output_guardrails(),
        };
        for guardrail in guardrails {
            let verdict = match stage {
                GuardrailStage::Input => guardrail.validate_input(ctx, message).await,
                GuardrailStage::Output => guardrail.validate_output(ctx, message).await,
            };
            if !verdict.passed {
                warn!(guardrail = guardrail.name(), %stage, reason = %verdict.reason, "guardrail blocked run");
                return Err(GuardrailViolation {
                    guardrail: guardrail.name().to_string(),
                    stage,
                    reason: verdict.reason,
                    details: verdict.details,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        memory: &dyn MemoryStore,
        progress: &Progress,
        turn: u32,
    ) -> Result<(), EngineError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };
        let history = memory.history().await?;
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !agent.system_prompt().is_empty() {
            messages.push(Message::system(agent.system_prompt()));
        }
        messages.extend(history);

        let checkpoint = Checkpoint {
            run_id: progress.run_id.clone(),
            turn,
            input: progress.input.clone(),
            messages,
            tool_calls: progress.tool_calls.clone(),
            tool_results: progress.tool_results.clone(),
            usage: progress.usage,
            updated_at: Utc::now(),
        };
        checkpointer.save(ctx, &checkpoint).await?;
        debug!(run_id = %progress.run_id, turn, "checkpoint saved");
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("model", &self.model.name())
            .field("middlewares", &self.middlewares)
            .field("max_turns", &self.max_turns)
            .field("history_window", &self.history_window)
            .field("stream_buffer", &self.stream_buffer)
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}
