//! The client orchestrator — a task-lifecycle protocol state machine.
//!
//! [`TaskClient`] drives one server-managed task to completion. It resolves
//! the agent card once, picks SSE or polling, and re-derives task state with
//! authoritative `tasks/get` calls whenever the active channel signals
//! activity. All mutable state lives in a single worker task; the handle
//! talks to it over a command channel and observes it through a state
//! mirror, so there is exactly one writer for every transition.
//!
//! Concurrency invariants the worker enforces:
//! - one active channel at a time (a fresh channel id makes signals from a
//!   superseded channel inert);
//! - one in-flight authoritative fetch at a time (a newer trigger cancels
//!   and generation-stamps out the older one);
//! - every network call runs against a child of the root [`CancelToken`],
//!   so close cancels everything transitively, and aborted calls resolve to
//!   [`ClientError::Aborted`] which is discarded, never reported.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::card::CardResolver;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, CloseReason, ErrorContext};
use crate::poll::{PollLoop, PollSignal};
use crate::sse::{self, SseChannel, StreamSignal};
use crate::store::{ChangeEvent, TaskStore};
use crate::transport::JsonRpcTransport;
use crate::types::{
    AgentCard, Message, Task, TaskIdParams, TaskQueryParams, TaskSendParams, TaskState,
};

/// The orchestrator's own state machine, distinct from [`TaskState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Not yet started.
    Idle,
    /// Fetching the agent card.
    Initializing,
    /// Opening an SSE stream.
    StartingSse,
    /// Starting the poll flow.
    StartingPoll,
    /// SSE stream established.
    ConnectedSse,
    /// Poll loop running.
    Polling,
    /// Waiting out the backoff before reopening the stream.
    ReconnectingSse,
    /// A poll tick failed; retrying at the same cadence.
    RetryingPoll,
    /// The task is waiting on the caller; channels are stopped.
    InputRequired,
    /// A caller-initiated send is in flight.
    Sending,
    /// A caller-initiated cancel is in flight.
    Canceling,
    /// Terminal: closed normally.
    Closed,
    /// Terminal: closed by a fatal error.
    Error,
}

impl ClientState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Closed | ClientState::Error)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Idle => "idle",
            ClientState::Initializing => "initializing",
            ClientState::StartingSse => "starting-sse",
            ClientState::StartingPoll => "starting-poll",
            ClientState::ConnectedSse => "connected-sse",
            ClientState::Polling => "polling",
            ClientState::ReconnectingSse => "reconnecting-sse",
            ClientState::RetryingPoll => "retrying-poll",
            ClientState::InputRequired => "input-required",
            ClientState::Sending => "sending",
            ClientState::Canceling => "canceling",
            ClientState::Closed => "closed",
            ClientState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// The update-delivery mechanism selected from the agent card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Server-sent events via `tasks/sendSubscribe` / `tasks/resubscribe`.
    Sse,
    /// Fixed-cadence `tasks/get` polling.
    Poll,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sse => write!(f, "sse"),
            Strategy::Poll => write!(f, "poll"),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running task client.
///
/// Cheap to clone. Dropping the last handle closes the worker with
/// `closed-by-caller`. All methods return immediately; outcomes arrive as
/// [`ClientEvent`]s on the receiver returned by [`TaskClient::start`] /
/// [`TaskClient::resume`].
#[derive(Debug, Clone)]
pub struct TaskClient {
    task_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ClientState>,
}

impl TaskClient {
    /// Start a new task with a generated task id.
    ///
    /// Initialization runs asynchronously; failures surface as `error` /
    /// `close` events, never as a panic or error from this call. Must be
    /// called within a tokio runtime.
    pub fn start(
        endpoint: impl Into<String>,
        message: Message,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        Self::start_with_id(
            endpoint,
            uuid::Uuid::new_v4().to_string(),
            message,
            config,
        )
    }

    /// Start a new task with a caller-supplied task id.
    pub fn start_with_id(
        endpoint: impl Into<String>,
        task_id: impl Into<String>,
        message: Message,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        Self::launch(endpoint.into(), task_id.into(), Launch::Create(message), config)
    }

    /// Resume observation of an existing task.
    ///
    /// Begins with an authoritative `tasks/get` instead of a send; the
    /// channel choice follows the state that get reports.
    pub fn resume(
        endpoint: impl Into<String>,
        task_id: impl Into<String>,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        Self::launch(endpoint.into(), task_id.into(), Launch::Resume, config)
    }

    fn launch(
        endpoint: String,
        task_id: String,
        launch: Launch,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ClientState::Idle);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        // Stream signals arrive from a synchronous callback; one relay task
        // folds them into the internal channel.
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel::<(u64, StreamSignal)>();
        let relay_tx = internal_tx.clone();
        tokio::spawn(async move {
            while let Some((id, signal)) = stream_rx.recv().await {
                if relay_tx.send(Internal::Stream(id, signal)).is_err() {
                    return;
                }
            }
        });

        let worker = Worker {
            endpoint,
            task_id: task_id.clone(),
            config,
            transport: None,
            card: None,
            strategy: Strategy::Poll,
            store: TaskStore::new(),
            events: event_tx,
            events_gone: false,
            state: ClientState::Idle,
            state_tx,
            internal_tx,
            stream_tx,
            root: CancelToken::new(),
            channel: ActiveChannel::None,
            channel_id: 0,
            reconnect_attempts: 0,
            fetch_generation: 0,
            fetch_token: None,
            debounce_deadline: None,
            reconnect_deadline: None,
            paused: false,
            closed: false,
        };
        tokio::spawn(worker.run(cmd_rx, internal_rx, launch));

        let handle = Self {
            task_id,
            commands: cmd_tx,
            state_rx,
        };
        (handle, event_rx)
    }

    /// The task id this client drives.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The current orchestrator state.
    pub fn state(&self) -> ClientState {
        *self.state_rx.borrow()
    }

    /// Send a follow-up message on the same task.
    ///
    /// Fails fast with [`ClientError::InvalidState`] when the client is
    /// terminal, canceling, or already sending.
    pub fn send(&self, message: Message) -> ClientResult<()> {
        let state = self.state();
        if state.is_terminal()
            || matches!(state, ClientState::Canceling | ClientState::Sending)
        {
            return Err(ClientError::InvalidState(state));
        }
        self.commands
            .send(Command::Send(message))
            .map_err(|_| ClientError::InvalidState(ClientState::Closed))
    }

    /// Cancel the task. No-op when already terminal or canceling.
    ///
    /// Issues `tasks/cancel`, then one authoritative `tasks/get` whose
    /// result — not the cancel response — becomes the final applied state,
    /// then closes with `task-canceled-by-client`.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Close the client. Safe to call multiple times; exactly one `close`
    /// event is ever emitted.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Suspend network activity without closing — the task identity and
    /// last-known snapshot are preserved.
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Resume network activity after [`pause`](Self::pause).
    pub fn resume_comms(&self) {
        let _ = self.commands.send(Command::ResumeComms);
    }
}

// ---------------------------------------------------------------------------
// Worker plumbing
// ---------------------------------------------------------------------------

enum Launch {
    Create(Message),
    Resume,
}

enum Command {
    Send(Message),
    Cancel,
    Close,
    Pause,
    ResumeComms,
}

enum Internal {
    CardReady(ClientResult<AgentCard>),
    Stream(u64, StreamSignal),
    Poll(u64, PollSignal),
    PollSnapshot(u64, Task),
    FetchDone {
        generation: u64,
        purpose: FetchPurpose,
        outcome: Result<FetchOutcome, FetchFailure>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
    InitialGet,
    CreatePoll,
    SendPoll,
    StreamTrigger,
    Cancel,
}

enum FetchOutcome {
    Snapshot(Task),
    SendThenGet { sent: Task, got: Task },
}

struct FetchFailure {
    error: ClientError,
    stage: FetchStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStage {
    Send,
    Get,
    Cancel,
}

enum ActiveChannel {
    None,
    Sse(SseChannel),
    Poll(PollLoop),
}

impl ActiveChannel {
    fn stop(&mut self) {
        match std::mem::replace(self, ActiveChannel::None) {
            ActiveChannel::None => {}
            ActiveChannel::Sse(channel) => channel.stop(),
            ActiveChannel::Poll(poll) => poll.stop(),
        }
    }
}

struct Worker {
    endpoint: String,
    task_id: String,
    config: ClientConfig,
    transport: Option<Arc<JsonRpcTransport>>,
    card: Option<AgentCard>,
    strategy: Strategy,
    store: TaskStore,
    events: mpsc::Sender<ClientEvent>,
    events_gone: bool,
    state: ClientState,
    state_tx: watch::Sender<ClientState>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    stream_tx: mpsc::UnboundedSender<(u64, StreamSignal)>,
    root: CancelToken,
    channel: ActiveChannel,
    channel_id: u64,
    reconnect_attempts: u32,
    fetch_generation: u64,
    fetch_token: Option<CancelToken>,
    debounce_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
    paused: bool,
    closed: bool,
}

impl Worker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        launch: Launch,
    ) {
        self.set_state(ClientState::Initializing);
        self.spawn_card_fetch();
        let mut launch = Some(launch);

        loop {
            if self.closed {
                break;
            }
            let debounce = self.debounce_deadline;
            let reconnect = self.reconnect_deadline;

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Every handle dropped: the caller is gone.
                    None => self.close(CloseReason::ClosedByCaller).await,
                },
                Some(signal) = internal_rx.recv() => {
                    self.handle_internal(signal, &mut launch).await;
                }
                _ = sleep_opt(debounce), if debounce.is_some() => {
                    self.debounce_deadline = None;
                    self.spawn_fetch(FetchPurpose::StreamTrigger, FetchKind::Get);
                }
                _ = sleep_opt(reconnect), if reconnect.is_some() => {
                    self.reconnect_deadline = None;
                    self.reopen_stream();
                }
            }
        }
    }

    // -- command handling ---------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send(message) => self.handle_send(message).await,
            Command::Cancel => self.handle_cancel().await,
            Command::Close => self.close(CloseReason::ClosedByCaller).await,
            Command::Pause => self.handle_pause(),
            Command::ResumeComms => self.handle_resume_comms(),
        }
    }

    async fn handle_send(&mut self, message: Message) {
        if self.state.is_terminal()
            || matches!(self.state, ClientState::Canceling | ClientState::Sending)
        {
            return;
        }
        if self.transport.is_none() {
            // Still initializing; there is no strategy to re-enter yet.
            self.emit(ClientEvent::Error {
                error: ClientError::InvalidState(self.state),
                context: ErrorContext::Send,
            })
            .await;
            return;
        }

        // Internal stop: the channel dies but no close event is emitted.
        self.stop_channel();
        self.abort_fetch();
        self.debounce_deadline = None;
        self.reconnect_deadline = None;
        self.reconnect_attempts = 0;
        self.set_state(ClientState::Sending);

        // Strategy is re-selected from the cached card on every send.
        self.strategy = select_strategy(self.card.as_ref(), self.config.force_poll);
        match self.strategy {
            Strategy::Sse => {
                self.set_state(ClientState::StartingSse);
                self.open_sse("tasks/sendSubscribe", self.send_params(message));
            }
            Strategy::Poll => {
                self.set_state(ClientState::StartingPoll);
                self.spawn_fetch(FetchPurpose::SendPoll, FetchKind::SendThenGet(message));
            }
        }
    }

    async fn handle_cancel(&mut self) {
        if self.state.is_terminal() || self.state == ClientState::Canceling {
            return;
        }
        self.stop_channel();
        self.abort_fetch();
        self.debounce_deadline = None;
        self.reconnect_deadline = None;
        self.set_state(ClientState::Canceling);

        if self.transport.is_none() {
            // Nothing has reached the server yet; there is nothing to cancel
            // remotely.
            self.close(CloseReason::TaskCanceledByClient).await;
            return;
        }
        self.spawn_fetch(FetchPurpose::Cancel, FetchKind::CancelThenGet);
    }

    fn handle_pause(&mut self) {
        if self.state.is_terminal() || self.paused {
            return;
        }
        tracing::debug!(task_id = %self.task_id, "pausing client comms");
        self.paused = true;
        self.stop_channel();
        self.abort_fetch();
        self.debounce_deadline = None;
        self.reconnect_deadline = None;
    }

    fn handle_resume_comms(&mut self) {
        if self.state.is_terminal() || !self.paused {
            return;
        }
        tracing::debug!(task_id = %self.task_id, "resuming client comms");
        self.paused = false;
        match self.store.current() {
            Some(task) => self.branch_on_state(&task),
            // Paused before anything was applied; just bring a channel up.
            None => self.ensure_channel(),
        }
    }

    // -- internal signal handling -------------------------------------------

    async fn handle_internal(&mut self, signal: Internal, launch: &mut Option<Launch>) {
        match signal {
            Internal::CardReady(result) => self.handle_card_ready(result, launch).await,
            Internal::Stream(id, signal) => self.handle_stream_signal(id, signal).await,
            Internal::Poll(id, signal) => self.handle_poll_signal(id, signal).await,
            Internal::PollSnapshot(id, task) => {
                if id == self.channel_id && matches!(self.channel, ActiveChannel::Poll(_)) {
                    if self.state == ClientState::RetryingPoll {
                        self.set_state(ClientState::Polling);
                    }
                    self.apply_and_branch(task).await;
                }
            }
            Internal::FetchDone {
                generation,
                purpose,
                outcome,
            } => self.handle_fetch_done(generation, purpose, outcome).await,
        }
    }

    async fn handle_card_ready(
        &mut self,
        result: ClientResult<AgentCard>,
        launch: &mut Option<Launch>,
    ) {
        let card = match result {
            Ok(card) => card,
            Err(ClientError::Aborted) => return,
            Err(error) => {
                let context = match &error {
                    ClientError::Authentication(_) => ErrorContext::Authentication,
                    _ => ErrorContext::AgentCardFetch,
                };
                self.fatal(error, context, CloseReason::ErrorFatal).await;
                return;
            }
        };

        let transport = Arc::new(JsonRpcTransport::new(
            card.url.clone(),
            self.config.auth.clone(),
            self.config.request_timeout,
        ));
        self.transport = Some(transport);
        self.strategy = select_strategy(Some(&card), self.config.force_poll);
        tracing::debug!(
            agent = %card.name,
            strategy = %self.strategy,
            "initialized from agent card"
        );
        self.card = Some(card);

        match launch.take() {
            Some(Launch::Create(message)) => match self.strategy {
                Strategy::Sse => {
                    self.set_state(ClientState::StartingSse);
                    self.open_sse("tasks/sendSubscribe", self.send_params(message));
                }
                Strategy::Poll => {
                    self.set_state(ClientState::StartingPoll);
                    self.spawn_fetch(FetchPurpose::CreatePoll, FetchKind::SendThenGet(message));
                }
            },
            Some(Launch::Resume) => {
                self.set_state(match self.strategy {
                    Strategy::Sse => ClientState::StartingSse,
                    Strategy::Poll => ClientState::StartingPoll,
                });
                self.spawn_fetch(FetchPurpose::InitialGet, FetchKind::Get);
            }
            // A second card result cannot happen; the fetch runs once.
            None => {}
        }
    }

    async fn handle_stream_signal(&mut self, id: u64, signal: StreamSignal) {
        if id != self.channel_id || !matches!(self.channel, ActiveChannel::Sse(_)) {
            return; // superseded or stopped channel
        }
        match signal {
            StreamSignal::Opened => {
                self.reconnect_attempts = 0;
                self.set_state(ClientState::ConnectedSse);
            }
            StreamSignal::Frame(frame) => {
                if frame.is_final {
                    tracing::debug!(task_id = %self.task_id, "stream segment marked final");
                    // The segment is over, but only an authoritative fetch
                    // may decide whether the task itself is done.
                    self.stop_channel();
                    self.debounce_deadline = None;
                    self.spawn_fetch(FetchPurpose::StreamTrigger, FetchKind::Get);
                } else if frame.signals_change() {
                    // Coalesce: a new trigger replaces the pending one.
                    self.debounce_deadline =
                        Some(Instant::now() + self.config.sse_coalesce_window);
                } else {
                    tracing::warn!(
                        task_id = %self.task_id,
                        "ignoring SSE frame with neither status nor artifact"
                    );
                }
            }
            StreamSignal::Failed {
                error,
                during_connect,
            } => {
                self.channel = ActiveChannel::None;
                let context = if during_connect {
                    ErrorContext::SseConnect
                } else {
                    ErrorContext::SseStream
                };
                self.emit(ClientEvent::Error {
                    error: error.clone(),
                    context,
                })
                .await;
                self.handle_stream_failure(error).await;
            }
        }
    }

    /// Reconnect policy: bounded attempts with exponential backoff.
    async fn handle_stream_failure(&mut self, last: ClientError) {
        if self.paused || self.closed {
            return;
        }
        if self.reconnect_attempts >= self.config.sse_max_reconnect_attempts {
            self.fatal(
                ClientError::RetriesExhausted {
                    attempts: self.reconnect_attempts,
                    last: Box::new(last),
                },
                ErrorContext::SseReconnectFailed,
                CloseReason::SseReconnectFailed,
            )
            .await;
            return;
        }
        self.reconnect_attempts += 1;
        let delay = reconnect_delay(
            self.config.sse_initial_reconnect_delay,
            self.config.sse_max_reconnect_delay,
            self.reconnect_attempts,
        );
        tracing::debug!(
            task_id = %self.task_id,
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling SSE reconnect"
        );
        self.set_state(ClientState::ReconnectingSse);
        self.reconnect_deadline = Some(Instant::now() + delay);
    }

    /// Reconnection always resumes the existing task (`tasks/resubscribe`),
    /// never restarts it.
    fn reopen_stream(&mut self) {
        if self.closed || self.paused || self.state.is_terminal() {
            return;
        }
        self.open_sse("tasks/resubscribe", self.query_params());
    }

    async fn handle_poll_signal(&mut self, id: u64, signal: PollSignal) {
        if id != self.channel_id || !matches!(self.channel, ActiveChannel::Poll(_)) {
            return;
        }
        match signal {
            PollSignal::StepFailed(error) => {
                self.set_state(ClientState::RetryingPoll);
                self.emit(ClientEvent::Error {
                    error,
                    context: ErrorContext::PollGet,
                })
                .await;
            }
            PollSignal::Exhausted(error) => {
                self.channel = ActiveChannel::None;
                self.fatal(
                    error,
                    ErrorContext::PollRetryFailed,
                    CloseReason::PollRetryFailed,
                )
                .await;
            }
        }
    }

    async fn handle_fetch_done(
        &mut self,
        generation: u64,
        purpose: FetchPurpose,
        outcome: Result<FetchOutcome, FetchFailure>,
    ) {
        if generation != self.fetch_generation {
            return; // superseded fetch; its result must not apply
        }
        self.fetch_token = None;

        match outcome {
            Ok(FetchOutcome::Snapshot(task)) => {
                if purpose == FetchPurpose::Cancel {
                    // The authoritative post-cancel state. Apply it and close;
                    // the cancel response itself was never applied.
                    self.apply_snapshot(task).await;
                    self.close(CloseReason::TaskCanceledByClient).await;
                } else {
                    self.apply_and_branch(task).await;
                }
            }
            Ok(FetchOutcome::SendThenGet { sent, got }) => {
                self.apply_snapshot(sent).await;
                self.apply_and_branch(got).await;
            }
            Err(failure) if failure.error.is_aborted() => {
                // Intentionally cancelled (close/cancel/supersede raced in);
                // deliberately not an error event.
            }
            Err(failure) => self.handle_fetch_failure(purpose, failure).await,
        }
    }

    async fn handle_fetch_failure(&mut self, purpose: FetchPurpose, failure: FetchFailure) {
        // Authentication failures are fatal wherever they happen.
        if matches!(failure.error, ClientError::Authentication(_)) {
            self.fatal(
                failure.error,
                ErrorContext::Authentication,
                CloseReason::ErrorFatal,
            )
            .await;
            return;
        }

        match purpose {
            FetchPurpose::InitialGet => {
                self.fatal(
                    failure.error,
                    ErrorContext::InitialGet,
                    CloseReason::ErrorFatal,
                )
                .await;
            }
            FetchPurpose::CreatePoll => {
                let context = match failure.stage {
                    FetchStage::Send => ErrorContext::InitialSend,
                    _ => ErrorContext::InitialGet,
                };
                self.fatal(failure.error, context, CloseReason::ErrorFatal).await;
            }
            FetchPurpose::SendPoll => {
                self.fatal(failure.error, ErrorContext::Send, CloseReason::ErrorFatal)
                    .await;
            }
            FetchPurpose::StreamTrigger => {
                // The stream told us something changed but the follow-up get
                // failed. Recover through the reconnect path: it is bounded
                // and ends in `sse-reconnect-failed` if the server stays bad.
                self.emit(ClientEvent::Error {
                    error: failure.error.clone(),
                    context: ErrorContext::SseStream,
                })
                .await;
                self.stop_channel();
                self.handle_stream_failure(failure.error).await;
            }
            FetchPurpose::Cancel => {
                // Close anyway; the client must not stay stuck in `canceling`.
                self.emit(ClientEvent::Error {
                    error: failure.error,
                    context: ErrorContext::Cancel,
                })
                .await;
                self.close(CloseReason::ErrorOnCancel).await;
            }
        }
    }

    // -- snapshots and branching --------------------------------------------

    async fn apply_and_branch(&mut self, task: Task) {
        self.apply_snapshot(task).await;
        if let Some(task) = self.store.current() {
            self.branch_on_state(&task);
            if task.status.state.is_terminal() {
                self.close(close_reason_for(task.status.state)).await;
            }
        }
    }

    /// Diff the snapshot through the store and emit the derived events.
    async fn apply_snapshot(&mut self, task: Task) {
        let changes = self.store.apply(task);
        let snapshot = match self.store.current() {
            Some(snapshot) => snapshot,
            None => return,
        };
        for change in changes {
            let event = match change {
                ChangeEvent::StatusChanged(status) => ClientEvent::StatusUpdate {
                    status,
                    task: snapshot.clone(),
                },
                ChangeEvent::ArtifactChanged(artifact) => ClientEvent::ArtifactUpdate {
                    artifact,
                    task: snapshot.clone(),
                    removed: false,
                },
                ChangeEvent::ArtifactRemoved(artifact) => ClientEvent::ArtifactUpdate {
                    artifact,
                    task: snapshot.clone(),
                    removed: true,
                },
                ChangeEvent::TaskChanged(task) => ClientEvent::TaskUpdate { task },
            };
            self.emit(event).await;
        }
    }

    /// The common branch run after every authoritative snapshot.
    ///
    /// Terminal closes are handled by the caller (after this returns), so
    /// pausing logic here stays synchronous.
    fn branch_on_state(&mut self, task: &Task) {
        let state = task.status.state;
        if state.is_terminal() {
            // close happens in apply_and_branch
            return;
        }
        if state == TaskState::InputRequired {
            // Nothing to stream or poll while the caller owes input.
            self.stop_channel();
            self.debounce_deadline = None;
            self.reconnect_deadline = None;
            self.set_state(ClientState::InputRequired);
            return;
        }
        self.ensure_channel();
    }

    /// Bring the strategy's channel up if it is not already running.
    fn ensure_channel(&mut self) {
        if self.paused || self.closed {
            return;
        }
        match self.strategy {
            Strategy::Sse => {
                if !matches!(self.channel, ActiveChannel::Sse(_)) {
                    self.set_state(ClientState::StartingSse);
                    self.open_sse("tasks/resubscribe", self.query_params());
                }
            }
            Strategy::Poll => {
                if !matches!(self.channel, ActiveChannel::Poll(_)) {
                    self.start_poll();
                }
            }
        }
    }

    // -- channel management -------------------------------------------------

    fn open_sse<P>(&mut self, method: &'static str, params: P)
    where
        P: serde::Serialize + Send + Sync + 'static,
    {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => return,
        };
        self.stop_channel();
        self.channel_id += 1;
        let channel = sse::open_tagged(
            transport,
            method,
            params,
            &self.root,
            self.channel_id,
            self.stream_tx.clone(),
        );
        self.channel = ActiveChannel::Sse(channel);
    }

    fn start_poll(&mut self) {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => return,
        };
        self.stop_channel();
        self.channel_id += 1;
        let id = self.channel_id;
        let task_id = self.task_id.clone();
        let history_length = self.config.history_length;
        let internal_tx = self.internal_tx.clone();
        let signal_tx = self.internal_tx.clone();

        let step = move |token: CancelToken| {
            let transport = transport.clone();
            let task_id = task_id.clone();
            let internal_tx = internal_tx.clone();
            async move {
                let params = TaskQueryParams {
                    id: task_id,
                    history_length,
                    metadata: None,
                };
                let task: Task = transport.request("tasks/get", &params, &token).await?;
                let _ = internal_tx.send(Internal::PollSnapshot(id, task));
                Ok(())
            }
        };
        let on_signal = move |signal: PollSignal| {
            let _ = signal_tx.send(Internal::Poll(id, signal));
        };

        let poll = PollLoop::start(
            self.config.poll_interval,
            self.config.poll_max_error_attempts,
            &self.root,
            step,
            on_signal,
        );
        self.channel = ActiveChannel::Poll(poll);
        self.set_state(ClientState::Polling);
    }

    /// Internal stop: kills the channel without emitting anything.
    fn stop_channel(&mut self) {
        self.channel.stop();
    }

    // -- fetch machinery ----------------------------------------------------

    /// Spawn the single-slot authoritative fetch; a newer call cancels and
    /// supersedes an older in-flight one.
    fn spawn_fetch(&mut self, purpose: FetchPurpose, kind: FetchKind) {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => return,
        };
        self.abort_fetch();
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        let token = self.root.child();
        self.fetch_token = Some(token.clone());

        let task_id = self.task_id.clone();
        let session_id = self.store.current().and_then(|t| t.session_id);
        let history_length = self.config.history_length;
        let internal_tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome =
                run_fetch(transport, task_id, session_id, history_length, kind, token).await;
            let _ = internal_tx.send(Internal::FetchDone {
                generation,
                purpose,
                outcome,
            });
        });
    }

    fn abort_fetch(&mut self) {
        if let Some(token) = self.fetch_token.take() {
            token.cancel();
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Emit `error` then exactly one `close`.
    async fn fatal(&mut self, error: ClientError, context: ErrorContext, reason: CloseReason) {
        tracing::error!(task_id = %self.task_id, %context, %error, "fatal client error");
        self.emit(ClientEvent::Error { error, context }).await;
        self.close(reason).await;
    }

    /// Terminal teardown. Idempotent: the first call wins, later calls are
    /// no-ops and emit nothing.
    async fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_channel();
        self.abort_fetch();
        self.debounce_deadline = None;
        self.reconnect_deadline = None;
        self.root.cancel();

        let state = match reason {
            CloseReason::TaskCompleted
            | CloseReason::TaskCanceledByAgent
            | CloseReason::TaskCanceledByClient
            | CloseReason::TaskFailed
            | CloseReason::ClosedByCaller => ClientState::Closed,
            CloseReason::ErrorFatal
            | CloseReason::SseReconnectFailed
            | CloseReason::PollRetryFailed
            | CloseReason::ErrorOnCancel => ClientState::Error,
        };
        self.set_state(state);
        tracing::debug!(task_id = %self.task_id, %reason, "client closed");
        self.emit(ClientEvent::Close { reason }).await;
        // A closed client holds no task state.
        self.store.clear();
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state != state {
            tracing::debug!(task_id = %self.task_id, from = %self.state, to = %state, "state");
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    async fn emit(&mut self, event: ClientEvent) {
        if self.events_gone {
            return;
        }
        if self.events.send(event).await.is_err() {
            // Receiver dropped: keep running teardown obligations, stop
            // delivering.
            self.events_gone = true;
        }
    }

    // -- helpers ------------------------------------------------------------

    fn spawn_card_fetch(&self) {
        let resolver = CardResolver::new(reqwest::Client::new(), self.config.auth.clone());
        let endpoint = self.endpoint.clone();
        let token = self.root.child();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = resolver.resolve(&endpoint, &token).await;
            let _ = internal_tx.send(Internal::CardReady(result));
        });
    }

    fn send_params(&self, message: Message) -> TaskSendParams {
        TaskSendParams {
            id: self.task_id.clone(),
            session_id: self.store.current().and_then(|t| t.session_id),
            message,
            history_length: self.config.history_length,
            metadata: None,
        }
    }

    fn query_params(&self) -> TaskQueryParams {
        TaskQueryParams {
            id: self.task_id.clone(),
            history_length: self.config.history_length,
            metadata: None,
        }
    }
}

enum FetchKind {
    Get,
    SendThenGet(Message),
    CancelThenGet,
}

async fn run_fetch(
    transport: Arc<JsonRpcTransport>,
    task_id: String,
    session_id: Option<String>,
    history_length: Option<u32>,
    kind: FetchKind,
    token: CancelToken,
) -> Result<FetchOutcome, FetchFailure> {
    let query = TaskQueryParams {
        id: task_id.clone(),
        history_length,
        metadata: None,
    };

    match kind {
        FetchKind::Get => {
            let task: Task = transport
                .request("tasks/get", &query, &token)
                .await
                .map_err(|error| FetchFailure {
                    error,
                    stage: FetchStage::Get,
                })?;
            Ok(FetchOutcome::Snapshot(task))
        }
        FetchKind::SendThenGet(message) => {
            let params = TaskSendParams {
                id: task_id,
                session_id,
                message,
                history_length,
                metadata: None,
            };
            let sent: Task = transport
                .request("tasks/send", &params, &token)
                .await
                .map_err(|error| FetchFailure {
                    error,
                    stage: FetchStage::Send,
                })?;
            // The send response is not trusted to be fully current; one
            // authoritative get follows immediately.
            let got: Task = transport
                .request("tasks/get", &query, &token)
                .await
                .map_err(|error| FetchFailure {
                    error,
                    stage: FetchStage::Get,
                })?;
            Ok(FetchOutcome::SendThenGet { sent, got })
        }
        FetchKind::CancelThenGet => {
            let params = TaskIdParams {
                id: task_id,
                metadata: None,
            };
            // The cancel response is not trusted to carry final state; the
            // follow-up get is authoritative.
            let _: Task = transport
                .request("tasks/cancel", &params, &token)
                .await
                .map_err(|error| FetchFailure {
                    error,
                    stage: FetchStage::Cancel,
                })?;
            let got: Task = transport
                .request("tasks/get", &query, &token)
                .await
                .map_err(|error| FetchFailure {
                    error,
                    stage: FetchStage::Get,
                })?;
            Ok(FetchOutcome::Snapshot(got))
        }
    }
}

fn select_strategy(card: Option<&AgentCard>, force_poll: bool) -> Strategy {
    match card {
        Some(card) if card.capabilities.streaming && !force_poll => Strategy::Sse,
        _ => Strategy::Poll,
    }
}

fn close_reason_for(state: TaskState) -> CloseReason {
    match state {
        TaskState::Completed => CloseReason::TaskCompleted,
        TaskState::Canceled => CloseReason::TaskCanceledByAgent,
        TaskState::Failed => CloseReason::TaskFailed,
        // Callers only map terminal states.
        _ => CloseReason::ErrorFatal,
    }
}

/// `base * 2^(attempt-1)`, capped, with ±10–20% random jitter.
fn reconnect_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(max);

    let mut rng = rand::thread_rng();
    let magnitude: f64 = rng.gen_range(0.10..=0.20);
    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    Duration::from_secs_f64(capped.as_secs_f64() * (1.0 + sign * magnitude))
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
