//! Background batching of asynchronously submitted events.
//!
//! A [`Batcher`] owns one tokio task that collects submissions from a
//! bounded queue and sends them as batch requests, either when
//! `max_batch_size` events have accumulated or when the flush interval
//! elapses. Each submitter holds a [`ResultSink`] that resolves exactly once
//! with the outcome for its own event, correlated by position within the
//! batch.
//!
//! Lifecycle is `Running → Draining → Stopped`. Once draining begins the
//! queue is closed, so late submissions are rejected with
//! `TrylError::BatcherStopped` instead of being silently lost.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tryl_core::{validate_event, Event, EventReceipt, Result, TrylError, MAX_EVENTS_PER_BATCH};

use crate::{dispatcher::Dispatcher, observer::BatchFailureObserver};

/// Batching behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Events per batch request, at most [`MAX_EVENTS_PER_BATCH`].
    pub max_batch_size: usize,

    /// Maximum time a submission waits in a partial batch.
    pub flush_interval: Duration,

    /// Queue capacity. Submitters wait for space when it is full.
    pub max_pending_events: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_EVENTS_PER_BATCH,
            flush_interval: Duration::from_secs(5),
            max_pending_events: 10_000,
        }
    }
}

impl BatchConfig {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Configuration` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_EVENTS_PER_BATCH {
            return Err(TrylError::configuration(format!(
                "max_batch_size must be between 1 and {MAX_EVENTS_PER_BATCH} (got: {})",
                self.max_batch_size
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(TrylError::configuration("flush_interval must be positive"));
        }
        if self.max_pending_events == 0 {
            return Err(TrylError::configuration("max_pending_events must be positive"));
        }
        Ok(())
    }
}

/// Lifecycle of a batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Accepting submissions.
    Running,
    /// Shutdown requested; queued submissions are being sent.
    Draining,
    /// The background task has exited.
    Stopped,
}

/// Completion handle for one asynchronously submitted event.
///
/// Resolves exactly once. If the producing side goes away without
/// resolving it, the sink yields `TrylError::BatcherStopped`.
#[derive(Debug)]
pub struct ResultSink {
    receiver: oneshot::Receiver<Result<EventReceipt>>,
}

/// Producing half of a [`ResultSink`].
pub(crate) type SinkSender = oneshot::Sender<Result<EventReceipt>>;

impl ResultSink {
    pub(crate) fn channel() -> (SinkSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// A sink that is already resolved.
    pub fn resolved(result: Result<EventReceipt>) -> Self {
        let (sender, sink) = Self::channel();
        let _ = sender.send(result);
        sink
    }

    /// Returns the outcome if it is already available, without waiting.
    pub fn try_result(&mut self) -> Option<Result<EventReceipt>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TrylError::BatcherStopped)),
        }
    }
}

impl Future for ResultSink {
    type Output = Result<EventReceipt>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TrylError::BatcherStopped)))
    }
}

/// An accepted submission awaiting its batch.
#[derive(Debug)]
struct PendingSubmission {
    event: Event,
    cancel: CancellationToken,
    sink: SinkSender,
}

#[derive(Debug)]
enum Command {
    Flush { reply: oneshot::Sender<Result<()>> },
}

/// Accumulates submissions and sends them in batches from a background task.
#[derive(Debug)]
pub struct Batcher {
    submissions: mpsc::Sender<PendingSubmission>,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<BatcherState>>,
    stop_signal: CancellationToken,
    done: CancellationToken,
    abort: CancellationToken,
    config: BatchConfig,
}

impl Batcher {
    /// Validates `config` and spawns the background task.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Configuration` if the config is invalid or no
    /// tokio runtime is running.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        config: BatchConfig,
        observer: Arc<dyn BatchFailureObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TrylError::configuration("batching requires a running tokio runtime")
        })?;

        let (submissions, submission_rx) = mpsc::channel(config.max_pending_events);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(BatcherState::Running));
        let stop_signal = CancellationToken::new();
        let done = CancellationToken::new();
        let abort = CancellationToken::new();

        let batch_loop = BatchLoop {
            dispatcher,
            observer,
            max_batch_size: config.max_batch_size,
            flush_interval: config.flush_interval,
            submissions: submission_rx,
            commands: command_rx,
            state: state.clone(),
            stop_signal: stop_signal.clone(),
            abort: abort.clone(),
            accumulator: Vec::with_capacity(config.max_batch_size),
        };
        runtime.spawn(batch_loop.run(done.clone()));

        info!(
            max_batch_size = config.max_batch_size,
            flush_interval_ms = u64::try_from(config.flush_interval.as_millis()).unwrap_or(u64::MAX),
            max_pending_events = config.max_pending_events,
            "batcher started"
        );

        Ok(Self { submissions, commands, state, stop_signal, done, abort, config })
    }

    /// The configuration in use.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BatcherState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of submissions waiting in the queue, excluding the partial
    /// batch held by the background task.
    pub fn queued_len(&self) -> usize {
        self.submissions.max_capacity() - self.submissions.capacity()
    }

    /// Submits an event for batched delivery.
    ///
    /// Waits for queue space when the queue is full. The returned sink is
    /// already resolved when the token is cancelled (before or while
    /// waiting), when the event fails validation, or when the batcher is no
    /// longer running.
    ///
    /// Once queued, a cancelled submission is skipped at the next send and
    /// only then resolves with `TrylError::Cancelled`, which can be up to one
    /// flush interval later.
    pub async fn enqueue(&self, cancel: &CancellationToken, event: Event) -> ResultSink {
        if cancel.is_cancelled() {
            return ResultSink::resolved(Err(TrylError::Cancelled));
        }
        if self.state() != BatcherState::Running {
            return ResultSink::resolved(Err(TrylError::BatcherStopped));
        }
        if let Err(error) = validate_event(&event) {
            return ResultSink::resolved(Err(error));
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return ResultSink::resolved(Err(TrylError::Cancelled)),
            permit = self.submissions.reserve() => permit,
        };

        let Ok(permit) = permit else {
            return ResultSink::resolved(Err(TrylError::BatcherStopped));
        };

        let (sink_sender, sink) = ResultSink::channel();
        permit.send(PendingSubmission { event, cancel: cancel.clone(), sink: sink_sender });
        sink
    }

    /// Sends everything accumulated or queued right now, without waiting
    /// for further submissions.
    ///
    /// Cancelling `cancel` stops the wait but not sends already under way.
    ///
    /// # Errors
    ///
    /// Returns the first batch failure; later batches are still sent.
    /// Returns `TrylError::Cancelled` if `cancel` fires first.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TrylError::Cancelled);
        }

        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Flush { reply }).is_err() {
            // The task has exited after draining everything.
            return Ok(());
        }

        tokio::select! {
            biased;
            result = response => result.unwrap_or(Err(TrylError::BatcherStopped)),
            () = cancel.cancelled() => Err(TrylError::Cancelled),
        }
    }

    /// Stops accepting submissions, sends everything queued, and waits for
    /// the background task to exit.
    ///
    /// Idempotent: every call waits for the same termination.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Cancelled` if `cancel` fires before the task
    /// exits. Draining continues in the background regardless.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == BatcherState::Running {
                *state = BatcherState::Draining;
                info!(queued = self.queued_len(), "batcher draining");
            }
        }
        self.stop_signal.cancel();

        tokio::select! {
            biased;
            () = self.done.cancelled() => Ok(()),
            () = cancel.cancelled() => Err(TrylError::Cancelled),
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        if !self.stop_signal.is_cancelled() && !self.done.is_cancelled() {
            error!(
                queued = self.queued_len(),
                "Batcher dropped without stop! Aborting pending deliveries"
            );
            self.abort.cancel();
        }
    }
}

struct BatchLoop {
    dispatcher: Arc<Dispatcher>,
    observer: Arc<dyn BatchFailureObserver>,
    max_batch_size: usize,
    flush_interval: Duration,
    submissions: mpsc::Receiver<PendingSubmission>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: Arc<Mutex<BatcherState>>,
    stop_signal: CancellationToken,
    abort: CancellationToken,
    accumulator: Vec<PendingSubmission>,
}

impl BatchLoop {
    async fn run(mut self, done: CancellationToken) {
        let _done = done.drop_guard();

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    self.abandon().await;
                    break;
                }
                () = self.stop_signal.cancelled() => {
                    self.drain_and_stop().await;
                    break;
                }
                Some(command) = self.commands.recv() => match command {
                    Command::Flush { reply } => {
                        let result = self.flush_now().await;
                        let _ = reply.send(result);
                    },
                },
                received = self.submissions.recv() => match received {
                    Some(submission) => {
                        self.accumulator.push(submission);
                        if self.accumulator.len() >= self.max_batch_size {
                            let batch = std::mem::take(&mut self.accumulator);
                            let _ = self.send(batch).await;
                            ticker.reset();
                        }
                    },
                    None => {
                        self.abandon().await;
                        break;
                    },
                },
                _ = ticker.tick() => {
                    if !self.accumulator.is_empty() {
                        let batch = std::mem::take(&mut self.accumulator);
                        let _ = self.send(batch).await;
                    }
                }
            }
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BatcherState::Stopped;
        info!("batcher stopped");
    }

    /// Sends the accumulator and whatever is queued now.
    async fn flush_now(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.accumulator);
        while let Ok(submission) = self.submissions.try_recv() {
            pending.push(submission);
        }
        debug!(pending = pending.len(), "flushing");
        self.send_in_chunks(pending).await
    }

    /// Closes the queue, sends everything in it, then answers any flush
    /// requests that raced with shutdown.
    async fn drain_and_stop(&mut self) {
        self.submissions.close();

        let mut pending = std::mem::take(&mut self.accumulator);
        while let Some(submission) = self.submissions.recv().await {
            pending.push(submission);
        }
        info!(pending = pending.len(), "draining batcher");
        let result = self.send_in_chunks(pending).await;

        self.commands.close();
        while let Ok(Command::Flush { reply }) = self.commands.try_recv() {
            let _ = reply.send(result.clone());
        }
    }

    /// Resolves everything outstanding with `BatcherStopped` without sending.
    async fn abandon(&mut self) {
        self.submissions.close();

        let mut abandoned = std::mem::take(&mut self.accumulator);
        while let Some(submission) = self.submissions.recv().await {
            abandoned.push(submission);
        }
        if !abandoned.is_empty() {
            warn!(abandoned = abandoned.len(), "batcher aborted with undelivered events");
        }
        for submission in abandoned {
            let _ = submission.sink.send(Err(TrylError::BatcherStopped));
        }
    }

    async fn send_in_chunks(&mut self, mut pending: Vec<PendingSubmission>) -> Result<()> {
        let mut first_error = None;

        while !pending.is_empty() {
            let rest = pending.split_off(pending.len().min(self.max_batch_size));
            let chunk = std::mem::replace(&mut pending, rest);
            if let Err(error) = self.send(chunk).await {
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Sends one batch and resolves every submission in it.
    async fn send(&self, batch: Vec<PendingSubmission>) -> Result<()> {
        let mut events = Vec::with_capacity(batch.len());
        let mut sinks = Vec::with_capacity(batch.len());

        for submission in batch {
            if submission.cancel.is_cancelled() {
                let _ = submission.sink.send(Err(TrylError::Cancelled));
                continue;
            }
            events.push(submission.event);
            sinks.push(submission.sink);
        }

        if events.is_empty() {
            return Ok(());
        }

        debug!(batch_size = events.len(), "sending batch");

        match self.dispatcher.send_batch(&self.abort, &events).await {
            Ok(response) => {
                for (index, sink) in sinks.into_iter().enumerate() {
                    let _ = sink.send(response.outcome(index));
                }
                Ok(())
            },
            Err(error) => {
                for sink in sinks {
                    let _ = sink.send(Err(error.clone()));
                }
                self.observer.on_batch_failure(&events, &error);
                Err(error)
            },
        }
    }
}
