//! Asynchronous command dispatch.
//!
//! Commands flow through a [`CommandBus`], which hands them to a
//! [`CommandExecutor`] and returns a [`CommandCompletion`] future of the
//! eventual [`CommandResult`]. [`LoggingCommandBus`] wraps a bus with a
//! [`CommandLog`], recording each command before execution and each produced
//! result exactly once. A command type no executor handles is a
//! configuration error and fails synchronously at the bus, before anything
//! is logged or executed. Infrastructure failure, where an executor is
//! dropped without ever completing, surfaces as a failed future and is not
//! logged: the log records commands and their outcomes, not machinery
//! breakdowns.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, RwLock},
    task::{Context, Poll},
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    command::{Command, CommandFailure, CommandResult, CommandType},
    tuples::Value,
};

/// Application logic invoked for a command.
///
/// Processing is synchronous and may fail; the asynchrony of the pipeline
/// lives in the executor, not the processor.
pub trait CommandProcessor: Send + Sync {
    /// Process one command, producing an optional result value.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandFailure`] describing why the command was refused.
    fn process(&self, command: &Command) -> Result<Option<Value>, CommandFailure>;

    /// Whether this processor handles the given command type.
    fn handles(&self, _command_type: &CommandType) -> bool {
        true
    }
}

impl<F> CommandProcessor for F
where
    F: Fn(&Command) -> Result<Option<Value>, CommandFailure> + Send + Sync,
{
    fn process(&self, command: &Command) -> Result<Option<Value>, CommandFailure> {
        self(command)
    }
}

/// A [`CommandProcessor`] that routes commands to per-type processors.
#[derive(Default)]
pub struct DispatchingCommandProcessor {
    processors: RwLock<HashMap<CommandType, Box<dyn CommandProcessor>>>,
}

impl DispatchingCommandProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor for one command type.
    pub fn subscribe(
        &self,
        command_type: CommandType,
        processor: impl CommandProcessor + 'static,
    ) {
        let mut processors = self.processors.write().expect("dispatch table lock poisoned");
        processors.insert(command_type, Box::new(processor));
    }
}

impl CommandProcessor for DispatchingCommandProcessor {
    fn process(&self, command: &Command) -> Result<Option<Value>, CommandFailure> {
        let command_type = command.command_type();
        let processors = self.processors.read().expect("dispatch table lock poisoned");
        match processors.get(&command_type) {
            Some(processor) => processor.process(command),
            None => Err(CommandFailure::new(format!(
                "no processor registered for command type {command_type}"
            ))),
        }
    }

    fn handles(&self, command_type: &CommandType) -> bool {
        let processors = self.processors.read().expect("dispatch table lock poisoned");
        processors.contains_key(command_type)
    }
}

/// Runs commands and reports their results through a completion channel.
pub trait CommandExecutor: Send + Sync {
    /// Execute the command, eventually sending exactly one result through
    /// the completion sender. Dropping the sender without sending signals
    /// abandonment to the caller.
    fn execute(&self, command: Command, completion: oneshot::Sender<CommandResult>);

    /// Whether this executor can execute the given command type.
    fn can_execute(&self, _command_type: &CommandType) -> bool {
        true
    }
}

fn run_to_completion<P: CommandProcessor>(
    processor: &P,
    command: Command,
    completion: oneshot::Sender<CommandResult>,
) {
    let (command, processing_id) = command.ensure_processed();
    let outcome = processor.process(&command);
    let now = Utc::now();
    let result = match outcome {
        Ok(value) => command.complete(now, value),
        Err(failure) => command.fail(now, failure),
    }
    .unwrap_or_else(|state_error| {
        CommandResult::failure(processing_id, now, CommandFailure::new(state_error.to_string()))
    });
    // The caller may have stopped waiting; that is not an execution failure.
    let _ = completion.send(result);
}

/// A [`CommandExecutor`] that processes commands inline on the calling
/// thread.
pub struct ProcessingCommandExecutor<P> {
    processor: Arc<P>,
}

impl<P: CommandProcessor> ProcessingCommandExecutor<P> {
    pub fn of(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }
}

impl<P: CommandProcessor> CommandExecutor for ProcessingCommandExecutor<P> {
    fn execute(&self, command: Command, completion: oneshot::Sender<CommandResult>) {
        run_to_completion(self.processor.as_ref(), command, completion);
    }

    fn can_execute(&self, command_type: &CommandType) -> bool {
        self.processor.handles(command_type)
    }
}

/// A [`CommandExecutor`] that hands each command to the blocking thread
/// pool, so slow processors do not stall the async runtime.
pub struct PooledCommandExecutor<P> {
    processor: Arc<P>,
}

impl<P: CommandProcessor + 'static> PooledCommandExecutor<P> {
    pub fn of(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }
}

impl<P: CommandProcessor + 'static> CommandExecutor for PooledCommandExecutor<P> {
    fn execute(&self, command: Command, completion: oneshot::Sender<CommandResult>) {
        let processor = Arc::clone(&self.processor);
        tokio::task::spawn_blocking(move || {
            run_to_completion(processor.as_ref(), command, completion);
        });
    }

    fn can_execute(&self, command_type: &CommandType) -> bool {
        self.processor.handles(command_type)
    }
}

/// Error from applying a command to a bus, or from awaiting its completion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandBusError {
    /// No executor handles the command's type. Raised synchronously; the
    /// command is neither logged nor executed.
    #[error("no executor can execute command type {0}")]
    UnmatchedCommandType(CommandType),
    /// The executor went away without producing a result.
    #[error("command execution was abandoned before completion")]
    ExecutionAbandoned,
    /// The result did not arrive within the allowed duration.
    #[error("command did not complete within {0:?}")]
    Timeout(Duration),
}

/// A future of one command's eventual [`CommandResult`].
#[derive(Debug)]
pub struct CommandCompletion {
    receiver: oneshot::Receiver<CommandResult>,
}

impl CommandCompletion {
    /// Await the result, giving up after the allowed duration.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError::Timeout`] if the duration elapses first,
    /// or [`CommandBusError::ExecutionAbandoned`] if the executor went away.
    pub async fn with_timeout(self, duration: Duration) -> Result<CommandResult, CommandBusError> {
        tokio::time::timeout(duration, self)
            .await
            .map_err(|_| CommandBusError::Timeout(duration))?
    }
}

impl Future for CommandCompletion {
    type Output = Result<CommandResult, CommandBusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map_err(|_| CommandBusError::ExecutionAbandoned)
    }
}

/// Routes commands to an executor and exposes their completions.
#[derive(Debug)]
pub struct CommandBus<E> {
    executor: E,
}

impl<E: CommandExecutor> CommandBus<E> {
    pub const fn executing_with(executor: E) -> Self {
        Self { executor }
    }

    #[must_use]
    pub fn can_execute(&self, command_type: &CommandType) -> bool {
        self.executor.can_execute(command_type)
    }

    /// Submit a command for execution.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError::UnmatchedCommandType`] synchronously when
    /// no executor handles the command's type.
    pub fn apply(&self, command: Command) -> Result<CommandCompletion, CommandBusError> {
        let command_type = command.command_type();
        if !self.executor.can_execute(&command_type) {
            return Err(CommandBusError::UnmatchedCommandType(command_type));
        }
        let (sender, receiver) = oneshot::channel();
        self.executor.execute(command, sender);
        Ok(CommandCompletion { receiver })
    }
}

/// Records commands before execution and results after.
pub trait CommandLog: Send + Sync {
    /// Record a command that carries a processing id.
    fn log_processed_command(&self, command: &Command);

    /// Record one command's terminal result.
    fn log_command_result(&self, result: &CommandResult);

    /// Stamp the command if necessary, record it, and return the stamped
    /// copy for execution.
    fn log_command(&self, command: Command) -> Command {
        let (command, _) = command.ensure_processed();
        self.log_processed_command(&command);
        command
    }
}

impl<L: CommandLog + ?Sized> CommandLog for Arc<L> {
    fn log_processed_command(&self, command: &Command) {
        (**self).log_processed_command(command);
    }

    fn log_command_result(&self, result: &CommandResult) {
        (**self).log_command_result(result);
    }
}

/// A [`CommandLog`] that emits structured log events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingCommandLog;

impl CommandLog for TracingCommandLog {
    fn log_processed_command(&self, command: &Command) {
        tracing::info!(
            processing_id = ?command.processing_id(),
            command = %command,
            "command received"
        );
    }

    fn log_command_result(&self, result: &CommandResult) {
        match result.outcome() {
            Ok(value) => tracing::info!(
                processing_id = %result.processing_id(),
                result = ?value,
                "command completed"
            ),
            Err(failure) => tracing::warn!(
                processing_id = %result.processing_id(),
                reason = %failure.message(),
                "command failed"
            ),
        }
    }
}

/// A [`CommandLog`] that records entries in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryCommandLog {
    commands: Mutex<Vec<Command>>,
    results: Mutex<Vec<CommandResult>>,
}

impl InMemoryCommandLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("command log lock poisoned").clone()
    }

    #[must_use]
    pub fn results(&self) -> Vec<CommandResult> {
        self.results.lock().expect("command log lock poisoned").clone()
    }
}

impl CommandLog for InMemoryCommandLog {
    fn log_processed_command(&self, command: &Command) {
        self.commands
            .lock()
            .expect("command log lock poisoned")
            .push(command.clone());
    }

    fn log_command_result(&self, result: &CommandResult) {
        self.results
            .lock()
            .expect("command log lock poisoned")
            .push(result.clone());
    }
}

/// A command bus that records each command before it executes and each
/// produced result exactly once.
///
/// Must be used from within a tokio runtime: result logging rides on a
/// spawned task observing the inner completion.
pub struct LoggingCommandBus<L, E> {
    log: Arc<L>,
    inner: CommandBus<E>,
}

impl<L, E> LoggingCommandBus<L, E>
where
    L: CommandLog + 'static,
    E: CommandExecutor,
{
    pub fn new(log: Arc<L>, inner: CommandBus<E>) -> Self {
        Self { log, inner }
    }

    #[must_use]
    pub fn can_execute(&self, command_type: &CommandType) -> bool {
        self.inner.can_execute(command_type)
    }

    /// Log and submit a command for execution.
    ///
    /// An unmatched command type fails here, synchronously, with nothing
    /// logged. An abandoned execution fails the returned completion without
    /// a result-log entry.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError::UnmatchedCommandType`] when no executor
    /// handles the command's type.
    pub fn apply(&self, command: Command) -> Result<CommandCompletion, CommandBusError> {
        let command_type = command.command_type();
        if !self.inner.can_execute(&command_type) {
            return Err(CommandBusError::UnmatchedCommandType(command_type));
        }
        let command = self.log.log_command(command);
        let completion = self.inner.apply(command)?;

        let (sender, receiver) = oneshot::channel();
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            if let Ok(result) = completion.await {
                log.log_command_result(&result);
                let _ = sender.send(result);
            }
            // An abandoned execution never reaches the log.
        });
        Ok(CommandCompletion { receiver })
    }
}
