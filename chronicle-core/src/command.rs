//! Commands, command identity and command results.
//!
//! A command is a request to change an aggregate, carried in the same
//! tuple-payload form as events. Commands are logged before execution, so
//! like events they are stamped with a [`ProcessingId`] at durable-write
//! time; completing or failing a command is only legal once it is stamped.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    identity::{AggregateId, VersionedName},
    time::{ProcessingId, StreamTimestamp},
    tuples::{Tuple, TupleSchema, Value, ValueType},
};

/// The identity of a command definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandType {
    aggregate_type: String,
    name: VersionedName,
}

impl CommandType {
    pub fn new(aggregate_type: impl Into<String>, name: VersionedName) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            name,
        }
    }

    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    #[must_use]
    pub const fn name(&self) -> &VersionedName {
        &self.name
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.name)
    }
}

/// What a command type accepts and returns: its parameter schema and the
/// declared type of its result value, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTypeInfo {
    parameters: TupleSchema,
    result: Option<ValueType>,
}

impl CommandTypeInfo {
    /// Info for a command that produces no result value.
    #[must_use]
    pub const fn returning_nothing(parameters: TupleSchema) -> Self {
        Self {
            parameters,
            result: None,
        }
    }

    /// Info for a command that produces a result of the given type.
    #[must_use]
    pub const fn returning(parameters: TupleSchema, result: ValueType) -> Self {
        Self {
            parameters,
            result: Some(result),
        }
    }

    #[must_use]
    pub const fn parameters(&self) -> &TupleSchema {
        &self.parameters
    }

    #[must_use]
    pub const fn result(&self) -> Option<&ValueType> {
        self.result.as_ref()
    }
}

/// A mapping from known [`CommandType`]s to their [`CommandTypeInfo`].
#[derive(Debug, Clone, Default)]
pub struct CommandTypeMatcher {
    infos: HashMap<CommandType, CommandTypeInfo>,
}

impl CommandTypeMatcher {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn matching_against(infos: HashMap<CommandType, CommandTypeInfo>) -> Self {
        Self { infos }
    }

    #[must_use]
    pub fn match_type(&self, command_type: &CommandType) -> Option<&CommandTypeInfo> {
        self.infos.get(command_type)
    }
}

/// The reason a command's processing failed.
///
/// Carried by [`CommandResult`] when the processor (or the execution
/// machinery around it) reports failure rather than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandFailure {
    message: String,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error raised on an illegal command state transition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandStateError {
    /// Completion was attempted on a command that has not been stamped.
    #[error("command `{0}` has not been processed")]
    NotProcessed(VersionedName),
    /// A result value was supplied for a command declaring no result type.
    #[error("command `{0}` declares no result type, but a result was supplied")]
    UnexpectedResult(VersionedName),
    /// No result value was supplied for a command declaring a result type.
    #[error("command `{name}` declares result type {expected}, but no result was supplied")]
    MissingResult {
        name: VersionedName,
        expected: ValueType,
    },
    /// The supplied result value does not conform to the declared type.
    #[error("command `{name}` declares result type {expected}, but received <{actual}>")]
    ResultTypeMismatch {
        name: VersionedName,
        expected: ValueType,
        actual: Value,
    },
}

/// A request to change one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    aggregate_id: AggregateId,
    timestamp: StreamTimestamp,
    name: VersionedName,
    parameters: Tuple,
    result_type: Option<ValueType>,
    processing_id: Option<ProcessingId>,
}

impl Command {
    pub fn new(
        aggregate_id: AggregateId,
        timestamp: StreamTimestamp,
        name: VersionedName,
        parameters: Tuple,
        result_type: Option<ValueType>,
    ) -> Self {
        Self {
            aggregate_id,
            timestamp,
            name,
            parameters,
            result_type,
            processing_id: None,
        }
    }

    #[must_use]
    pub const fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    #[must_use]
    pub const fn timestamp(&self) -> &StreamTimestamp {
        &self.timestamp
    }

    #[must_use]
    pub const fn name(&self) -> &VersionedName {
        &self.name
    }

    #[must_use]
    pub const fn parameters(&self) -> &Tuple {
        &self.parameters
    }

    #[must_use]
    pub const fn result_type(&self) -> Option<&ValueType> {
        self.result_type.as_ref()
    }

    #[must_use]
    pub const fn processing_id(&self) -> Option<ProcessingId> {
        self.processing_id
    }

    /// The command type this command is an instance of.
    #[must_use]
    pub fn command_type(&self) -> CommandType {
        CommandType::new(self.aggregate_id.aggregate_type(), self.name.clone())
    }

    /// A copy of this command stamped with the given processing id.
    #[must_use]
    pub fn processed(&self, processing_id: ProcessingId) -> Self {
        Self {
            processing_id: Some(processing_id),
            ..self.clone()
        }
    }

    /// This command, stamped with a fresh processing id if it does not
    /// already carry one, together with the id in effect.
    #[must_use]
    pub fn ensure_processed(self) -> (Self, ProcessingId) {
        match self.processing_id {
            Some(id) => (self, id),
            None => {
                let id = ProcessingId::generate();
                (self.processed(id), id)
            }
        }
    }

    /// Record successful completion at the given instant.
    ///
    /// The result value is checked against the declared result type.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandStateError`] if the command is unprocessed or the
    /// result value does not match the declaration.
    pub fn complete(
        &self,
        at: DateTime<Utc>,
        result: Option<Value>,
    ) -> Result<CommandResult, CommandStateError> {
        let processing_id = self.require_processed()?;
        match (&self.result_type, &result) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(CommandStateError::UnexpectedResult(self.name.clone()));
            }
            (Some(expected), None) => {
                return Err(CommandStateError::MissingResult {
                    name: self.name.clone(),
                    expected: expected.clone(),
                });
            }
            (Some(expected), Some(value)) => {
                if !expected.accepts(value) {
                    return Err(CommandStateError::ResultTypeMismatch {
                        name: self.name.clone(),
                        expected: expected.clone(),
                        actual: value.clone(),
                    });
                }
            }
        }
        Ok(CommandResult {
            processing_id,
            completed_at: at,
            outcome: Ok(result),
        })
    }

    /// Record failed completion at the given instant.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandStateError`] if the command is unprocessed.
    pub fn fail(
        &self,
        at: DateTime<Utc>,
        failure: CommandFailure,
    ) -> Result<CommandResult, CommandStateError> {
        let processing_id = self.require_processed()?;
        Ok(CommandResult {
            processing_id,
            completed_at: at,
            outcome: Err(failure),
        })
    }

    fn require_processed(&self) -> Result<ProcessingId, CommandStateError> {
        self.processing_id
            .ok_or_else(|| CommandStateError::NotProcessed(self.name.clone()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} at {}",
            self.aggregate_id, self.name, self.parameters, self.timestamp
        )
    }
}

/// The terminal outcome of one command: success with an optional result
/// value, or failure with a reason.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    processing_id: ProcessingId,
    completed_at: DateTime<Utc>,
    outcome: Result<Option<Value>, CommandFailure>,
}

impl CommandResult {
    /// A failed result for the given processing id.
    ///
    /// Used by execution machinery that must report a failure without a
    /// well-formed command to hand, for instance when a processor panics.
    #[must_use]
    pub const fn failure(
        processing_id: ProcessingId,
        completed_at: DateTime<Utc>,
        failure: CommandFailure,
    ) -> Self {
        Self {
            processing_id,
            completed_at,
            outcome: Err(failure),
        }
    }

    #[must_use]
    pub const fn processing_id(&self) -> ProcessingId {
        self.processing_id
    }

    #[must_use]
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    #[must_use]
    pub const fn outcome(&self) -> &Result<Option<Value>, CommandFailure> {
        &self.outcome
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Unpack into the outcome, discarding the metadata.
    #[allow(clippy::missing_errors_doc)]
    pub fn into_outcome(self) -> Result<Option<Value>, CommandFailure> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::tuples::TupleSlot;

    fn update_age_command(result_type: Option<ValueType>) -> Command {
        let schema = TupleSchema::new(
            "person/updatedAge",
            vec![TupleSlot::new("age", ValueType::Int)],
        )
        .unwrap();
        Command::new(
            AggregateId::new("person", Uuid::new_v4()),
            StreamTimestamp::now("test"),
            VersionedName::of("updatedAge"),
            schema.make(vec![Value::from(42i64)]).unwrap(),
            result_type,
        )
    }

    #[test]
    fn unprocessed_commands_cannot_complete() {
        let command = update_age_command(None);
        assert!(matches!(
            command.complete(Utc::now(), None),
            Err(CommandStateError::NotProcessed(_))
        ));
        assert!(matches!(
            command.fail(Utc::now(), CommandFailure::new("nope")),
            Err(CommandStateError::NotProcessed(_))
        ));
    }

    #[test]
    fn completion_type_checks_the_result() {
        let (command, id) = update_age_command(Some(ValueType::Int)).ensure_processed();

        let result = command.complete(Utc::now(), Some(Value::from(42i64))).unwrap();
        assert_eq!(result.processing_id(), id);
        assert!(result.is_success());

        assert!(matches!(
            command.complete(Utc::now(), Some(Value::from("42"))),
            Err(CommandStateError::ResultTypeMismatch { .. })
        ));
        assert!(matches!(
            command.complete(Utc::now(), None),
            Err(CommandStateError::MissingResult { .. })
        ));
    }

    #[test]
    fn void_commands_reject_result_values() {
        let (command, _) = update_age_command(None).ensure_processed();
        assert!(command.complete(Utc::now(), None).is_ok());
        assert!(matches!(
            command.complete(Utc::now(), Some(Value::from(1i64))),
            Err(CommandStateError::UnexpectedResult(_))
        ));
    }

    #[test]
    fn ensure_processed_preserves_an_existing_stamp() {
        let (command, id) = update_age_command(None).ensure_processed();
        let (again, same_id) = command.ensure_processed();
        assert_eq!(id, same_id);
        assert_eq!(again.processing_id(), Some(id));
    }

    #[test]
    fn failure_carries_the_message() {
        let (command, _) = update_age_command(None).ensure_processed();
        let result = command
            .fail(Utc::now(), CommandFailure::new("person not found"))
            .unwrap();
        let Err(failure) = result.into_outcome() else {
            panic!("expected a failure");
        };
        assert_eq!(failure.message(), "person not found");
    }
}
