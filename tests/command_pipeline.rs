//! Command pipeline scenarios: logged dispatch, failure propagation, and
//! configuration errors.

use std::{sync::Arc, time::Duration};

use chronicle::{
    AggregateId, Command, CommandFailure, CommandType, VersionedName,
    command_bus::{
        CommandBus, CommandBusError, DispatchingCommandProcessor, InMemoryCommandLog,
        LoggingCommandBus, PooledCommandExecutor, ProcessingCommandExecutor,
    },
    time::StreamTimestamp,
    tuples::{TupleSchema, TupleSlot, Value, ValueType},
};
use uuid::Uuid;

fn change_name_type() -> CommandType {
    CommandType::new("person", VersionedName::of("changeName"))
}

fn change_name(name: &str) -> Command {
    let schema = TupleSchema::new(
        "person/changeName",
        vec![TupleSlot::new("name", ValueType::String)],
    )
    .unwrap();
    Command::new(
        AggregateId::new("person", Uuid::new_v4()),
        StreamTimestamp::now("test"),
        VersionedName::of("changeName"),
        schema.make(vec![Value::from(name)]).unwrap(),
        Some(ValueType::String),
    )
}

fn processor() -> DispatchingCommandProcessor {
    let dispatcher = DispatchingCommandProcessor::new();
    dispatcher.subscribe(change_name_type(), |command: &Command| {
        let key = command.parameters().schema().key::<String>("name").unwrap();
        let name = command.parameters().get(&key).unwrap();
        if name.is_empty() {
            Err(CommandFailure::new("name must not be empty"))
        } else {
            Ok(Some(Value::from(name.to_uppercase())))
        }
    });
    dispatcher
}

#[tokio::test]
async fn a_logged_command_completes_with_its_result() {
    let log = Arc::new(InMemoryCommandLog::new());
    let bus = LoggingCommandBus::new(
        Arc::clone(&log),
        CommandBus::executing_with(PooledCommandExecutor::of(processor())),
    );

    let result = bus
        .apply(change_name("arthur"))
        .unwrap()
        .with_timeout(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(
        result.into_outcome().unwrap(),
        Some(Value::from("ARTHUR"))
    );
    // The command was logged, stamped, before execution.
    assert_eq!(log.commands().len(), 1);
    let logged_id = log.commands()[0].processing_id().unwrap();
    assert_eq!(log.results().len(), 1);
    assert_eq!(log.results()[0].processing_id(), logged_id);
}

#[tokio::test]
async fn a_failed_command_logs_exactly_one_result() {
    let log = Arc::new(InMemoryCommandLog::new());
    let bus = LoggingCommandBus::new(
        Arc::clone(&log),
        CommandBus::executing_with(ProcessingCommandExecutor::of(processor())),
    );

    let result = bus.apply(change_name("")).unwrap().await.unwrap();
    let Err(failure) = result.into_outcome() else {
        panic!("expected a failure");
    };
    assert_eq!(failure.message(), "name must not be empty");

    assert_eq!(log.results().len(), 1);
    assert!(log.results()[0].outcome().is_err());
}

#[tokio::test]
async fn an_unmatched_command_type_never_reaches_the_pipeline() {
    let log = Arc::new(InMemoryCommandLog::new());
    let bus = LoggingCommandBus::new(
        Arc::clone(&log),
        CommandBus::executing_with(ProcessingCommandExecutor::of(
            DispatchingCommandProcessor::new(),
        )),
    );

    let error = bus.apply(change_name("arthur")).unwrap_err();
    assert!(matches!(error, CommandBusError::UnmatchedCommandType(_)));
    assert!(log.commands().is_empty());
    assert!(log.results().is_empty());
}

#[tokio::test]
async fn concurrent_commands_each_get_their_own_completion() {
    let bus = Arc::new(CommandBus::executing_with(PooledCommandExecutor::of(
        processor(),
    )));

    let completions: Vec<_> = ["arthur", "terry", "daley"]
        .into_iter()
        .map(|name| (name, bus.apply(change_name(name)).unwrap()))
        .collect();

    for (name, completion) in completions {
        let result = completion.await.unwrap();
        assert_eq!(
            result.into_outcome().unwrap(),
            Some(Value::from(name.to_uppercase()))
        );
    }
}
