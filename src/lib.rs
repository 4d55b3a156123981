#![doc = include_str!("../README.md")]

pub use chronicle_core::{
    binding,
    binding::{BindingError, CausalOrder, EventBinding, EventSession},
    catalogue,
    catalogue::{AggregateCatalogue, InMemoryAggregateCatalogue},
    command,
    command::{
        Command, CommandFailure, CommandResult, CommandStateError, CommandType, CommandTypeInfo,
        CommandTypeMatcher,
    },
    event,
    event::{Characteristics, Event, EventType, EventTypeMatcher},
    history,
    history::EventHistoryFetcher,
    identity,
    identity::{AggregateId, VersionedName},
    sourcing,
    sourcing::{CachedEventSource, EventReplayer, EventSource},
    state,
    state::{DispatchingStateBuilder, EventSourcingStateRepository, StateBinding, StateBuilder},
    time,
    time::{ProcessingId, StreamTimestamp, TimeRange, TimeRangeBound},
};

pub mod bus {
    pub use chronicle_core::bus::{
        ChannelBatchProcessor, DispatchError, EventBatch, EventBatchProcessor, EventBus,
        EventPublisher, PublishingEventBatchProcessor, SubscribableEventPublisher,
    };
}

pub mod command_bus {
    pub use chronicle_core::command_bus::{
        CommandBus, CommandBusError, CommandCompletion, CommandExecutor, CommandLog,
        CommandProcessor, DispatchingCommandProcessor, InMemoryCommandLog, LoggingCommandBus,
        PooledCommandExecutor, ProcessingCommandExecutor, TracingCommandLog,
    };
}

pub mod store {
    pub use chronicle_core::store::{EventPersister, EventRetriever, EventStore, NonEmpty};

    pub use chronicle_core::store::inmemory;
}

pub mod tuples {
    pub use chronicle_core::tuples::{
        DeserialiseError, SlotValue, Tuple, TupleError, TupleKey, TupleSchema,
        TupleSchemaRegistry, TupleSlot, Value, ValueType,
    };
}
