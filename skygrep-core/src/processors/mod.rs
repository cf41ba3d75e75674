//! Pipeline processors.
//!
//! - `CommitForwarder`: Receives `CommitEvent`, matches it against the
//!   `RuleSet` and publishes one message per matched rule
//! - `StreamConsumer`: Pulls events from an `EventSource` and drives them
//!   through the `CommitForwarder` one at a time
//! - `BrokerPublisher`: Owns the broker connection state machine
//! - `Pipeline`: Connects the broker before the consumer may start
//!
//! `JetstreamSource` and `KafkaTransport` are the production
//! implementations of the `EventSource` and `BrokerTransport` seams.

pub mod broker_publisher;
pub mod jetstream_source;
pub mod kafka;
pub mod pipeline;
pub mod stream_consumer;

#[cfg(test)]
pub(crate) mod testing;

pub use broker_publisher::{
    BrokerError, BrokerPublisher, BrokerTransport, ConnectionState, LinkEvent,
};
pub use jetstream_source::{JetstreamSource, cursor_from_lookback};
pub use kafka::KafkaTransport;
pub use pipeline::{ConnectedPipeline, Pipeline, RunningPipeline};
pub use stream_consumer::{
    CommitForwarder, EventSource, ForwardSummary, SourceError, StreamConsumer,
};
