pub mod jetstream;
pub mod status;

pub use jetstream::{CommitData, CommitMessage, CommitOperation, JetstreamMessage};
pub use status::{HealthResponse, HealthVerdict, MetricsResponse};
