pub mod batch;
pub mod elastic;
pub mod forward;
pub mod storage;

pub use batch::{BatchSink, IndexName};
pub use elastic::ElasticClient;
pub use forward::{ForwardHandle, Forwarder};
pub use storage::{BulkOutcome, SinkError, Storage};
