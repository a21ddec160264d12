//! Line queue, worker pool, and the shutdown protocol that ties them together.
//!
//! ```text
//! intake ──submit──▶ Dispatcher (bounded, drop when full) ──▶ Worker × N ──▶ BatchSink
//! ```

pub mod coordinator;
pub mod dispatcher;
pub mod worker;

pub use coordinator::{Pipeline, PipelineDeps};
pub use dispatcher::{Dispatcher, SubmitError};
pub use worker::{Worker, WorkerSettings, WorkerState};
