//! Background work: a persistent job queue with named queues, retry with
//! exponential backoff, and job-key dedup; plus the job bodies — most
//! importantly `process_inbound_message`, the locked conversational turn.

pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod types;

pub use engine::{JobHandler, WorkerEngine};
pub use error::{Result, WorkerError};
pub use types::{Job, JobStatus, Queue};
