//! plotline-jobs: job tracking around the plotline pipeline.
//!
//! A [`JobService`] accepts an image plus [`ProcessingParams`](plotline_pipeline::ProcessingParams),
//! validates them eagerly, and runs the pipeline on a blocking worker.
//! Every job has one [`JobRecord`] moving through
//! `pending -> processing -> completed | failed`; status readers always see
//! a consistent snapshot. Progress is pushed as [`ProgressEvent`]s over a
//! broadcast channel.

pub mod config;
pub mod events;
pub mod record;
pub mod registry;
pub mod service;
pub mod store;

pub use config::{ConfigError, ServiceConfig};
pub use events::ProgressEvent;
pub use record::{JobError, JobId, JobRecord, JobResult, JobStatus};
pub use registry::{PROVIDER_TABLES, discover};
pub use service::JobService;
pub use store::{JobInput, JobStore};
