//! Job scheduling: wall-clock slot table, dependency gate, dispatcher.

pub mod dispatch;
pub mod jobs;

pub use dispatch::{scheduled_job_for, DispatchResponse, Dispatcher, JobRunner};
pub use jobs::ScannerJobRunner;
