//! Playback engine: worker lifecycle contract and the scheduler loop.

pub mod clock_worker;
pub mod scheduler;
pub mod worker;

pub use scheduler::{ActivateError, Scheduler};
pub use worker::{
    OutputResource, PlaybackWorker, PollOutcome, ResourceBundle, WorkerFactory, WorkerHandle,
    WorkerNotifier, WorkerState,
};
