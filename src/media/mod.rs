//! Detached media generation jobs
//!
//! Two pollers share the dispatch seam, the remote status vocabulary and the
//! abort-on-drop task guard:
//! - `MediaJobTracker` folds results into the chat transcript
//! - `StudioBoard` keeps a flat job list for the creative studio

pub mod dispatch;
pub mod models;
pub mod studio;
pub mod task_guard;
pub mod tracker;

pub use dispatch::{submit_job, DispatchError, HttpMediaDispatch, MediaDispatch, MediaDispatchConfig};
pub use models::{
    JobStatusReport, MediaJob, MediaJobStatus, MediaParams, RemoteJobStatus, StudioJob,
};
pub use studio::{StudioBoard, StudioPollConfig};
pub use task_guard::TaskGuard;
pub use tracker::{MediaJobTracker, MediaPollConfig};
