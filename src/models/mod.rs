pub mod event;
pub mod job;
pub mod status;

pub use event::StatusEvent;
pub use job::{Capabilities, JobId, JobSummary, MirrorJob, NewJobRequest};
pub use status::{JobStatus, Stage};
