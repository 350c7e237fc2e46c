mod job;
mod store;

pub use job::{Job, JobStatus, JobStatusReport};
pub use store::JobStore;
