//! Job queue client.

mod api;
mod runpod;
mod types;

pub use api::JobApi;
pub use runpod::{RunPodClient, RunPodClientBuilder, DEFAULT_BASE_URL};
pub use types::{
    FeedbackVote, GenerationRequest, ImageFormat, JobHandle, JobResult, JobStatus, StatusReport,
    Vote,
};
