//! Job queue trait.

use crate::error::Result;
use crate::job::types::{FeedbackVote, GenerationRequest, JobHandle, StatusReport};
use async_trait::async_trait;

/// The operations the client needs from a job queue.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Queues a generation job.
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle>;

    /// Fetches the current status of a job.
    ///
    /// Transport, HTTP and parse failures are reported as
    /// [`ReflectError::Poll`](crate::ReflectError::Poll).
    async fn status(&self, handle: &JobHandle) -> Result<StatusReport>;

    /// Sends a vote on the submission endpoint. The response is not interpreted.
    async fn send_feedback(&self, vote: &FeedbackVote) -> Result<()>;
}

#[async_trait]
impl<T: JobApi + ?Sized> JobApi for std::sync::Arc<T> {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle> {
        (**self).submit(request).await
    }

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport> {
        (**self).status(handle).await
    }

    async fn send_feedback(&self, vote: &FeedbackVote) -> Result<()> {
        (**self).send_feedback(vote).await
    }
}
