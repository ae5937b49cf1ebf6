#![warn(missing_docs)]
//! reflectgen - style-reflecting image generation over a RunPod job queue.
//!
//! A prompt and a style image are submitted as an asynchronous job. The
//! worker rewrites the prompt to match the style ("reflection"), renders an
//! image from it, and returns both. This crate submits the job, polls it to
//! completion, normalizes the loosely shaped result, and sends up/down
//! feedback on the last submission.
//!
//! # Quick Start
//!
//! ```no_run
//! use reflectgen::{RunPodClient, Vote, Workflow};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> reflectgen::Result<()> {
//!     let client = RunPodClient::builder().build()?;
//!     let mut workflow = Workflow::new(client);
//!
//!     let result = workflow
//!         .generate("A wizard in the forest", Some(Path::new("style.jpg")), |p| {
//!             eprint!("\rgenerating{:<3}", ".".repeat(p.dots()));
//!         })
//!         .await?;
//!
//!     println!("final prompt: {}", result.final_prompt);
//!     result.save("wizard.png")?;
//!
//!     workflow.send_feedback(Vote::Up).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! [`RunPodClient::builder`] reads `RUNPOD_API_KEY` and `RUNPOD_ENDPOINT_ID`
//! when they are not set explicitly. Polling limits live in [`PollConfig`].

mod error;
pub mod job;
pub mod normalize;
pub mod poll;
pub mod workflow;

// Re-export error types at crate root
pub use error::{ReflectError, Result};

pub use job::{
    FeedbackVote, GenerationRequest, ImageFormat, JobApi, JobHandle, JobResult, JobStatus,
    RunPodClient, RunPodClientBuilder, StatusReport, Vote,
};
pub use normalize::{normalize, PROMPT_PLACEHOLDER};
pub use poll::{poll_until_terminal, CancelToken, PollConfig, PollProgress};
pub use workflow::{Session, Workflow};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{ReflectError, Result};
    pub use crate::job::{GenerationRequest, JobApi, JobResult, RunPodClient, Vote};
    pub use crate::poll::{CancelToken, PollConfig};
    pub use crate::workflow::Workflow;
}
