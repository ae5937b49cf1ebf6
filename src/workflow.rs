//! Submission workflow and feedback.

use crate::error::{ReflectError, Result};
use crate::job::{FeedbackVote, GenerationRequest, JobApi, JobResult, Vote};
use crate::normalize::normalize;
use crate::poll::{poll_until_terminal, CancelToken, PollConfig, PollProgress};
use std::path::Path;

/// Per-workflow state: the most recent request, for feedback.
///
/// Starts out as the empty request, so feedback sent before any submission
/// carries an empty prompt and image.
#[derive(Debug, Clone, Default)]
pub struct Session {
    last_request: GenerationRequest,
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session whose last request is already known.
    pub fn with_last_request(request: GenerationRequest) -> Self {
        Self {
            last_request: request,
        }
    }

    /// The most recently recorded request.
    pub fn last_request(&self) -> &GenerationRequest {
        &self.last_request
    }

    fn record(&mut self, request: GenerationRequest) {
        self.last_request = request;
    }
}

/// Runs prompt + style image submissions against a job queue, one at a time.
pub struct Workflow<A> {
    api: A,
    poll: PollConfig,
    session: Session,
    cancel: CancelToken,
}

impl<A: JobApi> Workflow<A> {
    /// Creates a workflow with default polling limits.
    pub fn new(api: A) -> Self {
        Self {
            api,
            poll: PollConfig::default(),
            session: Session::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the polling limits.
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Replaces the session.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Token that abandons the run in progress when fired.
    ///
    /// Firing it between runs abandons the next run before it submits. The
    /// token re-arms itself once that run ends.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The session holding the last request.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The underlying job queue client.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Validates input, reads the style image, then runs the job to completion.
    pub async fn generate<F>(
        &mut self,
        prompt: &str,
        style_image: Option<&Path>,
        on_progress: F,
    ) -> Result<JobResult>
    where
        F: FnMut(&PollProgress),
    {
        let prompt = validate_prompt(prompt)?;
        let path = style_image.ok_or_else(missing_style_image)?;

        let bytes = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "read style image");

        self.run(prompt, &bytes, on_progress).await
    }

    /// Same as [`generate`](Self::generate), from in-memory image bytes.
    pub async fn generate_from_bytes<F>(
        &mut self,
        prompt: &str,
        style_image: Option<&[u8]>,
        on_progress: F,
    ) -> Result<JobResult>
    where
        F: FnMut(&PollProgress),
    {
        let prompt = validate_prompt(prompt)?;
        let bytes = style_image.ok_or_else(missing_style_image)?;
        self.run(prompt, bytes, on_progress).await
    }

    async fn run<F>(
        &mut self,
        prompt: &str,
        style_image: &[u8],
        on_progress: F,
    ) -> Result<JobResult>
    where
        F: FnMut(&PollProgress),
    {
        if style_image.is_empty() {
            return Err(ReflectError::Validation("style image is empty".into()));
        }

        let request = GenerationRequest::new(prompt, style_image);
        // recorded before submitting: feedback may refer to a failed attempt
        self.session.record(request.clone());

        let outcome = self.submit_and_wait(&request, on_progress).await;
        // a fired token only abandons the run it fired during
        self.cancel.reset();
        outcome
    }

    async fn submit_and_wait<F>(
        &self,
        request: &GenerationRequest,
        on_progress: F,
    ) -> Result<JobResult>
    where
        F: FnMut(&PollProgress),
    {
        if self.cancel.is_cancelled() {
            return Err(ReflectError::Cancelled);
        }

        let handle = self.api.submit(request).await?;
        tracing::info!(job_id = %handle, "job submitted");

        let raw =
            poll_until_terminal(&self.api, &handle, &self.poll, &self.cancel, on_progress).await?;

        let result = normalize(&raw)?;
        tracing::info!(
            job_id = %handle,
            image_len = result.image_b64.len(),
            "job result normalized"
        );
        Ok(result)
    }

    /// Sends a vote on the last recorded request.
    pub async fn send_feedback(&self, vote: Vote) -> Result<()> {
        let feedback = FeedbackVote::for_request(self.session.last_request(), vote);
        if self.session.last_request().is_empty() {
            tracing::debug!(vote = %vote, "sending feedback with no prior submission");
        }
        self.api.send_feedback(&feedback).await?;
        tracing::info!(vote = %vote, "feedback sent");
        Ok(())
    }
}

fn validate_prompt(prompt: &str) -> Result<&str> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ReflectError::Validation(
            "Please enter a prompt and select a style image.".into(),
        ));
    }
    Ok(prompt)
}

fn missing_style_image() -> ReflectError {
    ReflectError::Validation("Please enter a prompt and select a style image.".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobHandle;
    use crate::normalize::PROMPT_PLACEHOLDER;
    use crate::poll::tests::{completed, in_progress, ScriptedApi};
    use base64::Engine;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn workflow(api: &Arc<ScriptedApi>) -> Workflow<Arc<ScriptedApi>> {
        Workflow::new(Arc::clone(api))
    }

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir()
            .join(format!("reflectgen-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_round_trips_style_image() {
        let bytes: Vec<u8> = (0..=255).collect();
        let path = temp_file("style.png", &bytes);
        let api = Arc::new(ScriptedApi::with_statuses(vec![in_progress(), completed()]));
        let mut wf = workflow(&api);

        let result = wf
            .generate("  A wizard in the forest ", Some(path.as_path()), |_| {})
            .await
            .unwrap();

        assert_eq!(result.final_prompt, "a wizard, in soft pastel watercolor");
        assert_eq!(result.image_b64, "aW1n");

        let submitted = api.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].prompt, "A wizard in the forest");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&submitted[0].style_image_b64)
            .unwrap();
        assert_eq!(decoded, bytes);
        drop(submitted);

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_validation_blocks_network() {
        let api = Arc::new(ScriptedApi::default());
        let mut wf = workflow(&api);

        let err = wf.generate("   ", Some(Path::new("style.png")), |_| {}).await.unwrap_err();
        assert!(matches!(err, ReflectError::Validation(_)));

        let err = wf.generate("a cat", None, |_| {}).await.unwrap_err();
        assert!(matches!(err, ReflectError::Validation(_)));

        let err = wf.generate_from_bytes("a cat", Some(&[][..]), |_| {}).await.unwrap_err();
        assert!(matches!(err, ReflectError::Validation(_)));

        assert!(api.submitted.lock().unwrap().is_empty());
        assert_eq!(api.status_calls(), 0);
        assert!(wf.session().last_request().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_io_error() {
        let api = Arc::new(ScriptedApi::default());
        let mut wf = workflow(&api);
        let missing = std::env::temp_dir().join("reflectgen-definitely-missing.png");

        let err = wf.generate("a cat", Some(missing.as_path()), |_| {}).await.unwrap_err();

        assert!(matches!(err, ReflectError::Io(_)));
        assert!(api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_request_recorded_when_submit_fails() {
        let api = Arc::new(ScriptedApi::default());
        *api.submit_result.lock().unwrap() =
            Some(Err(ReflectError::Submission("No job ID returned".into())));
        let mut wf = workflow(&api);

        let err = wf
            .generate_from_bytes("a cat", Some(b"style".as_slice()), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ReflectError::Submission(_)));
        assert_eq!(wf.session().last_request().prompt, "a cat");
        assert_eq!(api.status_calls(), 0);

        wf.send_feedback(Vote::Down).await.unwrap();
        let sent = api.feedback.lock().unwrap();
        assert_eq!(sent[0].prompt, "a cat");
        assert_eq!(sent[0].style_image_b64, "c3R5bGU=");
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_surfaces() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![Ok(
            json!({
                "status": "FAILED",
                "error": "prompt and either style_img_url or style_img_b64 are required"
            }),
        )]));
        let mut wf = workflow(&api);

        let err = wf.generate_from_bytes("a cat", Some(b"x".as_slice()), |_| {}).await.unwrap_err();

        assert!(matches!(err, ReflectError::JobFailed(ref m) if m.contains("style_img_b64")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_surfaces() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![Ok(
            json!({"status": "COMPLETED", "output": null, "error": "CUDA out of memory"}),
        )]));
        let mut wf = workflow(&api);

        let err = wf.generate_from_bytes("a cat", Some(b"x".as_slice()), |_| {}).await.unwrap_err();

        assert!(matches!(err, ReflectError::MissingImage));
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_prompt_passes_through() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![Ok(
            json!({"status": "COMPLETED", "output": {"image_b64": "aW1n"}}),
        )]));
        let mut wf = workflow(&api);

        let result = wf.generate_from_bytes("a cat", Some(b"x".as_slice()), |_| {}).await.unwrap();

        assert_eq!(result.final_prompt, PROMPT_PLACEHOLDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_per_tick() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![
            in_progress(),
            in_progress(),
            in_progress(),
            completed(),
        ]));
        let config = PollConfig::default().interval(Duration::from_millis(250));
        let mut wf = workflow(&api).with_poll_config(config);
        let mut ticks = Vec::new();

        wf.generate_from_bytes("a cat", Some(b"x".as_slice()), |p| ticks.push(p.attempt))
            .await
            .unwrap();

        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_token_abandons_poll() {
        let api = Arc::new(ScriptedApi::default());
        let mut wf = workflow(&api);
        let cancel = wf.cancel_token();

        let err = wf
            .generate_from_bytes("a cat", Some(b"x".as_slice()), |p| {
                if p.attempt == 2 {
                    cancel.cancel();
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReflectError::Cancelled));
        assert_eq!(api.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_usable_after_cancel() {
        let api = Arc::new(ScriptedApi::default());
        let mut wf = workflow(&api);
        let cancel = wf.cancel_token();

        let err = wf
            .generate_from_bytes("first", Some(b"1".as_slice()), |_| cancel.cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, ReflectError::Cancelled));

        api.statuses.lock().unwrap().push_back(completed());
        let result = wf
            .generate_from_bytes("second", Some(b"2".as_slice()), |_| {})
            .await
            .unwrap();

        assert_eq!(result.image_b64, "aW1n");
        assert_eq!(api.submitted.lock().unwrap().len(), 2);
        assert_eq!(api.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_runs_skips_submit() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![completed()]));
        let mut wf = workflow(&api);
        wf.cancel_token().cancel();

        let err = wf
            .generate_from_bytes("a cat", Some(b"x".as_slice()), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ReflectError::Cancelled));
        assert!(api.submitted.lock().unwrap().is_empty());
        assert_eq!(wf.session().last_request().prompt, "a cat");

        wf.generate_from_bytes("a cat", Some(b"x".as_slice()), |_| {})
            .await
            .unwrap();
        assert_eq!(api.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_without_submission_is_empty() {
        let api = Arc::new(ScriptedApi::default());
        let wf = workflow(&api);

        wf.send_feedback(Vote::Up).await.unwrap();

        let sent = api.feedback.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].prompt, "");
        assert_eq!(sent[0].style_image_b64, "");
        assert_eq!(sent[0].vote, Vote::Up);
    }

    #[tokio::test]
    async fn test_feedback_error_propagates() {
        let api = Arc::new(ScriptedApi::default());
        *api.feedback_error.lock().unwrap() =
            Some(ReflectError::Feedback("connection refused".into()));
        let wf = workflow(&api).with_session(Session::with_last_request(
            GenerationRequest::from_encoded("a cat", "eA=="),
        ));

        let err = wf.send_feedback(Vote::Down).await.unwrap_err();

        assert!(matches!(err, ReflectError::Feedback(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_submission_overwrites_last_request() {
        let api = Arc::new(ScriptedApi::with_statuses(vec![completed(), completed()]));
        *api.submit_result.lock().unwrap() = Some(Ok(JobHandle::new("job-a")));
        let mut wf = workflow(&api);

        let _ = wf.generate_from_bytes("first", Some(b"1".as_slice()), |_| {}).await.unwrap();
        let _ = wf.generate_from_bytes("second", Some(b"2".as_slice()), |_| {}).await.unwrap();

        assert_eq!(wf.session().last_request().prompt, "second");
        assert_eq!(api.submitted.lock().unwrap().len(), 2);
    }
}
