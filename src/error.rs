//! Error types for job submission, polling and feedback.

use std::time::Duration;

/// Longest error body carried into an error message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while generating an image or sending feedback.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    /// Local input is missing or invalid; nothing was sent.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Client configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// API key missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Job creation failed.
    #[error("error submitting job: {0}")]
    Submission(String),

    /// A single status check failed.
    #[error("status check failed: {0}")]
    Poll(String),

    /// The remote job reported FAILED.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// No image data in any known response shape.
    #[error("job completed but no image data was found in the response")]
    MissingImage,

    /// Feedback could not be delivered.
    #[error("failed to send feedback: {0}")]
    Feedback(String),

    /// Poll deadline or attempt cap reached before a terminal status.
    #[error("job did not finish after {attempts} status checks ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    /// Too many status checks failed in a row.
    #[error("gave up after {count} consecutive status check failures: {last}")]
    TooManyPollErrors { count: u32, last: String },

    /// Polling was abandoned through a [`CancelToken`](crate::CancelToken).
    #[error("cancelled")]
    Cancelled,

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (reading the style image, saving the result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode base64 image data.
    #[error("failed to decode: {0}")]
    Decode(String),
}

impl ReflectError {
    /// Returns true if the poll loop should swallow this error and try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Poll(_) | Self::Network(_))
    }

    /// Returns true if the error was caused by local input rather than the service.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidConfig(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ReflectError>;

/// Makes a response body safe to embed in an error message.
///
/// Control characters are replaced with spaces and the text is cut to a
/// bounded length on a char boundary.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    if cleaned.len() <= MAX_ERROR_MESSAGE_LEN {
        return cleaned;
    }

    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &cleaned[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient() {
        assert!(ReflectError::Poll("503".into()).is_transient());

        assert!(!ReflectError::Submission("no id".into()).is_transient());
        assert!(!ReflectError::JobFailed("bad input".into()).is_transient());
        assert!(!ReflectError::MissingImage.is_transient());
        assert!(!ReflectError::Cancelled.is_transient());
    }

    #[test]
    fn test_is_user_error() {
        assert!(ReflectError::Validation("empty prompt".into()).is_user_error());
        assert!(ReflectError::InvalidConfig("no endpoint".into()).is_user_error());
        assert!(!ReflectError::Auth("bad key".into()).is_user_error());
    }

    #[test]
    fn test_error_display() {
        let err = ReflectError::JobFailed("bad input".into());
        assert_eq!(err.to_string(), "job failed: bad input");

        let err = ReflectError::Timeout {
            attempts: 3,
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "job did not finish after 3 status checks (3s)");

        let err = ReflectError::TooManyPollErrors {
            count: 5,
            last: "HTTP 502".into(),
        };
        assert_eq!(
            err.to_string(),
            "gave up after 5 consecutive status check failures: HTTP 502"
        );
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_error_message("  bad\nthing\t "), "bad thing");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let out = sanitize_error_message(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_ERROR_MESSAGE_LEN + 3);
    }
}
