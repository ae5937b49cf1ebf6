//! Core types for jobs, results and feedback.

use crate::error::{ReflectError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Supported image formats of a generated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (what the service emits today).
    #[default]
    Png,
    /// JPEG format.
    Jpeg,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// A prompt plus style image, as sent to the job queue.
///
/// The style image is held base64-encoded because that is the form both job
/// submission and feedback put on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's text prompt (trimmed).
    pub prompt: String,
    /// The style image, base64 (standard alphabet, padded).
    pub style_image_b64: String,
}

impl GenerationRequest {
    /// Creates a request, encoding the raw style image bytes.
    pub fn new(prompt: impl Into<String>, style_image: &[u8]) -> Self {
        Self {
            prompt: prompt.into(),
            style_image_b64: base64::engine::general_purpose::STANDARD.encode(style_image),
        }
    }

    /// Creates a request from an already encoded style image.
    pub fn from_encoded(prompt: impl Into<String>, style_image_b64: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            style_image_b64: style_image_b64.into(),
        }
    }

    /// Returns true if neither a prompt nor an image has been recorded.
    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty() && self.style_image_b64.is_empty()
    }
}

/// Identifies one queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    /// Opaque job id assigned by the queue.
    pub id: String,
}

impl JobHandle {
    /// Wraps a job id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Status of a job as reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Finished successfully; output is available.
    Completed,
    /// Finished with an error.
    Failed,
    /// Anything else (`IN_QUEUE`, `IN_PROGRESS`, unknown or missing),
    /// carrying the raw status text.
    Pending(String),
}

impl JobStatus {
    /// Maps a raw `status` field. Only exact `COMPLETED` / `FAILED` are terminal.
    pub fn from_raw(status: Option<&str>) -> Self {
        match status {
            Some("COMPLETED") => Self::Completed,
            Some("FAILED") => Self::Failed,
            Some(other) => Self::Pending(other.to_string()),
            None => Self::Pending(String::new()),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Pending(raw) if raw.is_empty() => write!(f, "PENDING"),
            Self::Pending(raw) => write!(f, "{raw}"),
        }
    }
}

/// One status poll's answer.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Parsed status.
    pub status: JobStatus,
    /// The `error` field, when the service supplied one.
    pub error: Option<String>,
    /// The full response body.
    pub raw: Value,
}

impl StatusReport {
    /// Builds a report from a parsed status body.
    pub fn from_body(raw: Value) -> Self {
        let status = JobStatus::from_raw(raw.get("status").and_then(Value::as_str));
        let error = raw
            .get("error")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        Self { status, error, raw }
    }
}

/// The normalized outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "job result should be saved or displayed"]
pub struct JobResult {
    /// The service's rewritten prompt, or
    /// [`PROMPT_PLACEHOLDER`](crate::normalize::PROMPT_PLACEHOLDER).
    pub final_prompt: String,
    /// The generated image, base64 as returned by the service.
    pub image_b64: String,
}

impl JobResult {
    /// Decodes the image payload.
    pub fn decode_image(&self) -> Result<Vec<u8>> {
        decode_base64_lenient(&self.image_b64).map_err(|e| ReflectError::Decode(e.to_string()))
    }

    /// Detects the format of the decoded image, defaulting to PNG.
    pub fn image_format(&self) -> ImageFormat {
        self.decode_image()
            .ok()
            .and_then(|data| ImageFormat::from_magic_bytes(&data))
            .unwrap_or_default()
    }

    /// Decodes the image and writes it to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.decode_image()?)?;
        Ok(())
    }
}

/// A user judgment on the last result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// Thumbs up.
    Up,
    /// Thumbs down.
    Down,
}

impl Vote {
    /// Returns the wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Vote {
    type Err = ReflectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "u" | "+" => Ok(Self::Up),
            "down" | "d" | "-" => Ok(Self::Down),
            other => Err(ReflectError::Validation(format!(
                "vote must be 'up' or 'down', got '{other}'"
            ))),
        }
    }
}

/// A vote tied to a prompt/image pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackVote {
    /// Prompt of the rated submission.
    pub prompt: String,
    /// Style image of the rated submission, base64.
    pub style_image_b64: String,
    /// The vote.
    pub vote: Vote,
}

impl FeedbackVote {
    /// Builds a vote for the given request.
    pub fn for_request(request: &GenerationRequest, vote: Vote) -> Self {
        Self {
            prompt: request.prompt.clone(),
            style_image_b64: request.style_image_b64.clone(),
            vote,
        }
    }
}

fn strip_data_uri(input: &str) -> &str {
    match input.find(";base64,") {
        Some(pos) => &input[pos + 8..],
        None => input,
    }
}

/// Decodes a base64 string that may be imperfectly formatted.
///
/// Accepts a data URI prefix, embedded whitespace and missing padding.
pub(crate) fn decode_base64_lenient(
    input: &str,
) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = strip_data_uri(input)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok(data);
    }

    base64::engine::general_purpose::STANDARD_NO_PAD.decode(cleaned.trim_end_matches('='))
}
