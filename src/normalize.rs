//! Reconciles the shapes a completed job's output can take.
//!
//! The worker's return value has been wrapped differently across deployments:
//!
//! ```text
//! {"output": {"prompt_final": .., "image_b64": ..}}             direct
//! {"output": {"output": {"prompt_final": .., "image_b64": ..}}} double-nested
//! {"output": "{\"prompt_final\": .., \"image_b64\": ..}"}       string-encoded
//! {"result": {"image_b64": ..}}                                 anywhere else
//! ```
//!
//! Each shape has its own extractor. [`normalize`] tries them in order and
//! fills each field from the first extractor that has it.

use crate::error::{ReflectError, Result};
use crate::job::JobResult;
use serde_json::{Map, Value};

/// Substituted when the service returns no final prompt.
pub const PROMPT_PLACEHOLDER: &str = "(no final prompt returned)";

const PROMPT_KEY: &str = "prompt_final";
const IMAGE_KEY: &str = "image_b64";

/// Whatever one extractor found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Fields {
    pub(crate) prompt: Option<String>,
    pub(crate) image: Option<String>,
}

impl Fields {
    fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        let fields = Self {
            prompt: string_field(obj, PROMPT_KEY),
            image: string_field(obj, IMAGE_KEY),
        };
        (fields.prompt.is_some() || fields.image.is_some()).then_some(fields)
    }
}

type Extractor = fn(&Value) -> Option<Fields>;

/// Extractors in priority order.
const EXTRACTORS: [(&str, Extractor); 4] = [
    ("nested_output", nested_output),
    ("direct_output", direct_output),
    ("string_encoded_output", string_encoded_output),
    ("scan_top_level", scan_top_level),
];

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `raw.output.output.{prompt_final,image_b64}`
pub(crate) fn nested_output(raw: &Value) -> Option<Fields> {
    raw.get("output")?
        .get("output")?
        .as_object()
        .and_then(Fields::from_object)
}

/// `raw.output.{prompt_final,image_b64}`
pub(crate) fn direct_output(raw: &Value) -> Option<Fields> {
    raw.get("output")?.as_object().and_then(Fields::from_object)
}

/// `raw.output` is a JSON document in a string.
pub(crate) fn string_encoded_output(raw: &Value) -> Option<Fields> {
    let text = raw.get("output")?.as_str()?;
    let parsed: Value = serde_json::from_str(text).ok()?;
    let obj = parsed.as_object()?;

    let inner = obj
        .get("output")
        .and_then(Value::as_object)
        .and_then(Fields::from_object);
    inner.or_else(|| Fields::from_object(obj))
}

/// First image and first prompt across all top-level object properties,
/// which need not be the same property.
pub(crate) fn scan_top_level(raw: &Value) -> Option<Fields> {
    let mut found = Fields::default();

    for obj in raw.as_object()?.values().filter_map(Value::as_object) {
        if found.prompt.is_none() {
            found.prompt = string_field(obj, PROMPT_KEY);
        }
        if found.image.is_none() {
            found.image = string_field(obj, IMAGE_KEY);
        }
        if found.prompt.is_some() && found.image.is_some() {
            break;
        }
    }

    (found.prompt.is_some() || found.image.is_some()).then_some(found)
}

/// Extracts the final prompt and image from a completed job's status body.
///
/// Fails with [`ReflectError::MissingImage`] when no extractor yields an
/// image. A missing prompt becomes [`PROMPT_PLACEHOLDER`].
pub fn normalize(raw: &Value) -> Result<JobResult> {
    let mut prompt = None;
    let mut image = None;

    for (name, extract) in EXTRACTORS {
        let Some(found) = extract(raw) else {
            continue;
        };
        tracing::trace!(
            extractor = name,
            has_image = found.image.is_some(),
            "output shape matched"
        );

        if prompt.is_none() {
            prompt = found.prompt;
        }
        if image.is_none() {
            image = found.image;
        }
        if image.is_some() {
            break;
        }
    }

    let image_b64 = image.ok_or(ReflectError::MissingImage)?;
    let final_prompt = prompt.unwrap_or_else(|| PROMPT_PLACEHOLDER.to_string());

    Ok(JobResult {
        final_prompt,
        image_b64,
    })
}
