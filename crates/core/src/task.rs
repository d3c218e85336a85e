//! Canonical task-result model and normalization of the provider's callback
//! wire shape.
//!
//! The provider reports task state as a free-form string; only the two
//! terminal values below change behavior here, everything else is passed
//! through untouched.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATE_SUCCESS: &str = "success";
pub const STATE_FAILED: &str = "failed";

pub const DEFAULT_MODEL: &str = "viduq2";
pub const DEFAULT_RESOLUTION: &str = "1080p";

/// Error string recorded when a failed callback carries no `err_code`.
pub const GENERIC_FAILURE: &str = "Task failed";

/// The internal record for one generation task, keyed by the
/// provider-assigned task id. Built exclusively by [`normalize`]; a later
/// callback for the same id replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub state: String,
    pub model: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub payload: String,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Terminal tasks receive no further callbacks (by convention; the
    /// provider does not enforce this and neither do we).
    pub fn is_terminal(&self) -> bool {
        self.state == STATE_SUCCESS || self.state == STATE_FAILED
    }
}

/// One creation artifact inside a callback. `url` is the clean render,
/// `watermarked_url` the fallback the provider always includes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Creation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub watermarked_url: Option<String>,
}

impl Creation {
    fn primary_url(&self) -> Option<&str> {
        non_empty(self.url.as_deref()).or_else(|| non_empty(self.watermarked_url.as_deref()))
    }
}

/// The provider's callback body as delivered over the wire. The provider has
/// named the task id field both `id` and `task_id` across API revisions, so
/// both are accepted. Every other field is optional and defaulted during
/// normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creations: Vec<Creation>,
    #[serde(default)]
    pub err_code: Option<String>,
}

impl CallbackPayload {
    /// The task id under either historical field name. Empty strings count
    /// as absent.
    pub fn effective_task_id(&self) -> Option<&str> {
        non_empty(self.id.as_deref()).or_else(|| non_empty(self.task_id.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Convert a callback payload into the canonical [`TaskResult`].
///
/// Optional provider fields are replaced by documented defaults so readers
/// never branch on missing-vs-present. `image_url` is derived only for
/// successful tasks with at least one creation, preferring the clean URL
/// over the watermarked one; `error` only for failed tasks, defaulting to
/// [`GENERIC_FAILURE`] when the provider gave no code.
pub fn normalize(payload: CallbackPayload, received_at: DateTime<Utc>) -> Result<TaskResult> {
    let task_id = match payload.effective_task_id() {
        Some(id) => id.to_string(),
        None => bail!("callback payload carries neither 'id' nor 'task_id'"),
    };

    let image_url = if payload.state == STATE_SUCCESS {
        payload
            .creations
            .first()
            .and_then(Creation::primary_url)
            .map(str::to_string)
    } else {
        None
    };

    let error = if payload.state == STATE_FAILED {
        Some(
            non_empty(payload.err_code.as_deref())
                .unwrap_or(GENERIC_FAILURE)
                .to_string(),
        )
    } else {
        None
    };

    Ok(TaskResult {
        task_id,
        state: payload.state,
        model: payload.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        prompt: payload.prompt.unwrap_or_default(),
        images: payload.images.unwrap_or_default(),
        seed: payload.seed.unwrap_or(0),
        aspect_ratio: payload.aspect_ratio,
        resolution: payload
            .resolution
            .unwrap_or_else(|| DEFAULT_RESOLUTION.to_string()),
        callback_url: payload.callback_url,
        payload: payload.payload.unwrap_or_default(),
        credits: payload.credits.unwrap_or(0),
        created_at: payload.created_at.unwrap_or(received_at),
        image_url,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CallbackPayload {
        serde_json::from_str(json).expect("valid callback JSON")
    }

    fn ingestion_time() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().expect("fixed timestamp")
    }

    #[test]
    fn success_callback_extracts_first_creation_url() {
        let payload = parse(
            r#"{
                "id": "t1",
                "state": "success",
                "creations": [
                    {"url": "https://x/1.png", "watermarked_url": "https://x/1-wm.png"},
                    {"url": "https://x/2.png"}
                ]
            }"#,
        );

        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.task_id, "t1");
        assert_eq!(result.state, STATE_SUCCESS);
        assert_eq!(result.image_url.as_deref(), Some("https://x/1.png"));
        assert!(result.error.is_none());
        assert!(result.is_terminal());
    }

    #[test]
    fn success_callback_falls_back_to_watermarked_url() {
        let payload = parse(
            r#"{
                "id": "t1",
                "state": "success",
                "creations": [{"watermarked_url": "https://x/wm.png"}]
            }"#,
        );

        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.image_url.as_deref(), Some("https://x/wm.png"));
    }

    #[test]
    fn success_callback_without_creations_has_no_image_url() {
        let payload = parse(r#"{"id": "t1", "state": "success", "creations": []}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert!(result.image_url.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn empty_creation_urls_count_as_absent() {
        let payload = parse(
            r#"{
                "id": "t1",
                "state": "success",
                "creations": [{"url": "", "watermarked_url": "https://x/wm.png"}]
            }"#,
        );

        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.image_url.as_deref(), Some("https://x/wm.png"));
    }

    #[test]
    fn failed_callback_records_provider_error_code() {
        let payload = parse(r#"{"task_id": "t2", "state": "failed", "err_code": "E_TIMEOUT"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");

        assert_eq!(result.task_id, "t2");
        assert_eq!(result.error.as_deref(), Some("E_TIMEOUT"));
        assert!(result.image_url.is_none());
        assert!(result.is_terminal());
    }

    #[test]
    fn failed_callback_without_code_uses_generic_marker() {
        let payload = parse(r#"{"task_id": "t2", "state": "failed"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.error.as_deref(), Some(GENERIC_FAILURE));
    }

    #[test]
    fn non_terminal_callback_derives_neither_field() {
        let payload = parse(
            r#"{
                "id": "t3",
                "state": "processing",
                "creations": [{"url": "https://x/partial.png"}],
                "err_code": "E_IGNORED"
            }"#,
        );

        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert!(result.image_url.is_none());
        assert!(result.error.is_none());
        assert!(!result.is_terminal());
    }

    #[test]
    fn missing_optional_fields_take_documented_defaults() {
        let payload = parse(r#"{"id": "t4", "state": "queueing"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");

        assert_eq!(result.model, DEFAULT_MODEL);
        assert_eq!(result.prompt, "");
        assert!(result.images.is_empty());
        assert_eq!(result.seed, 0);
        assert_eq!(result.resolution, DEFAULT_RESOLUTION);
        assert_eq!(result.payload, "");
        assert_eq!(result.credits, 0);
        assert_eq!(result.created_at, ingestion_time());
        assert!(result.aspect_ratio.is_none());
        assert!(result.callback_url.is_none());
    }

    #[test]
    fn provider_created_at_is_preserved() {
        let payload = parse(r#"{"id": "t5", "state": "success", "created_at": "2025-05-30T08:15:00Z"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(
            result.created_at,
            "2025-05-30T08:15:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn echoed_submission_parameters_pass_through() {
        let payload = parse(
            r#"{
                "id": "t6",
                "state": "success",
                "model": "viduq1",
                "prompt": "a red bridge",
                "images": ["data:image/png;base64,AAA="],
                "seed": 42,
                "aspect_ratio": "16:9",
                "resolution": "720p",
                "callback_url": "https://edge.example/api/vidu-callback",
                "payload": "node-7",
                "credits": 12
            }"#,
        );

        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.model, "viduq1");
        assert_eq!(result.prompt, "a red bridge");
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.seed, 42);
        assert_eq!(result.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(result.resolution, "720p");
        assert_eq!(
            result.callback_url.as_deref(),
            Some("https://edge.example/api/vidu-callback")
        );
        assert_eq!(result.payload, "node-7");
        assert_eq!(result.credits, 12);
    }

    #[test]
    fn id_takes_precedence_over_task_id() {
        let payload = parse(r#"{"id": "primary", "task_id": "legacy", "state": "success"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.task_id, "primary");
    }

    #[test]
    fn empty_id_falls_back_to_task_id() {
        let payload = parse(r#"{"id": "", "task_id": "legacy", "state": "success"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");
        assert_eq!(result.task_id, "legacy");
    }

    #[test]
    fn missing_task_id_is_rejected() {
        let payload = parse(r#"{"state": "success"}"#);
        let err = normalize(payload, ingestion_time()).expect_err("must reject");
        assert!(
            err.to_string().contains("neither 'id' nor 'task_id'"),
            "got: {err}"
        );
    }

    #[test]
    fn serialized_result_omits_absent_derived_fields() {
        let payload = parse(r#"{"id": "t7", "state": "processing"}"#);
        let result = normalize(payload, ingestion_time()).expect("normalize");

        let json = serde_json::to_value(&result).expect("serialize");
        let obj = json.as_object().expect("object");
        assert!(!obj.contains_key("image_url"));
        assert!(!obj.contains_key("error"));
        assert!(!obj.contains_key("aspect_ratio"));
    }
}
