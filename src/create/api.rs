use serde::{Deserialize, Serialize};

use super::job::{Job, Orientation, SizeClass};

/// Body of the create call. The remote schema is fixed-shape: every field is
/// sent on every request, nullable ones as explicit nulls.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePayload {
    pub kind: &'static str,
    pub prompt: String,
    pub title: Option<String>,
    pub orientation: Orientation,
    pub size: SizeClass,
    pub n_frames: u32,
    pub inpaint_items: Vec<InpaintItem>,
    pub remix_target_id: Option<String>,
    pub project_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub cameo_ids: Option<Vec<String>>,
    pub cameo_replacements: Option<serde_json::Value>,
    pub model: String,
    pub style_id: Option<String>,
    pub audio_caption: Option<String>,
    pub audio_transcript: Option<String>,
    pub video_caption: Option<String>,
    pub storyboard_id: Option<String>,
}

impl CreatePayload {
    pub fn from_job(job: &Job, model: &str, inpaint_items: Vec<InpaintItem>) -> Self {
        Self {
            kind: "video",
            prompt: job.prompt.clone(),
            title: None,
            orientation: job.orientation,
            size: job.size,
            n_frames: job.n_frames,
            inpaint_items,
            remix_target_id: None,
            project_id: None,
            metadata: None,
            cameo_ids: None,
            cameo_replacements: None,
            model: model.to_string(),
            style_id: None,
            audio_caption: job.audio_caption.clone(),
            audio_transcript: job.audio_transcript.clone(),
            video_caption: None,
            storyboard_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InpaintItem {
    pub kind: &'static str,
    pub file_id: String,
}

impl InpaintItem {
    pub fn file(file_id: String) -> Self {
        Self {
            kind: "file",
            file_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub rate_limit_and_credit_balance: Option<CreditBalance>,
}

impl CreateResponse {
    pub fn videos_remaining(&self) -> Option<u64> {
        self.rate_limit_and_credit_balance
            .as_ref()
            .and_then(|b| b.estimated_num_videos_remaining)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditBalance {
    #[serde(default)]
    pub estimated_num_videos_remaining: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
}

/// One in-progress unit from the pending-set query. The remote reports the
/// identifier under `id` or `task_id` and progress under `progress` or
/// `percentage`; both unions are resolved here into canonical fields, and a
/// shape carrying neither identifier is a parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawPendingEntry")]
pub struct PendingEntry {
    pub task_id: String,
    pub progress: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPendingEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    progress: Option<serde_json::Value>,
    #[serde(default)]
    percentage: Option<serde_json::Value>,
}

impl TryFrom<RawPendingEntry> for PendingEntry {
    type Error = String;

    fn try_from(raw: RawPendingEntry) -> Result<Self, Self::Error> {
        let task_id = raw
            .id
            .or(raw.task_id)
            .ok_or_else(|| "pending entry carries neither `id` nor `task_id`".to_string())?;
        let progress = match raw.progress.or(raw.percentage) {
            None => None,
            Some(value) => Some(
                coerce_progress(&value)
                    .ok_or_else(|| format!("unrecognized progress value: {value}"))?,
            ),
        };
        Ok(Self { task_id, progress })
    }
}

fn coerce_progress(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// One finished (or historical) artifact from the draft listing. The task
/// identifier may be null or absent even for freshly completed work.
#[derive(Debug, Clone, Deserialize)]
pub struct Draft {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub download_urls: Option<DownloadUrls>,
    #[serde(default)]
    pub downloadable_url: Option<String>,
}

impl Draft {
    /// Preferred download URL: the non-watermarked variant when present,
    /// otherwise the generic downloadable URL.
    pub fn download_url(&self) -> Option<&str> {
        self.download_urls
            .as_ref()
            .and_then(|u| u.no_watermark.as_deref())
            .or(self.downloadable_url.as_deref())
    }

    pub fn describe_shape(&self) -> String {
        format!(
            "{}x{}, {:.0}s",
            self.width.unwrap_or(0),
            self.height.unwrap_or(0),
            self.duration_s.unwrap_or(0.0)
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadUrls {
    #[serde(default)]
    pub no_watermark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftListing {
    #[serde(default)]
    pub items: Vec<Draft>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_entry_accepts_either_id_field() {
        let a: PendingEntry =
            serde_json::from_str(r#"{"id": "task_1", "progress": 42}"#).expect("parse id");
        assert_eq!(a.task_id, "task_1");
        assert_eq!(a.progress, Some(42.0));

        let b: PendingEntry =
            serde_json::from_str(r#"{"task_id": "task_2", "percentage": "87%"}"#)
                .expect("parse task_id");
        assert_eq!(b.task_id, "task_2");
        assert_eq!(b.progress, Some(87.0));
    }

    #[test]
    fn pending_entry_without_identifier_is_an_error() {
        let result: Result<PendingEntry, _> = serde_json::from_str(r#"{"progress": 10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn pending_entry_with_non_numeric_progress_is_an_error() {
        let result: Result<PendingEntry, _> =
            serde_json::from_str(r#"{"id": "t", "progress": {"pct": 4}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn pending_entry_progress_is_optional() {
        let entry: PendingEntry = serde_json::from_str(r#"{"id": "t"}"#).expect("parse");
        assert_eq!(entry.progress, None);
    }

    #[test]
    fn draft_prefers_no_watermark_url() {
        let draft: Draft = serde_json::from_str(
            r#"{
                "id": "gen_1",
                "download_urls": {"no_watermark": "https://cdn/clean.mp4"},
                "downloadable_url": "https://cdn/marked.mp4"
            }"#,
        )
        .expect("parse draft");
        assert_eq!(draft.download_url(), Some("https://cdn/clean.mp4"));

        let fallback: Draft = serde_json::from_str(
            r#"{"id": "gen_2", "downloadable_url": "https://cdn/marked.mp4"}"#,
        )
        .expect("parse draft");
        assert_eq!(fallback.download_url(), Some("https://cdn/marked.mp4"));
    }

    #[test]
    fn create_payload_serializes_explicit_nulls() {
        let job = Job::new("a red fox".to_string());
        let payload = CreatePayload::from_job(&job, "sy_8", Vec::new());
        let json = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(json["kind"], "video");
        assert_eq!(json["orientation"], "landscape");
        assert!(json["title"].is_null());
        assert!(json["storyboard_id"].is_null());
        assert_eq!(json["inpaint_items"].as_array().map(Vec::len), Some(0));
    }
}
