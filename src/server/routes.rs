//! HTTP surface (C8, spec.md §4.8/§6).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::AspectRatio;
use crate::orchestrator::JobRequest;

use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[allow(dead_code)]
    pub q: Option<String>,
    #[allow(dead_code)]
    pub lang: Option<String>,
    #[allow(dead_code)]
    pub limit: Option<u32>,
}

/// `GET /search` is delegated to an out-of-scope collaborator
/// (spec.md §4.8); this core does not implement it.
pub async fn search() -> impl IntoResponse {
    (StatusCode::NOT_IMPLEMENTED, Json(serde_json::json!({
        "error": "search is served by a collaborator outside this service"
    })))
}

#[derive(Deserialize)]
pub struct GenerateVideoRequest {
    pub text: String,
    #[serde(default = "default_lang")]
    #[allow(dead_code)]
    pub lang: String,
    #[serde(default = "default_max_phrase_length")]
    pub max_phrase_length: usize,
    #[serde(default = "default_padding")]
    pub clip_padding_start: f64,
    #[serde(default = "default_padding")]
    pub clip_padding_end: f64,
    #[serde(default)]
    #[allow(dead_code)]
    pub add_subtitles: bool,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[allow(dead_code)]
    pub watermark_text: Option<String>,
    #[allow(dead_code)]
    pub intro_text: Option<String>,
    #[allow(dead_code)]
    pub outro_text: Option<String>,
    #[serde(default)]
    pub enhance_audio: bool,
    #[serde(default)]
    pub keep_original_audio: bool,
    pub max_download_workers: Option<usize>,
    pub max_processing_workers: Option<usize>,
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_max_phrase_length() -> usize {
    10
}

fn default_padding() -> f64 {
    0.15
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTimingDto {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    pub status: &'static str,
    pub video_url: Option<String>,
    pub original_video_url: Option<String>,
    pub word_timings: Vec<WordTimingDto>,
    pub missing_words: Vec<String>,
    pub message: String,
}

pub async fn generate_video(
    State(state): State<AppState>,
    Json(body): Json<GenerateVideoRequest>,
) -> AppResult<impl IntoResponse> {
    if body.text.trim().is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }

    let request = JobRequest {
        text: body.text,
        max_phrase_length: body.max_phrase_length,
        clip_padding_start: body.clip_padding_start,
        clip_padding_end: body.clip_padding_end,
        aspect_ratio: body.aspect_ratio,
        normalize_loudness: true,
        enhance_audio: body.enhance_audio,
        keep_original_audio: body.keep_original_audio,
        max_download_workers: body.max_download_workers,
        max_processing_workers: body.max_processing_workers,
        preferred_channels: Vec::new(),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let result = state.orchestrator.run(request, None, cancel).await?;

    let status_label = match result.status {
        crate::model::JobStatus::Success => "success",
        crate::model::JobStatus::PartialFailure => "partial_failure",
        crate::model::JobStatus::Failed => "failed",
        crate::model::JobStatus::Cancelled => "cancelled",
    };

    let video_url = result
        .output_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|name| format!("/videos/{}", name.to_string_lossy()));
    let original_video_url = result
        .original_output_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|name| format!("/videos/{}", name.to_string_lossy()));

    let message = if result.missing_tokens.is_empty() {
        "generated successfully".to_string()
    } else {
        format!("{} word(s) substituted with placeholders", result.missing_tokens.len())
    };

    let response = GenerateVideoResponse {
        status: status_label,
        video_url,
        original_video_url,
        word_timings: result
            .word_timings
            .into_iter()
            .map(|w| WordTimingDto { word: w.word, start: w.start, end: w.end })
            .collect(),
        missing_words: result.missing_tokens,
        message,
    };

    Ok(Json(response))
}

/// `GET /videos/{filename}`, sandboxed to the configured output directory.
pub async fn serve_video(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> AppResult<impl IntoResponse> {
    let requested = state.config.output_dir.join(&filename);

    let canonical_dir = state
        .config
        .output_dir
        .canonicalize()
        .map_err(|_| AppError::BadRequest("output directory unavailable".to_string()))?;
    let canonical_file = requested
        .canonicalize()
        .map_err(|_| AppError::NotFound(filename.clone()))?;

    if !canonical_file.starts_with(&canonical_dir) {
        return Err(AppError::NotFound(filename));
    }

    let bytes = tokio::fs::read(&canonical_file)
        .await
        .map_err(|_| AppError::NotFound(filename))?;

    Ok(([("content-type", "video/mp4")], bytes))
}
