//! Pipeline Orchestrator (C7, spec.md §4.7): drives plan → fetch →
//! transcode → concat → (enhance) for one job, with bounded worker pools,
//! a plan-order output guarantee, progress reporting, and cooperative
//! cancellation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::catalog::Catalog;
use crate::concat::Concatenator;
use crate::config::AppConfig;
use crate::enhancer::{Enhancer, EnhancerOptions};
use crate::error::{AppError, AppResult};
use crate::fetcher::Fetcher;
use crate::model::{AspectRatio, JobStatus, SegmentPick, WordTiming};
use crate::normalize::normalize_tokens;
use crate::planner::{self, PlannerOptions};
use crate::transcoder::{TranscodeOptions, Transcoder};

const DEFAULT_MAX_PHRASE_LEN: usize = 10;
const DEFAULT_PADDING: f64 = 0.15;

pub struct JobRequest {
    pub text: String,
    pub max_phrase_length: usize,
    pub clip_padding_start: f64,
    pub clip_padding_end: f64,
    pub aspect_ratio: AspectRatio,
    pub normalize_loudness: bool,
    pub enhance_audio: bool,
    pub keep_original_audio: bool,
    pub max_download_workers: Option<usize>,
    pub max_processing_workers: Option<usize>,
    pub preferred_channels: Vec<String>,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            max_phrase_length: DEFAULT_MAX_PHRASE_LEN,
            clip_padding_start: DEFAULT_PADDING,
            clip_padding_end: DEFAULT_PADDING,
            aspect_ratio: AspectRatio::default(),
            normalize_loudness: true,
            enhance_audio: false,
            keep_original_audio: false,
            max_download_workers: None,
            max_processing_workers: None,
            preferred_channels: Vec::new(),
        }
    }
}

pub struct JobResult {
    pub status: JobStatus,
    pub output_path: Option<PathBuf>,
    pub original_output_path: Option<PathBuf>,
    pub word_timings: Vec<WordTiming>,
    pub missing_tokens: Vec<String>,
    pub warnings: Vec<String>,
}

pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

pub struct Orchestrator {
    catalog: Arc<Catalog>,
    fetcher: Arc<Fetcher>,
    enhancer: Option<Arc<Enhancer>>,
    config: Arc<AppConfig>,
}

/// Outcome of running a single pick through fetch+transcode.
enum StageOutcome {
    Intermediate(PathBuf),
    MissingTokens(Vec<String>, String),
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        fetcher: Arc<Fetcher>,
        enhancer: Option<Arc<Enhancer>>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self { catalog, fetcher, enhancer, config }
    }

    pub async fn run(
        &self,
        request: JobRequest,
        progress: Option<ProgressCallback>,
        cancel: Arc<AtomicBool>,
    ) -> AppResult<JobResult> {
        if request.text.trim().is_empty() {
            return Err(AppError::BadRequest("text must not be empty".to_string()));
        }
        if request.max_phrase_length == 0 || request.max_phrase_length > 50 {
            return Err(AppError::BadRequest("maxPhraseLength must be in [1,50]".to_string()));
        }

        let job_id = uuid::Uuid::new_v4();
        let scratch_dir = self.config.temp_dir.join(format!("job-{job_id}"));
        std::fs::create_dir_all(&scratch_dir)?;

        let result = self.run_in_scratch(&request, &scratch_dir, progress, cancel.clone()).await;

        if self.config.cleanup_temp_files || cancel.load(Ordering::Relaxed) {
            let _ = std::fs::remove_dir_all(&scratch_dir);
        }

        result
    }

    async fn run_in_scratch(
        &self,
        request: &JobRequest,
        scratch_dir: &std::path::Path,
        progress: Option<ProgressCallback>,
        cancel: Arc<AtomicBool>,
    ) -> AppResult<JobResult> {
        let tokens = normalize_tokens(&request.text);

        let planner_options = PlannerOptions {
            max_phrase_len: request.max_phrase_length,
            preferred_channels: request.preferred_channels.clone(),
        };
        let picks = planner::plan(&self.catalog, &request.text, &planner_options).await?;

        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::Cancelled);
        }

        let w_fetch = request.max_download_workers.unwrap_or(self.config.max_download_workers).max(1);
        let w_proc = request.max_processing_workers.unwrap_or(self.config.max_processing_workers).max(1);

        let fetch_results = self.run_fetch_stage(&picks, request, w_fetch, &cancel).await?;

        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::Cancelled);
        }

        let total = picks.len();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let progress = progress.map(Arc::new);

        let stage_outcomes = self
            .run_transcode_stage(&picks, fetch_results, request, scratch_dir, w_proc, &cancel, &completed, total, &progress)
            .await?;

        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::Cancelled);
        }

        let mut intermediates = Vec::with_capacity(picks.len());
        let mut missing_tokens = Vec::new();
        let mut warnings = Vec::new();

        for outcome in stage_outcomes {
            match outcome {
                StageOutcome::Intermediate(path) => intermediates.push(path),
                StageOutcome::MissingTokens(tokens, warning) => {
                    missing_tokens.extend(tokens);
                    warnings.push(warning);
                }
            }
        }

        let concatenator = Concatenator::new(
            scratch_dir.to_path_buf(),
            self.config.incremental_stitching_threshold,
        );
        let output_path = scratch_dir.join(format!("output_{}.mp4", job_id_suffix()));
        let concat_result = concatenator.concatenate(&intermediates, &output_path)?;

        let final_output_dir = &self.config.output_dir;
        std::fs::create_dir_all(final_output_dir)?;
        let published_path = final_output_dir.join(output_path.file_name().unwrap());
        std::fs::copy(&concat_result.output_path, &published_path)?;

        let mut original_output_path = None;
        let mut final_path = published_path.clone();

        if request.enhance_audio {
            if let Some(enhancer) = &self.enhancer {
                let outcome = enhancer
                    .enhance(
                        &published_path,
                        &EnhancerOptions {
                            keep_original: request.keep_original_audio,
                            poll_interval: self.config.enhancer_poll_interval,
                            total_budget: self.config.enhancer_total_budget,
                        },
                    )
                    .await;
                final_path = outcome.output_path;
                original_output_path = outcome.original_path;
                if let Some(warning) = outcome.warning {
                    warnings.push(warning);
                }
            } else {
                warnings.push("audio enhancement requested but no enhancer configured".to_string());
            }
        }

        let word_timings = build_word_timings(&picks, &tokens, &intermediate_durations(&picks));

        let status = if missing_tokens.is_empty() {
            JobStatus::Success
        } else {
            JobStatus::PartialFailure
        };

        Ok(JobResult {
            status,
            output_path: Some(final_path),
            original_output_path,
            word_timings,
            missing_tokens,
            warnings,
        })
    }

    async fn run_fetch_stage(
        &self,
        picks: &[SegmentPick],
        request: &JobRequest,
        w_fetch: usize,
        cancel: &Arc<AtomicBool>,
    ) -> AppResult<Vec<Option<AppResult<PathBuf>>>> {
        let semaphore = Arc::new(Semaphore::new(w_fetch));
        let padding_start = request.clip_padding_start;
        let padding_end = request.clip_padding_end;

        let tasks = picks.iter().enumerate().map(|(i, pick)| {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let cancel = cancel.clone();
            let pick = pick.clone();

            async move {
                match pick {
                    SegmentPick::Placeholder { .. } => (i, None),
                    SegmentPick::Clip { video_id, start, end, .. } => {
                        let _permit = semaphore.acquire().await.expect("semaphore open");
                        let result = fetcher
                            .fetch(&video_id, start, end, padding_start, padding_end, None, &cancel)
                            .await;
                        (i, Some(result))
                    }
                }
            }
        });

        let mut results: Vec<Option<AppResult<PathBuf>>> = vec![None; picks.len()];
        let mut stream = stream::iter(tasks).buffer_unordered(w_fetch);
        while let Some((i, outcome)) = stream.next().await {
            results[i] = outcome;
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_transcode_stage(
        &self,
        picks: &[SegmentPick],
        fetch_results: Vec<Option<AppResult<PathBuf>>>,
        request: &JobRequest,
        scratch_dir: &std::path::Path,
        w_proc: usize,
        cancel: &Arc<AtomicBool>,
        completed: &Arc<std::sync::atomic::AtomicUsize>,
        total: usize,
        progress: &Option<Arc<ProgressCallback>>,
    ) -> AppResult<Vec<StageOutcome>> {
        let semaphore = Arc::new(Semaphore::new(w_proc));
        let transcoder = Arc::new(Transcoder::new(scratch_dir.to_path_buf()));
        let transcode_options = Arc::new(TranscodeOptions {
            aspect_ratio: request.aspect_ratio,
            normalize_loudness: request.normalize_loudness,
        });

        let tasks = picks.iter().cloned().zip(fetch_results.into_iter()).enumerate().map(
            |(i, (pick, fetch_result))| {
                let semaphore = semaphore.clone();
                let transcoder = transcoder.clone();
                let options = transcode_options.clone();
                let cancel = cancel.clone();
                let completed = completed.clone();
                let progress = progress.clone();

                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore open");
                    if cancel.load(Ordering::Relaxed) {
                        return (i, StageOutcome::MissingTokens(vec![pick.text().to_string()], "cancelled".to_string()));
                    }

                    let outcome = match (&pick, fetch_result) {
                        (SegmentPick::Placeholder { text, .. }, _) => {
                            match transcoder.render_placeholder(text, None, &options) {
                                Ok(path) => StageOutcome::Intermediate(path),
                                Err(e) => StageOutcome::MissingTokens(
                                    vec![text.clone()],
                                    format!("placeholder render failed for {text:?}: {e}"),
                                ),
                            }
                        }
                        (SegmentPick::Clip { start, end, text, .. }, Some(Ok(source))) => {
                            match transcoder.transcode(&source, *start, *end, &options) {
                                Ok(path) => StageOutcome::Intermediate(path),
                                Err(e) => StageOutcome::MissingTokens(
                                    vec![text.clone()],
                                    format!("transcode failed for {text:?}: {e}"),
                                ),
                            }
                        }
                        (SegmentPick::Clip { text, .. }, Some(Err(fetch_err))) => {
                            match transcoder.render_placeholder(text, None, &options) {
                                Ok(path) => StageOutcome::Intermediate(path),
                                Err(render_err) => StageOutcome::MissingTokens(
                                    vec![text.clone()],
                                    format!("fetch failed ({fetch_err}) and placeholder render failed ({render_err})"),
                                ),
                            }
                        }
                        (SegmentPick::Clip { .. }, None) => unreachable!("clip picks always produce a fetch result"),
                    };

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(cb) = &progress {
                        cb(done, total);
                    }

                    (i, outcome)
                }
            },
        );

        let mut results: Vec<Option<StageOutcome>> = (0..picks.len()).map(|_| None).collect();
        let mut stream = stream::iter(tasks).buffer_unordered(w_proc);
        while let Some((i, outcome)) = stream.next().await {
            results[i] = Some(outcome);
        }

        Ok(results.into_iter().map(|o| o.expect("every pick produces a stage outcome")).collect())
    }
}

fn job_id_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn intermediate_durations(picks: &[SegmentPick]) -> Vec<f64> {
    picks
        .iter()
        .map(|p| match p {
            SegmentPick::Clip { start, end, .. } => (end - start).max(0.0),
            SegmentPick::Placeholder { .. } => 1.0,
        })
        .collect()
}

/// Splits each pick's duration evenly across the words in its span to
/// produce a strictly non-decreasing `(start,end)` schedule whose union
/// equals `[0, outputDuration]` (spec.md §8).
fn build_word_timings(picks: &[SegmentPick], tokens: &[String], durations: &[f64]) -> Vec<WordTiming> {
    let mut timings = Vec::new();
    let mut cursor = 0.0;

    for (pick, duration) in picks.iter().zip(durations.iter()) {
        let (span_start, span_end) = pick.word_span();
        let word_count = (span_end - span_start).max(1);
        let per_word = duration / word_count as f64;

        for word_index in span_start..span_end {
            let start = cursor;
            let end = cursor + per_word;
            let word = tokens.get(word_index).cloned().unwrap_or_default();
            timings.push(WordTiming { word, start, end });
            cursor = end;
        }
    }

    timings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_timings_partition_output_duration() {
        let picks = vec![
            SegmentPick::Clip {
                video_id: "v1".to_string(),
                start: 0.0,
                end: 2.2,
                text: "hello world how are you".to_string(),
                word_span: (0, 5),
            },
        ];
        let tokens: Vec<String> = "hello world how are you".split(' ').map(str::to_string).collect();
        let durations = intermediate_durations(&picks);
        let timings = build_word_timings(&picks, &tokens, &durations);

        assert_eq!(timings.len(), 5);
        assert!((timings[0].start - 0.0).abs() < 1e-9);
        for w in timings.windows(2) {
            assert!(w[1].start >= w[0].end - 1e-9);
        }
        assert!((timings.last().unwrap().end - 2.2).abs() < 1e-6);
    }
}
