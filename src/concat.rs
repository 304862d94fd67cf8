//! Concatenator (C5, spec.md §4.5): joins transcoded intermediates,
//! identical in container/codec/pixel-format/frame-rate by construction
//! (spec.md §4.4), into a single output file.

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;

use crate::error::{AppError, AppResult};

/// Above this many intermediates, fold incrementally instead of wiring every
/// input into one concat graph (spec.md §4.5: "Default when len > 50").
const DEFAULT_INCREMENTAL_THRESHOLD: usize = 50;

pub struct Concatenator {
    scratch_dir: PathBuf,
    incremental_threshold: usize,
}

pub struct ConcatResult {
    pub output_path: PathBuf,
    pub total_duration: f64,
}

impl Concatenator {
    pub fn new(scratch_dir: PathBuf, incremental_threshold: usize) -> Self {
        Self {
            scratch_dir,
            incremental_threshold: incremental_threshold.max(1),
        }
    }

    pub fn with_default_threshold(scratch_dir: PathBuf) -> Self {
        Self::new(scratch_dir, DEFAULT_INCREMENTAL_THRESHOLD)
    }

    /// `concatenate(intermediates[], outputPath)`
    pub fn concatenate(&self, intermediates: &[PathBuf], output_path: &Path) -> AppResult<ConcatResult> {
        if intermediates.is_empty() {
            return Err(AppError::ConcatFailed("no intermediates to concatenate".to_string()));
        }

        if intermediates.len() == 1 {
            std::fs::copy(&intermediates[0], output_path)?;
            let total_duration = probe_duration(&intermediates[0])?;
            return Ok(ConcatResult { output_path: output_path.to_path_buf(), total_duration });
        }

        if intermediates.len() > self.incremental_threshold {
            self.concatenate_incremental(intermediates, output_path)
        } else {
            self.concatenate_batch(intermediates, output_path)
        }
    }

    /// Batch mode: wire every intermediate's decoded streams into a single
    /// pair of `concat` elements and stream-copy out (spec.md §4.5).
    fn concatenate_batch(&self, intermediates: &[PathBuf], output_path: &Path) -> AppResult<ConcatResult> {
        let pipeline = gst::Pipeline::new();

        let video_concat = make(&pipeline, "concat", "video_concat")?;
        let audio_concat = make(&pipeline, "concat", "audio_concat")?;
        let video_convert = make(&pipeline, "videoconvert", "video_convert_out")?;
        let video_encoder = make(&pipeline, "x264enc", "video_encoder_out")?;
        let video_queue = make(&pipeline, "queue", "video_queue_out")?;
        let audio_convert = make(&pipeline, "audioconvert", "audio_convert_out")?;
        let audio_encoder = gst::ElementFactory::make("fdkaacenc")
            .name("audio_encoder_out")
            .build()
            .or_else(|_| gst::ElementFactory::make("voaacenc").name("audio_encoder_out").build())
            .map_err(|e| AppError::ConcatFailed(format!("no AAC encoder available: {e}")))?;
        pipeline
            .add(&audio_encoder)
            .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
        let audio_queue = make(&pipeline, "queue", "audio_queue_out")?;
        let parser = make(&pipeline, "h264parse", "out_parser")?;
        let muxer = make(&pipeline, "mp4mux", "mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .name("sink")
            .property("location", output_path.to_string_lossy().to_string())
            .build()
            .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
        pipeline
            .add(&filesink)
            .map_err(|e| AppError::ConcatFailed(e.to_string()))?;

        link_chain(&[&video_concat, &video_convert, &video_encoder, &video_queue, &parser])?;
        parser
            .link_pads(Some("src"), &muxer, Some("video_%u"))
            .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
        link_chain(&[&audio_concat, &audio_convert, &audio_encoder, &audio_queue])?;
        audio_queue
            .link_pads(Some("src"), &muxer, Some("audio_%u"))
            .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
        muxer.link(&filesink).map_err(|e| AppError::ConcatFailed(e.to_string()))?;

        for (i, intermediate) in intermediates.iter().enumerate() {
            let uri = format!("file://{}", intermediate.canonicalize()?.display());
            let decodebin = gst::ElementFactory::make("uridecodebin")
                .name(format!("decoder_{i}"))
                .property("uri", &uri)
                .build()
                .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
            pipeline
                .add(&decodebin)
                .map_err(|e| AppError::ConcatFailed(e.to_string()))?;

            let video_concat_weak = video_concat.downgrade();
            let audio_concat_weak = audio_concat.downgrade();
            decodebin.connect_pad_added(move |_elem, pad| {
                let Some(caps) = pad.current_caps().or_else(|| Some(pad.query_caps(None))) else {
                    return;
                };
                let Some(structure) = caps.structure(0) else { return };
                let name = structure.name();
                if name.starts_with("video/") {
                    if let Some(concat) = video_concat_weak.upgrade() {
                        if let Some(sink) = concat.request_pad_simple("sink_%u") {
                            let _ = pad.link(&sink);
                        }
                    }
                } else if name.starts_with("audio/") {
                    if let Some(concat) = audio_concat_weak.upgrade() {
                        if let Some(sink) = concat.request_pad_simple("sink_%u") {
                            let _ = pad.link(&sink);
                        }
                    }
                }
            });
        }

        run_until_eos(&pipeline)?;

        let total_duration = intermediates
            .iter()
            .map(|p| probe_duration(p))
            .collect::<AppResult<Vec<_>>>()?
            .into_iter()
            .sum();

        Ok(ConcatResult { output_path: output_path.to_path_buf(), total_duration })
    }

    /// Incremental mode: fold-left, joining the running output with the
    /// next intermediate one pair at a time to bound peak memory usage.
    fn concatenate_incremental(&self, intermediates: &[PathBuf], output_path: &Path) -> AppResult<ConcatResult> {
        let mut running = intermediates[0].clone();
        let mut scratch_index = 0usize;

        for next in &intermediates[1..] {
            let dest = if scratch_index == intermediates.len() - 2 {
                output_path.to_path_buf()
            } else {
                self.scratch_dir.join(format!("fold_{scratch_index}.mp4"))
            };
            self.concatenate_batch(&[running.clone(), next.clone()], &dest)?;
            running = dest;
            scratch_index += 1;
        }

        let total_duration = intermediates
            .iter()
            .map(|p| probe_duration(p))
            .collect::<AppResult<Vec<_>>>()?
            .into_iter()
            .sum();

        Ok(ConcatResult { output_path: output_path.to_path_buf(), total_duration })
    }
}

fn make(pipeline: &gst::Pipeline, factory: &str, name: &str) -> AppResult<gst::Element> {
    let element = gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| AppError::ConcatFailed(format!("{factory}: {e}")))?;
    pipeline
        .add(&element)
        .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
    Ok(element)
}

fn link_chain(elements: &[&gst::Element]) -> AppResult<()> {
    gst::Element::link_many(elements.iter().copied())
        .map_err(|e| AppError::ConcatFailed(e.to_string()))
}

fn run_until_eos(pipeline: &gst::Pipeline) -> AppResult<()> {
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| AppError::ConcatFailed(e.to_string()))?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| AppError::ConcatFailed("pipeline has no bus".to_string()))?;

    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => break,
            MessageView::Error(err) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(AppError::ConcatFailed(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().unwrap_or_default()
                )));
            }
            _ => {}
        }
    }

    pipeline
        .set_state(gst::State::Null)
        .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
    Ok(())
}

fn probe_duration(path: &Path) -> AppResult<f64> {
    let uri = format!("file://{}", path.canonicalize()?.display());
    let discoverer = gstreamer_pbutils::Discoverer::new(gst::ClockTime::from_seconds(10))
        .map_err(|e| AppError::ConcatFailed(e.to_string()))?;
    let info = discoverer
        .discover_uri(&uri)
        .map_err(|e| AppError::ConcatFailed(format!("probe failed for {path:?}: {e}")))?;
    Ok(info.duration().map(|d| d.seconds_f64()).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_intermediate_list() {
        let concatenator = Concatenator::with_default_threshold(std::env::temp_dir());
        let result = concatenator.concatenate(&[], Path::new("/tmp/out.mp4"));
        assert!(matches!(result, Err(AppError::ConcatFailed(_))));
    }

    #[test]
    fn picks_incremental_mode_above_threshold() {
        let concatenator = Concatenator::new(std::env::temp_dir(), 2);
        assert_eq!(concatenator.incremental_threshold, 2);
    }
}
