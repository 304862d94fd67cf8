//! Transcoder (C4, spec.md §4.4): re-encodes a single source range, or
//! renders a placeholder card, to the fixed intermediate media profile
//! (spec.md §6).

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;

use crate::error::{AppError, AppResult};
use crate::model::AspectRatio;

const FRAME_RATE: i32 = 30;
const AUDIO_RATE: i32 = 48_000;
const LOUDNESS_TARGET_LUFS: f64 = -16.0;
const DEFAULT_PLACEHOLDER_DURATION: f64 = 1.0;

pub struct TranscodeOptions {
    pub aspect_ratio: AspectRatio,
    pub normalize_loudness: bool,
}

pub struct Transcoder {
    scratch_dir: PathBuf,
}

impl Transcoder {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }

    /// `transcode(sourceFile, inStart, inEnd) -> intermediateFile`
    pub fn transcode(
        &self,
        source_file: &Path,
        in_start: f64,
        in_end: f64,
        options: &TranscodeOptions,
    ) -> AppResult<PathBuf> {
        let (width, height) = options.aspect_ratio.dimensions();
        let out_path = self.scratch_dir.join(format!(
            "intermediate_{}.mp4",
            uuid::Uuid::new_v4()
        ));

        let source_uri = format!("file://{}", source_file.canonicalize()?.display());
        let audio_filter = if options.normalize_loudness {
            format!(
                "audioconvert ! loudnorm target-loudness={LOUDNESS_TARGET_LUFS} ! audioresample"
            )
        } else {
            "audioconvert ! audioresample".to_string()
        };

        let pipeline_str = format!(
            r#"
            uridecodebin uri="{source_uri}" name=demux
            demux. ! queue ! videoconvert ! videoscale ! videorate !
                video/x-raw,width={width},height={height},framerate={FRAME_RATE}/1,format=I420 !
                x264enc profile=high ! h264parse ! queue ! mux.
            demux. ! queue ! {audio_filter} !
                audio/x-raw,rate={AUDIO_RATE},channels=2 !
                fdkaacenc ! queue ! mux.
            mp4mux name=mux ! filesink location="{}"
            "#,
            out_path.to_string_lossy()
        );

        run_to_completion(&pipeline_str, Some((in_start, in_end)))?;
        Ok(out_path)
    }

    /// `renderPlaceholder(text, duration) -> intermediateFile`: a solid-color
    /// card with centered text and a silent audio track.
    pub fn render_placeholder(
        &self,
        text: &str,
        duration: Option<f64>,
        options: &TranscodeOptions,
    ) -> AppResult<PathBuf> {
        let duration = duration.unwrap_or(DEFAULT_PLACEHOLDER_DURATION);
        let (width, height) = options.aspect_ratio.dimensions();
        let card_path = self.scratch_dir.join(format!("card_{}.png", uuid::Uuid::new_v4()));
        render_card_image(text, width, height, &card_path)?;

        let out_path = self.scratch_dir.join(format!(
            "intermediate_{}.mp4",
            uuid::Uuid::new_v4()
        ));

        let pipeline_str = format!(
            r#"
            multifilesrc location="{}" ! decodebin ! imagefreeze ! videoconvert ! videoscale !
                video/x-raw,width={width},height={height},framerate={FRAME_RATE}/1,format=I420 !
                x264enc profile=high ! h264parse ! queue ! mux.
            audiotestsrc wave=silence num-buffers={} !
                audio/x-raw,rate={AUDIO_RATE},channels=2 !
                audioconvert ! fdkaacenc ! queue ! mux.
            mp4mux name=mux ! filesink location="{}"
            "#,
            card_path.to_string_lossy(),
            (duration * (AUDIO_RATE as f64 / 1024.0)).ceil() as u64,
            out_path.to_string_lossy()
        );

        run_to_completion(&pipeline_str, None)?;
        Ok(out_path)
    }
}

fn render_card_image(text: &str, width: u32, height: u32, path: &Path) -> AppResult<()> {
    use image::{Rgb, RgbImage};

    let mut img = RgbImage::from_pixel(width, height, Rgb([24, 24, 28]));
    draw_centered_caption(&mut img, text);
    img.save(path)
        .map_err(|e| AppError::Encoder(format!("placeholder card render failed: {e}")))?;
    Ok(())
}

/// A 5x7 bitmap-font caption stamp, scaled and centered. No font-rendering
/// crate is pulled in for this; the glyph table below is the whole font.
fn draw_centered_caption(img: &mut image::RgbImage, text: &str) {
    const GLYPH_COLS: u32 = 5;
    const GLYPH_ROWS: u32 = 7;
    const SPACING: u32 = 1;

    let (w, h) = img.dimensions();
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return;
    }

    let unscaled_width = chars.len() as u32 * (GLYPH_COLS + SPACING);
    let max_text_width = (w * 3) / 4;
    let scale = (max_text_width / unscaled_width.max(1)).clamp(1, 12);

    let text_width = unscaled_width * scale;
    let text_height = GLYPH_ROWS * scale;
    let x0 = w.saturating_sub(text_width) / 2;
    let y0 = h.saturating_sub(text_height) / 2;

    let fg = image::Rgb([235, 235, 240]);
    for (i, ch) in chars.iter().enumerate() {
        let glyph = glyph_bitmap(*ch);
        let gx0 = x0 + i as u32 * (GLYPH_COLS + SPACING) * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - col)) == 0 {
                    continue;
                }
                let px0 = gx0 + col * scale;
                let py0 = y0 + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (px, py) = (px0 + dx, py0 + dy);
                        if px < w && py < h {
                            img.put_pixel(px, py, fg);
                        }
                    }
                }
            }
        }
    }
}

/// 5-wide x 7-tall glyph rows, MSB-first within the low 5 bits. Covers
/// A-Z, 0-9, space and the punctuation that shows up in missing-word cards;
/// anything else renders blank rather than guessing a shape.
fn glyph_bitmap(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b11110, 0b10001, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10011, 0b10101, 0b10101, 0b10101, 0b11001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0, 0b00100],
        ',' => [0, 0, 0, 0, 0, 0b00100, 0b01000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        _ => [0, 0, 0, 0, 0, 0, 0],
    }
}

fn run_to_completion(pipeline_str: &str, trim: Option<(f64, f64)>) -> AppResult<()> {
    let pipeline = gst::parse::launch(pipeline_str)
        .map_err(|e| AppError::Encoder(format!("failed to build pipeline: {e}")))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| AppError::Encoder("parsed element was not a pipeline".to_string()))?;

    pipeline
        .set_state(gst::State::Paused)
        .map_err(|e| AppError::Encoder(e.to_string()))?;
    pipeline
        .state(gst::ClockTime::from_seconds(10))
        .0
        .map_err(|e| AppError::Encoder(format!("failed to preroll before seek: {e}")))?;

    if let Some((in_start, in_end)) = trim {
        let start_ns = gst::ClockTime::from_nseconds((in_start.max(0.0) * 1_000_000_000.0) as u64);
        let stop_ns = gst::ClockTime::from_nseconds((in_end.max(in_start) * 1_000_000_000.0) as u64);
        pipeline
            .seek(
                1.0,
                gst::Format::Time,
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::SeekType::Set,
                start_ns,
                gst::SeekType::Set,
                stop_ns,
            )
            .map_err(|e| AppError::Encoder(format!("seek to [{in_start},{in_end}] failed: {e}")))?;
    }

    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| AppError::Encoder(e.to_string()))?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| AppError::Encoder("pipeline has no bus".to_string()))?;

    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => break,
            MessageView::Error(err) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(AppError::TranscodeFailed(format!(
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
        .map_err(|e| AppError::Encoder(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_dimensions_match_profile() {
        assert_eq!(AspectRatio::Widescreen.dimensions(), (1280, 720));
        assert_eq!(AspectRatio::Portrait.dimensions(), (720, 1280));
        assert_eq!(AspectRatio::Square.dimensions(), (720, 720));
    }

    #[test]
    fn render_card_image_produces_expected_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        render_card_image("hello", 1280, 720, &path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 1280);
        assert_eq!(img.height(), 720);
    }

    #[test]
    fn caption_glyphs_vary_with_text() {
        let mut blank = image::RgbImage::from_pixel(200, 100, image::Rgb([24, 24, 28]));
        let mut lit = blank.clone();
        draw_centered_caption(&mut lit, "HI");
        assert_ne!(blank, lit);

        draw_centered_caption(&mut blank, "");
        // Empty text draws nothing.
        let untouched = image::RgbImage::from_pixel(200, 100, image::Rgb([24, 24, 28]));
        assert_eq!(blank, untouched);
    }

    #[test]
    fn glyph_bitmap_differs_between_distinct_letters() {
        assert_ne!(glyph_bitmap('A'), glyph_bitmap('B'));
        assert_eq!(glyph_bitmap('a'), glyph_bitmap('A'));
    }
}
