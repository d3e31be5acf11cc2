//! Stream selection: which stream(s) to fetch and whether a mux step is needed.

use crate::ledger::DownloadOptions;
use crate::progress::PipelineShape;
use crate::retry::DownloadError;

use super::resolve::{ResolvedMedia, StreamInfo};

/// Qualities for which a higher-resolution adaptive video beats a progressive stream.
const HIGH_QUALITIES: [&str; 4] = ["best", "1080p", "1440p", "2160p"];
const FALLBACK_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    /// Fetched in the first download phase (video, or audio for audio-only).
    pub primary: StreamInfo,
    /// Separate audio track to mux with `primary`.
    pub audio: Option<StreamInfo>,
    pub shape: PipelineShape,
}

impl StreamSelection {
    pub fn needs_mux(&self) -> bool {
        self.audio.is_some()
    }
}

fn wants_audio_only(opts: &DownloadOptions) -> bool {
    opts.audio_only || opts.quality == "audio_only"
}

/// Target height for a quality label; None means unbounded ("best").
fn target_height(quality: &str) -> Option<u32> {
    if quality == "best" {
        return None;
    }
    let h = quality
        .strip_suffix('p')
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(FALLBACK_HEIGHT);
    Some(h)
}

fn height(s: &StreamInfo) -> u32 {
    s.height.unwrap_or(0)
}

/// Highest stream at or below `target`, preferring `ext` at equal height.
fn best_video<'a>(
    candidates: impl Iterator<Item = &'a StreamInfo>,
    target: Option<u32>,
    ext: &str,
) -> Option<&'a StreamInfo> {
    candidates
        .filter(|s| target.map_or(true, |t| height(s) <= t))
        .max_by_key(|s| (height(s), s.ext == ext))
}

fn preferred_audio_ext(format: &str) -> &'static str {
    match format {
        "webm" => "webm",
        _ => "m4a",
    }
}

/// Best audio-only stream by bitrate, preferring the container that muxes cleanly into `format`.
fn best_audio<'a>(media: &'a ResolvedMedia, format: &str) -> Option<&'a StreamInfo> {
    let ext = preferred_audio_ext(format);
    media
        .streams
        .iter()
        .filter(|s| s.is_audio_only())
        .max_by(|a, b| {
            (a.ext == ext)
                .cmp(&(b.ext == ext))
                .then(a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
        })
}

fn by_id<'a>(media: &'a ResolvedMedia, id: &str) -> Result<&'a StreamInfo, DownloadError> {
    media
        .streams
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| DownloadError::pipeline(format!("requested stream {} is not available", id)))
}

fn no_stream(media: &ResolvedMedia) -> DownloadError {
    DownloadError::pipeline(format!("no suitable stream for {}", media.content_id))
}

pub fn select_streams(
    media: &ResolvedMedia,
    opts: &DownloadOptions,
) -> Result<StreamSelection, DownloadError> {
    if wants_audio_only(opts) {
        let audio = match &opts.audio_stream_id {
            Some(id) => by_id(media, id)?,
            None => best_audio(media, &opts.format)
                .or_else(|| media.streams.iter().find(|s| s.has_audio))
                .ok_or_else(|| no_stream(media))?,
        };
        return Ok(StreamSelection {
            primary: audio.clone(),
            audio: None,
            shape: PipelineShape::AudioOnly,
        });
    }

    if let Some(id) = &opts.stream_id {
        let chosen = by_id(media, id)?;
        if chosen.is_progressive() || !chosen.has_video {
            return Ok(StreamSelection {
                primary: chosen.clone(),
                audio: None,
                shape: PipelineShape::Progressive,
            });
        }
        let audio = match &opts.audio_stream_id {
            Some(aid) => Some(by_id(media, aid)?),
            None if opts.merge_audio => best_audio(media, &opts.format),
            None => None,
        };
        return Ok(StreamSelection {
            primary: chosen.clone(),
            shape: if audio.is_some() {
                PipelineShape::Adaptive
            } else {
                PipelineShape::Progressive
            },
            audio: audio.cloned(),
        });
    }

    let target = target_height(&opts.quality);
    let progressive = best_video(
        media.streams.iter().filter(|s| s.is_progressive()),
        target,
        &opts.format,
    )
    .or_else(|| best_video(media.streams.iter().filter(|s| s.is_progressive()), None, &opts.format));

    if opts.merge_audio && HIGH_QUALITIES.contains(&opts.quality.as_str()) {
        let adaptive = best_video(
            media.streams.iter().filter(|s| s.is_video_only()),
            target,
            &opts.format,
        );
        if let (Some(video), Some(audio)) = (adaptive, best_audio(media, &opts.format)) {
            if progressive.map_or(true, |p| height(video) > height(p)) {
                return Ok(StreamSelection {
                    primary: video.clone(),
                    audio: Some(audio.clone()),
                    shape: PipelineShape::Adaptive,
                });
            }
        }
    }

    let primary = progressive.ok_or_else(|| no_stream(media))?;
    Ok(StreamSelection {
        primary: primary.clone(),
        audio: None,
        shape: PipelineShape::Progressive,
    })
}
