//! Stream resolution: content URL -> title, duration and the list of downloadable streams.
//!
//! The default resolver shells out to `yt-dlp --dump-single-json`. The call is
//! blocking; the pipeline runs it on the blocking pool.

use std::collections::BTreeMap;
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::ledger::Chapter;
use crate::retry::DownloadError;

/// One downloadable stream (yt-dlp "format").
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub id: String,
    pub url: String,
    pub ext: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
    /// Audio bitrate in kbit/s.
    pub abr: Option<f64>,
}

impl StreamInfo {
    /// Carries both video and audio.
    pub fn is_progressive(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleTrack {
    pub lang: String,
    pub ext: String,
    pub url: String,
    pub auto_generated: bool,
}

/// Everything the pipeline needs to know about one piece of content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedMedia {
    pub content_id: String,
    pub title: String,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub streams: Vec<StreamInfo>,
    pub chapters: Vec<Chapter>,
    pub subtitles: Vec<SubtitleTrack>,
}

/// Resolves a source URL. Blocking; errors are already classified.
pub trait StreamResolver: Send + Sync {
    fn resolve(&self, source_url: &str) -> Result<ResolvedMedia, DownloadError>;
}

/// `yt-dlp` subprocess resolver.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    program: String,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve(&self, source_url: &str) -> Result<ResolvedMedia, DownloadError> {
        tracing::debug!(url = source_url, "resolving via {}", self.program);
        let output = Command::new(&self.program)
            .args(["--dump-single-json", "--no-warnings", "--no-playlist", "--"])
            .arg(source_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                DownloadError::pipeline(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("resolver failed without output")
                .trim()
                .to_string();
            return Err(DownloadError::from_message(message));
        }
        parse_resolver_json(&output.stdout)
    }
}

#[derive(Deserialize)]
struct RawInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    #[serde(default)]
    chapters: Option<Vec<RawChapter>>,
    #[serde(default)]
    subtitles: Option<BTreeMap<String, Vec<RawSubtitle>>>,
    #[serde(default)]
    automatic_captions: Option<BTreeMap<String, Vec<RawSubtitle>>>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<u64>,
    #[serde(default)]
    abr: Option<f64>,
}

#[derive(Deserialize)]
struct RawChapter {
    #[serde(default)]
    title: Option<String>,
    start_time: f64,
    #[serde(default)]
    end_time: Option<f64>,
}

#[derive(Deserialize)]
struct RawSubtitle {
    #[serde(default)]
    ext: Option<String>,
    url: String,
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
}

fn subtitle_tracks(
    raw: Option<BTreeMap<String, Vec<RawSubtitle>>>,
    auto_generated: bool,
) -> Vec<SubtitleTrack> {
    let mut out = Vec::new();
    for (lang, variants) in raw.unwrap_or_default() {
        // Prefer formats we can store as WebVTT directly, then SRT.
        let pick = variants
            .iter()
            .find(|v| v.ext.as_deref() == Some("vtt"))
            .or_else(|| variants.iter().find(|v| v.ext.as_deref() == Some("srt")));
        if let Some(v) = pick {
            out.push(SubtitleTrack {
                lang: lang.clone(),
                ext: v.ext.clone().unwrap_or_default(),
                url: v.url.clone(),
                auto_generated,
            });
        }
    }
    out
}

/// Parse `yt-dlp --dump-single-json` output.
pub fn parse_resolver_json(data: &[u8]) -> Result<ResolvedMedia, DownloadError> {
    let raw: RawInfo = serde_json::from_slice(data)
        .map_err(|e| DownloadError::pipeline(format!("unreadable resolver output: {}", e)))?;

    let streams = raw
        .formats
        .into_iter()
        .filter_map(|f| {
            let url = f.url?;
            Some(StreamInfo {
                has_video: has_codec(&f.vcodec),
                has_audio: has_codec(&f.acodec),
                id: f.format_id,
                url,
                ext: f.ext.unwrap_or_else(|| "mp4".to_string()),
                height: f.height,
                filesize: f.filesize.or(f.filesize_approx),
                abr: f.abr,
            })
        })
        .filter(|s| s.has_video || s.has_audio)
        .collect();

    let chapters = raw
        .chapters
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, c)| Chapter {
            title: c.title.unwrap_or_else(|| format!("Chapter {}", i + 1)),
            start_secs: c.start_time,
            end_secs: c.end_time,
        })
        .collect();

    let mut subtitles = subtitle_tracks(raw.subtitles, false);
    subtitles.extend(subtitle_tracks(raw.automatic_captions, true));

    Ok(ResolvedMedia {
        title: raw.title.unwrap_or_else(|| raw.id.clone()),
        content_id: raw.id,
        duration_secs: raw.duration.filter(|d| d.is_finite() && *d > 0.0),
        thumbnail_url: raw.thumbnail,
        streams,
        chapters,
        subtitles,
    })
}
