//! Mux step: combine a video-only and an audio-only file into one container.
//!
//! The ffmpeg muxer copies video, re-encodes audio to AAC and reports progress
//! through `-progress pipe:1`. Progress is elapsed media time over the known
//! duration, or a fixed midpoint when the duration is unknown.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::control::CancelToken;
use crate::retry::DownloadError;

/// Local merge fraction reported while the total duration is unknown.
pub const UNKNOWN_DURATION_FRACTION: f64 = 0.5;

pub trait Muxer: Send + Sync {
    /// Blocking. `on_progress` receives the local fraction of the merge phase.
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        duration_secs: Option<f64>,
        token: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: String,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

pub fn build_merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-loglevel".into(),
        "error".into(),
    ];
    args.extend(["-i".into(), video.display().to_string()]);
    args.extend(["-i".into(), audio.display().to_string()]);
    args.extend(["-c:v".into(), "copy".into(), "-c:a".into(), "aac".into()]);
    args.extend(["-movflags".into(), "+faststart".into()]);
    args.push(output.display().to_string());
    args
}

fn parse_clock(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec)
}

/// Elapsed media seconds from one line of ffmpeg progress or log output.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let line = line.trim();
    if let Some(v) = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))
    {
        // ffmpeg reports microseconds under both keys.
        return v.parse::<i64>().ok().filter(|us| *us >= 0).map(|us| us as f64 / 1e6);
    }
    if let Some(v) = line.strip_prefix("out_time=") {
        return parse_clock(v);
    }
    let idx = line.find("time=")?;
    let rest = &line[idx + "time=".len()..];
    parse_clock(rest.split_whitespace().next()?)
}

/// Local merge fraction for `elapsed` media seconds.
pub fn merge_fraction(elapsed_secs: f64, duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(d) if d > 0.0 => (elapsed_secs / d).clamp(0.0, 1.0),
        _ => UNKNOWN_DURATION_FRACTION,
    }
}

impl Muxer for FfmpegMuxer {
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        duration_secs: Option<f64>,
        token: &CancelToken,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), DownloadError> {
        token.check()?;
        let mut child = Command::new(&self.program)
            .args(build_merge_args(video, audio, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::pipeline(format!("failed to run {}: {}", self.program, e)))?;

        let stderr_reader = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = err.read_to_string(&mut text);
                text
            })
        });

        if duration_secs.is_none() {
            on_progress(UNKNOWN_DURATION_FRACTION);
        }
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                if token.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DownloadError::Cancelled);
                }
                let Ok(line) = line else { break };
                if let Some(elapsed) = parse_progress_line(&line) {
                    if duration_secs.is_some() {
                        on_progress(merge_fraction(elapsed, duration_secs));
                    }
                }
            }
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        token.check()?;
        if !status.success() {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            tracing::warn!(?status, "ffmpeg merge failed: {}", detail);
            return Err(DownloadError::pipeline(format!(
                "ffmpeg exited with {}{}",
                status,
                if detail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", detail)
                }
            )));
        }
        on_progress(1.0);
        Ok(())
    }
}
