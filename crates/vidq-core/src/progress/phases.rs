//! Phase-weighted progress: a static table per pipeline shape and a pure mapping
//! from (phase, local fraction) to the job's overall fraction.

use serde::{Deserialize, Serialize};

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolving,
    DownloadingVideo,
    DownloadingAudio,
    Merging,
    Finalizing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::DownloadingVideo => "downloading_video",
            Stage::DownloadingAudio => "downloading_audio",
            Stage::Merging => "merging",
            Stage::Finalizing => "finalizing",
        }
    }

    /// Human-readable label, also written to the job description.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Resolving => "Resolving streams",
            Stage::DownloadingVideo => "Downloading video",
            Stage::DownloadingAudio => "Downloading audio",
            Stage::Merging => "Merging video and audio",
            Stage::Finalizing => "Finalizing",
        }
    }
}

/// Which set of phases a download goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineShape {
    /// Separate video and audio streams, then a mux step.
    Adaptive,
    /// A single stream carrying both video and audio.
    Progressive,
    AudioOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSpan {
    pub stage: Stage,
    pub start: f64,
    pub end: f64,
}

const fn span(stage: Stage, start: f64, end: f64) -> PhaseSpan {
    PhaseSpan { stage, start, end }
}

const ADAPTIVE: [PhaseSpan; 5] = [
    span(Stage::Resolving, 0.00, 0.05),
    span(Stage::DownloadingVideo, 0.05, 0.60),
    span(Stage::DownloadingAudio, 0.60, 0.90),
    span(Stage::Merging, 0.90, 0.96),
    span(Stage::Finalizing, 0.96, 1.00),
];

const PROGRESSIVE: [PhaseSpan; 3] = [
    span(Stage::Resolving, 0.00, 0.05),
    span(Stage::DownloadingVideo, 0.05, 0.90),
    span(Stage::Finalizing, 0.90, 1.00),
];

const AUDIO_ONLY: [PhaseSpan; 3] = [
    span(Stage::Resolving, 0.00, 0.05),
    span(Stage::DownloadingAudio, 0.05, 0.90),
    span(Stage::Finalizing, 0.90, 1.00),
];

impl PipelineShape {
    pub fn phases(self) -> &'static [PhaseSpan] {
        match self {
            PipelineShape::Adaptive => &ADAPTIVE,
            PipelineShape::Progressive => &PROGRESSIVE,
            PipelineShape::AudioOnly => &AUDIO_ONLY,
        }
    }

    pub fn span_of(self, stage: Stage) -> Option<PhaseSpan> {
        self.phases().iter().copied().find(|p| p.stage == stage)
    }
}

/// `start + local * (end - start)` for `stage` in `shape`; `local` is clamped to [0, 1].
/// Returns None if `shape` has no such phase.
pub fn global_fraction(shape: PipelineShape, stage: Stage, local: f64) -> Option<f64> {
    let span = shape.span_of(stage)?;
    let local = if local.is_nan() {
        0.0
    } else {
        local.clamp(0.0, 1.0)
    };
    Some(span.start + local * (span.end - span.start))
}
