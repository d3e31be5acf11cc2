//! Stage-aware progress reporting for one pipeline run.
//!
//! Maps (stage, local fraction) to the job's overall fraction for the selected
//! pipeline shape and never lets it go backwards.

use serde_json::json;

use crate::coordinator::{Coordinator, ProgressReport};
use crate::ledger::{JobId, Metadata};
use crate::progress::{global_fraction, PipelineShape, Stage};

const MIB: f64 = 1024.0 * 1024.0;

pub(crate) fn byte_label(stage: Stage, done: u64, total: Option<u64>) -> String {
    match total {
        Some(t) if t > 0 => format!(
            "{} ({:.1} / {:.1} MiB)",
            stage.label(),
            done as f64 / MIB,
            t as f64 / MIB
        ),
        _ => format!("{} ({:.1} MiB)", stage.label(), done as f64 / MIB),
    }
}

pub(crate) struct StageReporter<'a> {
    coordinator: &'a Coordinator,
    job_id: JobId,
    content_id: String,
    shape: PipelineShape,
    last: f64,
}

impl<'a> StageReporter<'a> {
    pub(crate) fn new(coordinator: &'a Coordinator, job_id: JobId, content_id: &str) -> Self {
        Self {
            coordinator,
            job_id,
            content_id: content_id.to_string(),
            // Resolving has the same span in every shape.
            shape: PipelineShape::Progressive,
            last: 0.0,
        }
    }

    pub(crate) fn set_shape(&mut self, shape: PipelineShape) {
        self.shape = shape;
    }

    pub(crate) fn fraction(&self) -> f64 {
        self.last
    }

    /// Phase transition: always emitted.
    pub(crate) async fn enter(&mut self, stage: Stage) {
        tracing::debug!(job_id = self.job_id, stage = stage.as_str(), "stage");
        self.report(stage, 0.0, stage.label().to_string(), None).await;
    }

    pub(crate) async fn bytes(&mut self, stage: Stage, done: u64, total: Option<u64>) {
        let local = match total {
            Some(t) if t > 0 => done as f64 / t as f64,
            _ => 0.0,
        };
        self.report(stage, local, byte_label(stage, done, total), Some((done, total)))
            .await;
    }

    pub(crate) async fn local(&mut self, stage: Stage, local: f64, label: String) {
        self.report(stage, local, label, None).await;
    }

    async fn report(
        &mut self,
        stage: Stage,
        local: f64,
        label: String,
        bytes: Option<(u64, Option<u64>)>,
    ) {
        let global = global_fraction(self.shape, stage, local).unwrap_or(self.last);
        self.last = global.max(self.last);

        let mut patch = Metadata::new();
        if let Some((done, total)) = bytes {
            patch.insert("bytes_done".into(), json!(done));
            patch.insert("bytes_total".into(), json!(total));
        }
        let report = ProgressReport {
            fraction: self.last,
            label: Some(label),
            stage: Some(stage),
            content_id: Some(self.content_id.clone()),
            bytes_done: bytes.map(|b| b.0),
            bytes_total: bytes.and_then(|b| b.1),
            patch,
        };
        if let Err(e) = self.coordinator.progress(self.job_id, report).await {
            tracing::warn!(job_id = self.job_id, "failed to record progress: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_labels() {
        assert_eq!(
            byte_label(Stage::DownloadingVideo, 1024 * 1024, Some(4 * 1024 * 1024)),
            "Downloading video (1.0 / 4.0 MiB)"
        );
        assert_eq!(
            byte_label(Stage::DownloadingAudio, 512 * 1024, None),
            "Downloading audio (0.5 MiB)"
        );
    }
}
