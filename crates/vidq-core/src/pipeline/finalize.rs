//! Finalize step: move the file into the library, fetch the thumbnail, store chapters
//! and subtitles, and mark the artifact ready.

use std::path::{Path, PathBuf};

use crate::control::CancelToken;
use crate::ledger::{Artifact, DownloadPayload, JobId, SubtitleFile, ARTIFACT_READY};
use crate::retry::DownloadError;

use super::fetch::fetch_to_file;
use super::resolve::{ResolvedMedia, SubtitleTrack};
use super::select::StreamSelection;
use super::subtitles::srt_to_vtt;
use super::workdir::WorkDir;
use super::{join_error, Downloaded, DownloadPipeline, CATEGORY_THUMBNAIL};

fn ledger_error(e: anyhow::Error) -> DownloadError {
    DownloadError::pipeline(format!("ledger: {:#}", e))
}

/// Move `src` to `dest`, copying when a rename crosses filesystems.
async fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(src, dest).await?;
    tokio::fs::remove_file(src).await
}

impl DownloadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn finalize(
        &self,
        id: JobId,
        payload: &DownloadPayload,
        media: &ResolvedMedia,
        selection: &StreamSelection,
        file: &Downloaded,
        work: &WorkDir,
        token: &CancelToken,
    ) -> Result<Artifact, DownloadError> {
        let media_dir = &self.settings.media_dir;
        tokio::fs::create_dir_all(media_dir).await?;
        let dest = media_dir.join(format!("{}.{}", payload.content_id, file.ext));
        move_file(&file.path, &dest).await?;
        let file_size = tokio::fs::metadata(&dest).await?.len();

        let thumbnail_path = if payload.options.download_thumbnail {
            match &media.thumbnail_url {
                Some(url) => self.fetch_thumbnail(&payload.content_id, url, token).await,
                None => None,
            }
        } else {
            None
        };

        let artifact = Artifact {
            content_id: payload.content_id.clone(),
            title: media.title.clone(),
            source_url: payload.source_url.clone(),
            status: ARTIFACT_READY.to_string(),
            file_path: Some(dest.display().to_string()),
            file_size: Some(file_size as i64),
            format: Some(file.ext.clone()),
            height: selection.primary.height.map(i64::from),
            duration_secs: media.duration_secs,
            thumbnail_path: thumbnail_path.map(|p| p.display().to_string()),
            video_stream_id: (!selection.primary.is_audio_only()).then(|| selection.primary.id.clone()),
            audio_stream_id: selection
                .audio
                .as_ref()
                .or(selection.primary.is_audio_only().then_some(&selection.primary))
                .map(|s| s.id.clone()),
        };
        let ledger = self.coordinator.ledger();
        ledger.upsert_artifact(&artifact).await.map_err(ledger_error)?;

        if self.settings.auto_chapters && !media.chapters.is_empty() {
            ledger
                .replace_chapters(&payload.content_id, &media.chapters)
                .await
                .map_err(ledger_error)?;
        }
        if self.settings.auto_subtitles {
            self.store_subtitles(id, &payload.content_id, &media.subtitles, work, token)
                .await;
        }
        Ok(artifact)
    }

    /// Thumbnail failures are logged and ignored.
    async fn fetch_thumbnail(
        &self,
        content_id: &str,
        url: &str,
        token: &CancelToken,
    ) -> Option<PathBuf> {
        self.limiter.acquire(CATEGORY_THUMBNAIL).await;
        let dir = self.settings.media_dir.join("thumbnails");
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!("cannot create thumbnail dir: {}", e);
            return None;
        }
        let dest = dir.join(format!("{}.jpg", content_id));
        let result = self.fetch_small(url.to_string(), dest.clone(), "thumbnail", token).await;
        match result {
            Ok(_) => {
                self.limiter.success(CATEGORY_THUMBNAIL);
                Some(dest)
            }
            Err(e) => {
                self.limiter.error(CATEGORY_THUMBNAIL, e.message());
                tracing::warn!(content_id, "thumbnail download failed: {}", e);
                let _ = tokio::fs::remove_file(&dest).await;
                None
            }
        }
    }

    async fn fetch_small(
        &self,
        url: String,
        dest: PathBuf,
        what: &'static str,
        token: &CancelToken,
    ) -> Result<u64, DownloadError> {
        let opts = self.settings.fetch;
        let token = token.clone();
        tokio::task::spawn_blocking(move || {
            fetch_to_file(&url, &dest, what, &token, &opts, &mut |_, _| {})
        })
        .await
        .map_err(join_error)?
    }

    /// Fetch configured subtitle languages as WebVTT. Failures are logged and skipped.
    async fn store_subtitles(
        &self,
        id: JobId,
        content_id: &str,
        tracks: &[SubtitleTrack],
        work: &WorkDir,
        token: &CancelToken,
    ) {
        let dir = self.settings.media_dir.join("subtitles");
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(job_id = id, "cannot create subtitle dir: {}", e);
            return;
        }
        for lang in &self.settings.subtitle_langs {
            // Uploaded captions win over automatic ones.
            let Some(track) = tracks
                .iter()
                .filter(|t| &t.lang == lang)
                .min_by_key(|t| t.auto_generated)
            else {
                continue;
            };
            let raw = work.file(&format!("sub.{}.{}", lang, track.ext));
            if let Err(e) = self
                .fetch_small(track.url.clone(), raw.clone(), "subtitles", token)
                .await
            {
                tracing::warn!(job_id = id, lang = %lang, "subtitle download failed: {}", e);
                continue;
            }
            let dest = dir.join(format!("{}.{}.vtt", content_id, lang));
            let stored = async {
                let text = tokio::fs::read_to_string(&raw).await?;
                let vtt = if track.ext == "srt" { srt_to_vtt(&text) } else { text };
                tokio::fs::write(&dest, vtt).await
            }
            .await;
            if let Err(e) = stored {
                tracing::warn!(job_id = id, lang = %lang, "subtitle write failed: {}", e);
                continue;
            }
            let sub = SubtitleFile {
                lang: lang.clone(),
                file_path: dest.display().to_string(),
                auto_generated: track.auto_generated,
            };
            if let Err(e) = self.coordinator.ledger().upsert_subtitle(content_id, &sub).await {
                tracing::warn!(job_id = id, "failed to record subtitle: {:#}", e);
            }
        }
    }
}
