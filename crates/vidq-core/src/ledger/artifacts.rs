//! Library artifacts written by the finalize step: the video row, chapters and subtitles.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, Ledger};

/// Artifact status once every required file is in place.
pub const ARTIFACT_READY: &str = "ready";

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub content_id: String,
    pub title: String,
    pub source_url: String,
    pub status: String,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub format: Option<String>,
    pub height: Option<i64>,
    pub duration_secs: Option<f64>,
    pub thumbnail_path: Option<String>,
    pub video_stream_id: Option<String>,
    pub audio_stream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub start_secs: f64,
    pub end_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleFile {
    pub lang: String,
    pub file_path: String,
    pub auto_generated: bool,
}

impl Ledger {
    /// Insert or replace the artifact row for `content_id`.
    pub async fn upsert_artifact(&self, a: &Artifact) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO artifacts (
                content_id, title, source_url, status, file_path, file_size, format,
                height, duration_secs, thumbnail_path, video_stream_id, audio_stream_id, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(content_id) DO UPDATE SET
                title = excluded.title,
                source_url = excluded.source_url,
                status = excluded.status,
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                format = excluded.format,
                height = excluded.height,
                duration_secs = excluded.duration_secs,
                thumbnail_path = COALESCE(excluded.thumbnail_path, artifacts.thumbnail_path),
                video_stream_id = excluded.video_stream_id,
                audio_stream_id = excluded.audio_stream_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&a.content_id)
        .bind(&a.title)
        .bind(&a.source_url)
        .bind(&a.status)
        .bind(&a.file_path)
        .bind(a.file_size)
        .bind(&a.format)
        .bind(a.height)
        .bind(a.duration_secs)
        .bind(&a.thumbnail_path)
        .bind(&a.video_stream_id)
        .bind(&a.audio_stream_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_artifact(&self, content_id: &str) -> Result<Option<Artifact>> {
        let row = sqlx::query(
            r#"
            SELECT content_id, title, source_url, status, file_path, file_size, format,
                   height, duration_secs, thumbnail_path, video_stream_id, audio_stream_id
            FROM artifacts
            WHERE content_id = ?1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Artifact {
            content_id: row.get("content_id"),
            title: row.get("title"),
            source_url: row.get("source_url"),
            status: row.get("status"),
            file_path: row.get("file_path"),
            file_size: row.get("file_size"),
            format: row.get("format"),
            height: row.get("height"),
            duration_secs: row.get("duration_secs"),
            thumbnail_path: row.get("thumbnail_path"),
            video_stream_id: row.get("video_stream_id"),
            audio_stream_id: row.get("audio_stream_id"),
        }))
    }

    /// Replace all chapters of `content_id`.
    pub async fn replace_chapters(&self, content_id: &str, chapters: &[Chapter]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"DELETE FROM chapters WHERE content_id = ?1"#)
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        for (idx, ch) in chapters.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chapters (content_id, idx, title, start_secs, end_secs)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(content_id)
            .bind(idx as i64)
            .bind(&ch.title)
            .bind(ch.start_secs)
            .bind(ch.end_secs)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_chapters(&self, content_id: &str) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT title, start_secs, end_secs FROM chapters
            WHERE content_id = ?1
            ORDER BY idx ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Chapter {
                title: row.get("title"),
                start_secs: row.get("start_secs"),
                end_secs: row.get("end_secs"),
            })
            .collect())
    }

    pub async fn upsert_subtitle(&self, content_id: &str, sub: &SubtitleFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subtitles (content_id, lang, file_path, auto_generated)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(content_id, lang) DO UPDATE SET
                file_path = excluded.file_path,
                auto_generated = excluded.auto_generated
            "#,
        )
        .bind(content_id)
        .bind(&sub.lang)
        .bind(&sub.file_path)
        .bind(sub.auto_generated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_subtitles(&self, content_id: &str) -> Result<Vec<SubtitleFile>> {
        let rows = sqlx::query(
            r#"
            SELECT lang, file_path, auto_generated FROM subtitles
            WHERE content_id = ?1
            ORDER BY lang ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| SubtitleFile {
                lang: row.get("lang"),
                file_path: row.get("file_path"),
                auto_generated: row.get("auto_generated"),
            })
            .collect())
    }
}
