use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Per-category pacing for the rate limiter (`[limiter]` in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Skip all pacing (acquire returns immediately).
    pub disabled: bool,
    /// Interval used for categories missing from `intervals`.
    pub default_interval_secs: f64,
    /// Upper bound for an escalated interval.
    pub max_backoff_secs: f64,
    /// A category is unhealthy if it saw a confirmed block within this window.
    pub health_window_secs: u64,
    /// Floor interval per category, in seconds.
    pub intervals: BTreeMap<String, f64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        let intervals = [
            ("feed", 0.5),
            ("resolve", 5.0),
            ("avatar", 3.0),
            ("channel_scan", 5.0),
            ("thumbnail", 1.0),
            ("download", 3.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            disabled: false,
            default_interval_secs: 1.0,
            max_backoff_secs: 120.0,
            health_window_secs: 600,
            intervals,
        }
    }
}

/// Global inter-job cooldown applied by the queue worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub base_secs: u64,
    /// Reaching this value pauses the queue until a manual resume.
    pub max_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_secs: 30,
            max_secs: 7200,
        }
    }
}

/// Retry schedule for throttled or temporarily failing downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed before a job is parked.
    pub max_retries: u32,
    /// Delay before each retry; the last entry repeats if retries outnumber it.
    pub schedule_secs: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            schedule_secs: vec![120, 300, 900],
        }
    }
}

/// Age-based sweep of finished job rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 48,
            sweep_interval_secs: 6 * 3600,
        }
    }
}

/// Queue worker timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep when no queued download exists.
    pub idle_poll_ms: u64,
    /// Sleep while the queue is paused or a blocking job is active.
    pub paused_poll_ms: u64,
    /// Sleep after an unexpected error inside the loop.
    pub error_backoff_ms: u64,
    /// How often the watchdog checks the worker loop.
    pub watchdog_interval_secs: u64,
    /// Minimum gap between byte-progress notifications.
    pub progress_emit_ms: u64,
    /// How long an exclusive start waits for other active jobs before proceeding.
    pub exclusive_idle_timeout_secs: u64,
    /// Poll interval while waiting for idle.
    pub exclusive_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 2000,
            paused_poll_ms: 3000,
            error_backoff_ms: 5000,
            watchdog_interval_secs: 30,
            progress_emit_ms: 400,
            exclusive_idle_timeout_secs: 300,
            exclusive_poll_ms: 3000,
        }
    }
}

/// Global configuration loaded from `~/.config/vidq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VidqConfig {
    /// Download jobs allowed to run at once.
    pub max_concurrent_downloads: usize,
    /// "best", "2160p", "1440p", "1080p", "720p", "480p", "360p".
    pub default_quality: String,
    /// Preferred container extension.
    pub default_format: String,
    /// Allow the adaptive (separate video + audio) path for high qualities.
    pub merge_audio: bool,
    pub download_thumbnail: bool,
    pub auto_chapters: bool,
    pub auto_subtitles: bool,
    pub subtitle_langs: Vec<String>,
    /// Library directory; defaults to `~/.local/share/vidq/media`.
    pub media_dir: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub resolver_path: String,
    pub limiter: LimiterConfig,
    pub cooldown: CooldownConfig,
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
    pub worker: WorkerConfig,
}

impl Default for VidqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            default_quality: "best".to_string(),
            default_format: "mp4".to_string(),
            merge_audio: true,
            download_thumbnail: true,
            auto_chapters: true,
            auto_subtitles: false,
            subtitle_langs: vec!["en".to_string()],
            media_dir: None,
            ffmpeg_path: "ffmpeg".to_string(),
            resolver_path: "yt-dlp".to_string(),
            limiter: LimiterConfig::default(),
            cooldown: CooldownConfig::default(),
            retry: RetryConfig::default(),
            retention: RetentionConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl VidqConfig {
    /// Configured media directory, or the XDG data default.
    pub fn resolved_media_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.media_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("vidq")?;
        Ok(xdg_dirs.get_data_home().join("media"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vidq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VidqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VidqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VidqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = VidqConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 2);
        assert_eq!(cfg.default_quality, "best");
        assert_eq!(cfg.cooldown.base_secs, 30);
        assert_eq!(cfg.cooldown.max_secs, 7200);
        assert_eq!(cfg.retry.schedule_secs, vec![120, 300, 900]);
        assert_eq!(cfg.limiter.intervals.get("resolve"), Some(&5.0));
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = VidqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: VidqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, cfg.max_concurrent_downloads);
        assert_eq!(parsed.limiter.intervals, cfg.limiter.intervals);
        assert_eq!(parsed.worker.progress_emit_ms, 400);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml = r#"
            max_concurrent_downloads = 4
            default_quality = "720p"

            [cooldown]
            base_secs = 10

            [limiter.intervals]
            resolve = 2.5
        "#;
        let cfg: VidqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_downloads, 4);
        assert_eq!(cfg.default_quality, "720p");
        assert_eq!(cfg.cooldown.base_secs, 10);
        assert_eq!(cfg.cooldown.max_secs, 7200);
        assert_eq!(cfg.limiter.intervals.get("resolve"), Some(&2.5));
        assert!(cfg.limiter.intervals.get("thumbnail").is_none());
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn explicit_media_dir_is_used() {
        let cfg = VidqConfig {
            media_dir: Some(PathBuf::from("/srv/videos")),
            ..VidqConfig::default()
        };
        assert_eq!(cfg.resolved_media_dir().unwrap(), PathBuf::from("/srv/videos"));
    }
}
