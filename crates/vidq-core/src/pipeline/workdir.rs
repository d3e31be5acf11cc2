//! Per-job scratch directory under `<media_dir>/.partial`, removed on drop.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::ledger::JobId;

pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn create(media_dir: &Path, job_id: JobId) -> io::Result<Self> {
        let parent = media_dir.join(".partial");
        std::fs::create_dir_all(&parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(&parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let media = tempfile::tempdir().unwrap();
        let wd = WorkDir::create(media.path(), 42).unwrap();
        let path = wd.path().to_path_buf();
        assert!(path.starts_with(media.path().join(".partial")));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("job-42-"));
        std::fs::write(wd.file("video.mp4"), b"x").unwrap();
        drop(wd);
        assert!(!path.exists());
    }
}
