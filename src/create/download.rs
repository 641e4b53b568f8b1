use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::api::Draft;
use super::service::Service;
use crate::common::progress::create_spinner;
use crate::ui::prelude::{Level, emit};

/// A locally written artifact. Byte size doubles as the deduplication key.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Saved(DownloadRecord),
    /// The resolved content length matched an artifact already on disk.
    DuplicateSkipped { bytes: u64 },
}

/// Fetches correlated drafts through the run's egress point and skips drafts
/// whose size matches something already in the output directory.
pub struct Downloader {
    out_dir: PathBuf,
    seen_sizes: HashSet<u64>,
}

impl Downloader {
    pub fn new(out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;

        let mut seen_sizes = HashSet::new();
        for entry in fs::read_dir(out_dir)
            .with_context(|| format!("scanning output directory {}", out_dir.display()))?
        {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                seen_sizes.insert(meta.len());
            }
        }

        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            seen_sizes,
        })
    }

    pub async fn download(
        &mut self,
        service: &dyn Service,
        draft: &Draft,
    ) -> Result<DownloadOutcome> {
        let url = draft
            .download_url()
            .with_context(|| format!("draft {} has no download URL", draft.id))?;

        // Duplicate probe before pulling the bytes; servers that omit
        // content-length fall through to the post-fetch check.
        let expected = service.content_length(url).await.ok().flatten();
        if let Some(length) = expected {
            if self.seen_sizes.contains(&length) {
                return Ok(DownloadOutcome::DuplicateSkipped { bytes: length });
            }
        }

        let spinner = create_spinner(format!("Downloading draft {}...", draft.id));
        let result = service.fetch(url).await;
        spinner.finish_and_clear();
        let bytes = result.with_context(|| format!("downloading draft {}", draft.id))?;
        let length = bytes.len() as u64;

        if let Some(expected) = expected {
            if expected != length {
                emit(
                    Level::Warn,
                    "create.download.length",
                    &format!(
                        "Draft {}: downloaded {length} bytes but remote reported {expected}",
                        draft.id
                    ),
                    None,
                );
            }
        }

        if self.seen_sizes.contains(&length) {
            return Ok(DownloadOutcome::DuplicateSkipped { bytes: length });
        }

        let path = self.artifact_path();
        fs::write(&path, &bytes)
            .with_context(|| format!("writing artifact to {}", path.display()))?;
        self.seen_sizes.insert(length);

        Ok(DownloadOutcome::Saved(DownloadRecord {
            path,
            bytes: length,
        }))
    }

    fn artifact_path(&self) -> PathBuf {
        let mut stamp = Utc::now().timestamp_millis();
        loop {
            let path = self.out_dir.join(format!("vidgen_{stamp}.mp4"));
            if !path.exists() {
                return path;
            }
            stamp += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::testing::{FakeService, draft_with_url};

    #[tokio::test]
    async fn saves_artifact_and_indexes_its_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.add_file("https://cdn/a.mp4", vec![1u8; 64]);

        let mut downloader = Downloader::new(dir.path()).expect("downloader");
        let outcome = downloader
            .download(&service, &draft_with_url("g1", None, "https://cdn/a.mp4"))
            .await
            .expect("download");

        match outcome {
            DownloadOutcome::Saved(record) => {
                assert_eq!(record.bytes, 64);
                assert!(record.path.exists());
            }
            other => panic!("expected Saved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn head_probe_skips_known_sizes_before_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("vidgen_1.mp4"), vec![0u8; 128]).expect("seed");

        let service = FakeService::new();
        service.add_file("https://cdn/b.mp4", vec![2u8; 128]);

        let mut downloader = Downloader::new(dir.path()).expect("downloader");
        let outcome = downloader
            .download(&service, &draft_with_url("g2", None, "https://cdn/b.mp4"))
            .await
            .expect("download");

        assert!(matches!(
            outcome,
            DownloadOutcome::DuplicateSkipped { bytes: 128 }
        ));
        assert_eq!(service.fetch_count(), 0);
    }

    #[tokio::test]
    async fn post_fetch_check_catches_duplicates_without_content_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("vidgen_1.mp4"), vec![0u8; 256]).expect("seed");

        let service = FakeService::new();
        service.set_report_content_length(false);
        service.add_file("https://cdn/c.mp4", vec![3u8; 256]);

        let mut downloader = Downloader::new(dir.path()).expect("downloader");
        let outcome = downloader
            .download(&service, &draft_with_url("g3", None, "https://cdn/c.mp4"))
            .await
            .expect("download");

        assert!(matches!(
            outcome,
            DownloadOutcome::DuplicateSkipped { bytes: 256 }
        ));
        assert_eq!(service.fetch_count(), 1);
        // Nothing new written
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn equal_lengths_within_a_run_produce_one_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = FakeService::new();
        service.add_file("https://cdn/d.mp4", vec![4u8; 32]);
        service.add_file("https://cdn/e.mp4", vec![5u8; 32]);

        let mut downloader = Downloader::new(dir.path()).expect("downloader");
        let first = downloader
            .download(&service, &draft_with_url("g4", None, "https://cdn/d.mp4"))
            .await
            .expect("download");
        let second = downloader
            .download(&service, &draft_with_url("g5", None, "https://cdn/e.mp4"))
            .await
            .expect("download");

        assert!(matches!(first, DownloadOutcome::Saved(_)));
        assert!(matches!(
            second,
            DownloadOutcome::DuplicateSkipped { bytes: 32 }
        ));
    }
}
