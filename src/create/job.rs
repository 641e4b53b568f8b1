use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const VALID_FRAME_COUNTS: &[u32] = &[150, 300, 450, 600];
pub const DEFAULT_FRAME_COUNT: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    #[default]
    Small,
    Large,
}

/// One logical generation request. Immutable once submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub prompt: String,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub size: SizeClass,
    #[serde(default = "default_frames")]
    pub n_frames: u32,
    /// Reference image guiding the generation
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub audio_caption: Option<String>,
    #[serde(default)]
    pub audio_transcript: Option<String>,
}

fn default_frames() -> u32 {
    DEFAULT_FRAME_COUNT
}

impl Job {
    pub fn new(prompt: String) -> Self {
        Self {
            prompt,
            orientation: Orientation::default(),
            size: SizeClass::default(),
            n_frames: DEFAULT_FRAME_COUNT,
            image: None,
            audio_caption: None,
            audio_transcript: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        if !VALID_FRAME_COUNTS.contains(&self.n_frames) {
            bail!(
                "frame count must be one of {:?}, got {}",
                VALID_FRAME_COUNTS,
                self.n_frames
            );
        }
        Ok(())
    }
}

/// Provisional identifier returned by the remote create call, paired with the
/// remaining-quota counter reported at creation time.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub videos_remaining: Option<u64>,
}

/// Load a batch job file: a JSON array of job objects.
pub fn load_batch_file(path: &Path) -> Result<Vec<Job>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    let jobs: Vec<Job> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing batch file {}", path.display()))?;
    if jobs.is_empty() {
        bail!("batch file {} contains no jobs", path.display());
    }
    for (index, job) in jobs.iter().enumerate() {
        job.validate()
            .with_context(|| format!("job {} in {}", index + 1, path.display()))?;
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_invalid_frame_count() {
        let mut job = Job::new("a fox".to_string());
        job.n_frames = 200;
        assert!(job.validate().is_err());
        job.n_frames = 300;
        assert!(job.validate().is_ok());
    }

    #[test]
    fn rejects_empty_prompt() {
        let job = Job::new("   ".to_string());
        assert!(job.validate().is_err());
    }

    #[test]
    fn batch_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{"prompt": "a fox", "orientation": "portrait", "n_frames": 300}},
                {{"prompt": "a crow", "size": "large"}}
            ]"#
        )
        .expect("write batch");

        let jobs = load_batch_file(file.path()).expect("load batch");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].orientation, Orientation::Portrait);
        assert_eq!(jobs[0].n_frames, 300);
        assert_eq!(jobs[1].size, SizeClass::Large);
        assert_eq!(jobs[1].n_frames, DEFAULT_FRAME_COUNT);
    }

    #[test]
    fn batch_file_with_bad_job_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"[{{"prompt": "a fox", "n_frames": 7}}]"#).expect("write batch");
        assert!(load_batch_file(file.path()).is_err());
    }
}
