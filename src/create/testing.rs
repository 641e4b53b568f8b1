//! Scripted service used by poll, download and pipeline tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::api::{CreatePayload, CreateResponse, CreditBalance, Draft, PendingEntry};
use super::job::Job;
use super::service::{Service, ServiceError};

pub fn draft_with_url(id: &str, task_id: Option<&str>, url: &str) -> Draft {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "task_id": task_id,
        "downloadable_url": url,
    }))
    .expect("draft")
}

pub fn job(prompt: &str) -> Job {
    Job::new(prompt.to_string())
}

#[derive(Default)]
pub struct FakeService {
    create_results: Mutex<VecDeque<Result<CreateResponse, ServiceError>>>,
    pending_plan: Mutex<VecDeque<Vec<PendingEntry>>>,
    draft_plan: Mutex<VecDeque<Vec<Draft>>>,
    last_drafts: Mutex<Vec<Draft>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<PathBuf>>,
    report_content_length: AtomicBool,
    fail_upload: AtomicBool,
    fetch_count: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Self {
        let service = Self::default();
        service.report_content_length.store(true, Ordering::Relaxed);
        service
    }

    pub fn push_create_ok(&self, id: &str, videos_remaining: Option<u64>) {
        self.create_results
            .lock()
            .unwrap()
            .push_back(Ok(CreateResponse {
                id: id.to_string(),
                rate_limit_and_credit_balance: Some(CreditBalance {
                    estimated_num_videos_remaining: videos_remaining,
                }),
            }));
    }

    pub fn push_create_status(&self, status: u16) {
        self.create_results
            .lock()
            .unwrap()
            .push_back(Err(ServiceError::Status {
                status,
                body: "scripted failure".to_string(),
            }));
    }

    pub fn push_pending(&self, entries: Vec<PendingEntry>) {
        self.pending_plan.lock().unwrap().push_back(entries);
    }

    pub fn push_drafts(&self, drafts: Vec<Draft>) {
        self.draft_plan.lock().unwrap().push_back(drafts);
    }

    pub fn add_file(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn set_report_content_length(&self, enabled: bool) {
        self.report_content_length.store(enabled, Ordering::Relaxed);
    }

    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Service for FakeService {
    async fn create_task(&self, _payload: &CreatePayload) -> Result<CreateResponse, ServiceError> {
        self.create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ServiceError::Status {
                    status: 500,
                    body: "unplanned create call".to_string(),
                })
            })
    }

    async fn pending(&self) -> Result<Vec<PendingEntry>, ServiceError> {
        Ok(self
            .pending_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn drafts(&self, _limit: usize) -> Result<Vec<Draft>, ServiceError> {
        let mut plan = self.draft_plan.lock().unwrap();
        match plan.pop_front() {
            Some(drafts) => {
                *self.last_drafts.lock().unwrap() = drafts.clone();
                Ok(drafts)
            }
            None => Ok(self.last_drafts.lock().unwrap().clone()),
        }
    }

    async fn upload_media(&self, path: &Path) -> Result<String, ServiceError> {
        if self.fail_upload.load(Ordering::Relaxed) {
            return Err(ServiceError::Status {
                status: 422,
                body: "scripted upload failure".to_string(),
            });
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(path.to_path_buf());
        Ok(format!("file-{}", uploads.len()))
    }

    async fn content_length(&self, url: &str) -> Result<Option<u64>, ServiceError> {
        if !self.report_content_length.load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(url)
            .map(|bytes| bytes.len() as u64))
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, ServiceError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        self.files
            .lock()
            .unwrap()
            .get(url)
            .map(|bytes| Bytes::from(bytes.clone()))
            .ok_or(ServiceError::Status {
                status: 404,
                body: format!("no scripted file for {url}"),
            })
    }
}
