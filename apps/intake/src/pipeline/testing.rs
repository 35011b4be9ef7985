//! In-memory fakes for pipeline and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::extraction::{
    CvStructurer, HeuristicStructurer, ParsedCv, StructuringError, StructuringOutcome,
};
use crate::integrations::{
    CompletionHook, EmailError, Notifier, ObjectStorage, SheetError, SheetRow, SheetSink,
    StorageError,
};
use crate::intake::models::{FileInfo, Stage, SubmittedFields, UploadRecord};
use crate::llm_client::LlmError;
use crate::status::{MemoryStatusStore, StatusTracker, StoreError, UploadStatusStore};

/// Memory store that remembers every record written with `set` and every
/// committed stage change and progress value.
pub struct RecordingStore {
    inner: MemoryStatusStore,
    created: Mutex<Vec<UploadRecord>>,
    stages: Mutex<HashMap<String, Vec<Stage>>>,
    progress: Mutex<HashMap<String, Vec<u8>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStatusStore::new(Duration::from_secs(3600)),
            created: Mutex::new(Vec::new()),
            stages: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn created(&self) -> Vec<UploadRecord> {
        self.created.lock().unwrap().clone()
    }

    /// Stored (records, payloads).
    pub fn entry_counts(&self) -> (usize, usize) {
        self.inner.entry_counts()
    }

    pub fn committed_stages(&self, id: &str) -> Vec<Stage> {
        self.stages.lock().unwrap().get(id).cloned().unwrap_or_default()
    }

    pub fn progress_is_monotonic(&self, id: &str) -> bool {
        let progress = self.progress.lock().unwrap();
        progress
            .get(id)
            .map_or(true, |values| values.windows(2).all(|w| w[0] <= w[1]))
    }

    pub fn clear_history(&self) {
        self.stages.lock().unwrap().clear();
        self.progress.lock().unwrap().clear();
    }
}

#[async_trait]
impl UploadStatusStore for RecordingStore {
    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn set(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.inner.set(record).await?;
        self.created.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn compare_and_set(
        &self,
        expected: &UploadRecord,
        next: &UploadRecord,
    ) -> Result<bool, StoreError> {
        let swapped = self.inner.compare_and_set(expected, next).await?;
        if swapped {
            if expected.stage != next.stage {
                self.stages
                    .lock()
                    .unwrap()
                    .entry(next.id.clone())
                    .or_default()
                    .push(next.stage);
            }
            self.progress
                .lock()
                .unwrap()
                .entry(next.id.clone())
                .or_default()
                .push(next.progress);
        }
        Ok(swapped)
    }

    async fn put_payload(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.inner.put_payload(id, payload).await
    }

    async fn get_payload(&self, id: &str) -> Result<Option<Bytes>, StoreError> {
        self.inner.get_payload(id).await
    }
}

pub fn tracker_for(store: &Arc<RecordingStore>) -> StatusTracker {
    StatusTracker::new(store.clone())
}

pub fn submitted(name: &str, email: &str) -> SubmittedFields {
    SubmittedFields {
        name: Some(name.to_string()),
        email: Some(email.to_string()),
        phone: None,
    }
}

/// Writes a fresh `received` record named `cv.pdf` or `cv.txt` after its type.
pub async fn seed(store: &RecordingStore, id: &str, mime: &str, fields: SubmittedFields) {
    let name = if mime.contains("pdf") { "cv.pdf" } else { "cv.txt" };
    let record = UploadRecord::received(
        id.to_string(),
        FileInfo {
            name: name.to_string(),
            mime_type: mime.to_string(),
            size: 64,
        },
        fields,
    );
    store.set(&record).await.unwrap();
}

enum StubMode {
    Heuristic,
    Failing,
    SoftFailure(String),
}

pub struct StubStructurer {
    mode: StubMode,
    pub calls: AtomicU32,
}

impl StubStructurer {
    pub fn heuristic() -> Self {
        Self::with_mode(StubMode::Heuristic)
    }

    pub fn failing() -> Self {
        Self::with_mode(StubMode::Failing)
    }

    pub fn soft_failure(note: &str) -> Self {
        Self::with_mode(StubMode::SoftFailure(note.to_string()))
    }

    fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CvStructurer for StubStructurer {
    async fn structure(&self, text: &str) -> Result<StructuringOutcome, StructuringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            StubMode::Heuristic => HeuristicStructurer.structure(text).await,
            StubMode::Failing => Err(LlmError::Api {
                status: 401,
                message: "invalid api key".into(),
            }
            .into()),
            StubMode::SoftFailure(note) => Ok(StructuringOutcome {
                cv: ParsedCv::default(),
                soft_failure: Some(note.clone()),
            }),
        }
    }

    fn backend(&self) -> &'static str {
        "stub"
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub fail: AtomicBool,
    /// Never completes when set; used to exercise deadlines and cancellation.
    pub hang: AtomicBool,
    pub calls: AtomicU32,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(&self, _bytes: Bytes, filename: &str, _mime: &str) -> Result<String, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Upload("bucket unavailable".into()));
        }
        Ok(format!("https://storage.test/cvs/{filename}"))
    }
}

#[derive(Default)]
pub struct FakeSheets {
    pub fail: AtomicBool,
    /// Number of leading calls that fail before appends start succeeding.
    pub fail_first: AtomicU32,
    pub calls: AtomicU32,
    rows: Mutex<Vec<SheetRow>>,
}

impl FakeSheets {
    pub fn rows(&self) -> Vec<SheetRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetSink for FakeSheets {
    async fn append(&self, row: &SheetRow) -> Result<(), SheetError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) || call <= self.fail_first.load(Ordering::SeqCst) {
            return Err(SheetError::Api {
                status: 429,
                body: "quota exceeded".into(),
            });
        }
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    /// Rejects every message the way an unverified sender domain does.
    pub fail: AtomicBool,
    sent: Mutex<Vec<(String, String, String)>>,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_confirmation(
        &self,
        name: &str,
        email: &str,
        filename: &str,
    ) -> Result<(), EmailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmailError::Rejected {
                status: 422,
                body: "domain not verified".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((name.to_string(), email.to_string(), filename.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHook {
    seen: Mutex<Vec<(UploadRecord, Option<ParsedCv>)>>,
}

impl FakeHook {
    pub fn seen(&self) -> Vec<UploadRecord> {
        self.seen.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn cvs(&self) -> Vec<Option<ParsedCv>> {
        self.seen.lock().unwrap().iter().map(|(_, cv)| cv.clone()).collect()
    }
}

#[async_trait]
impl CompletionHook for FakeHook {
    async fn on_terminal(&self, record: &UploadRecord, cv: Option<&ParsedCv>) {
        self.seen.lock().unwrap().push((record.clone(), cv.cloned()));
    }
}
