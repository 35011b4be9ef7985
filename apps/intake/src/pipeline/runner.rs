//! The processing pipeline for one upload.
//!
//! Stages run strictly in order: text extraction (plus structuring), object
//! storage, spreadsheet append, confirmation email. The record is moved into
//! each stage before its work starts, so a poller always sees where a run is.
//! Storage and email failures degrade to warnings; extraction, structuring
//! and spreadsheet failures end the run in `error`.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};

use super::retry::{with_retry, RetryPolicy};
use crate::extraction::{
    extract_text_blocking, heuristics, CvStructurer, ExtractError, ParsedCv, StructuringError,
};
use crate::integrations::{
    Notifier, ObjectStorage, SheetError, SheetRow, SheetSink, PLACEHOLDER_URL,
};
use crate::intake::models::{Stage, UploadRecord};
use crate::status::{StatusTracker, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Structuring(#[from] StructuringError),

    #[error("Failed to save to spreadsheet: {0}")]
    Sheets(#[from] SheetError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Final record of a run, plus the parsed CV when extraction got that far.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: UploadRecord,
    pub cv: Option<ParsedCv>,
}

pub struct Pipeline {
    tracker: StatusTracker,
    structurer: Arc<dyn CvStructurer>,
    storage: Option<Arc<dyn ObjectStorage>>,
    sheets: Option<Arc<dyn SheetSink>>,
    notifier: Option<Arc<dyn Notifier>>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(tracker: StatusTracker, structurer: Arc<dyn CvStructurer>) -> Self {
        Self {
            tracker,
            structurer,
            storage: None,
            sheets: None,
            notifier: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_sheets(mut self, sheets: Arc<dyn SheetSink>) -> Self {
        self.sheets = Some(sheets);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Drives the upload `id` to a terminal stage and returns the final record.
    ///
    /// A record that is already terminal is returned untouched. A record left
    /// mid-pipeline resumes at its recorded stage; stages it already passed
    /// are not repeated. Only status-store failures are returned as errors;
    /// everything else ends up on the record.
    pub async fn run(&self, id: &str, payload: Bytes) -> Result<RunOutcome, StoreError> {
        let record = self.current(id).await?;
        if record.stage.is_terminal() {
            return Ok(RunOutcome { record, cv: None });
        }

        let mut cv = None;
        let record = match self.execute(&record, payload, &mut cv).await {
            Ok(done) => {
                info!("Upload {id} completed ({} warnings)", done.warnings.len());
                done
            }
            Err(PipelineError::Store(StoreError::IllegalTransition { from, to })) => {
                warn!("Upload {id}: record moved to {from} concurrently, abandoning run before {to}");
                self.current(id).await?
            }
            Err(PipelineError::Store(e)) => return Err(e),
            Err(e) => {
                let message = e.to_string();
                error!("Upload {id} failed: {message}");
                self.record_failure(id, &message).await?
            }
        };
        Ok(RunOutcome { record, cv })
    }

    /// Moves the record into `error`. If something else already made it
    /// terminal (a cancel racing the failure), that state is kept.
    pub async fn record_failure(&self, id: &str, message: &str) -> Result<UploadRecord, StoreError> {
        match self.tracker.fail(id, message).await {
            Ok(failed) => Ok(failed),
            Err(StoreError::IllegalTransition { .. }) => self.current(id).await,
            Err(e) => Err(e),
        }
    }

    async fn current(&self, id: &str) -> Result<UploadRecord, StoreError> {
        self.tracker
            .get(id)
            .await?
            .ok_or_else(|| StoreError::Missing(id.to_string()))
    }

    /// `parsed` receives the CV as soon as structuring succeeds, so a later
    /// failure still reports it.
    async fn execute(
        &self,
        record: &UploadRecord,
        payload: Bytes,
        parsed: &mut Option<ParsedCv>,
    ) -> Result<UploadRecord, PipelineError> {
        let id = record.id.as_str();
        let resume_at = record.stage;
        let pending = |stage: Stage| !resume_at.has_passed(stage);
        if resume_at != Stage::Received {
            info!("Upload {id}: resuming at {resume_at}");
        }

        // The parsed CV is not persisted, so it is rebuilt on resume; only the
        // stage transition and its warnings are skipped.
        if pending(Stage::ExtractingText) {
            self.tracker.advance(id, Stage::ExtractingText).await?;
        }
        let cv = self
            .extract(record, payload.clone(), pending(Stage::ExtractingText))
            .await?;
        let cv = &*parsed.insert(cv);

        let file_url = if pending(Stage::UploadingToCloud) {
            self.tracker.advance(id, Stage::UploadingToCloud).await?;
            self.store_file(record, payload).await?
        } else {
            record
                .file_url
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_URL.to_string())
        };

        let row = SheetRow::for_submission(record, cv, &file_url);

        if pending(Stage::SavingToSheets) {
            self.tracker.advance(id, Stage::SavingToSheets).await?;
            self.append_row(id, &row).await?;
        }

        if pending(Stage::SendingEmail) {
            self.tracker.advance(id, Stage::SendingEmail).await?;
            self.notify(id, &row).await?;
        }

        Ok(self.tracker.advance(id, Stage::Completed).await?)
    }

    async fn extract(
        &self,
        record: &UploadRecord,
        payload: Bytes,
        first_pass: bool,
    ) -> Result<ParsedCv, PipelineError> {
        let text = extract_text_blocking(payload, record.file_info.mime_type.clone()).await?;
        let outcome = self.structurer.structure(&text).await?;
        if let (Some(note), true) = (&outcome.soft_failure, first_pass) {
            self.tracker.add_warning(&record.id, note).await?;
        }

        let mut cv = outcome.cv;
        heuristics::fill_from_submission(&mut cv.personal_info, &record.fields);
        info!(
            "Upload {}: extracted {} chars, structured via {}",
            record.id,
            text.len(),
            self.structurer.backend()
        );
        Ok(cv)
    }

    /// Uploads the file; any failure degrades to the placeholder URL.
    async fn store_file(&self, record: &UploadRecord, payload: Bytes) -> Result<String, PipelineError> {
        let id = record.id.as_str();
        let url = match &self.storage {
            None => {
                self.tracker
                    .add_warning(id, "Object storage is not configured; file URL recorded as N/A")
                    .await?;
                PLACEHOLDER_URL.to_string()
            }
            Some(storage) => {
                let storage = storage.as_ref();
                let name = record.file_info.name.as_str();
                let mime = record.file_info.mime_type.as_str();
                match with_retry(self.retry, "Object storage upload", move || {
                    storage.upload(payload.clone(), name, mime)
                })
                .await
                {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Upload {id}: storing file failed, continuing with placeholder: {e}");
                        self.tracker
                            .add_warning(id, &format!("{e}; file URL recorded as N/A"))
                            .await?;
                        PLACEHOLDER_URL.to_string()
                    }
                }
            }
        };
        self.tracker.set_file_url(id, &url).await?;
        Ok(url)
    }

    async fn append_row(&self, id: &str, row: &SheetRow) -> Result<(), PipelineError> {
        let Some(sheets) = &self.sheets else {
            warn!("Upload {id}: spreadsheet not configured, row not saved");
            self.tracker
                .add_warning(id, "Spreadsheet is not configured; row not saved")
                .await?;
            return Ok(());
        };
        let sheets = sheets.as_ref();
        with_retry(self.retry, "Spreadsheet append", move || sheets.append(row)).await?;
        Ok(())
    }

    async fn notify(&self, id: &str, row: &SheetRow) -> Result<(), PipelineError> {
        let recipient = Some(row.email.as_str()).filter(|e| *e != "N/A");
        let note = match (&self.notifier, recipient) {
            (None, _) => Some("Email is not configured; confirmation not sent".to_string()),
            (Some(_), None) => Some("No applicant email address; confirmation not sent".to_string()),
            (Some(notifier), Some(to)) => notifier
                .send_confirmation(&row.name, to, &row.filename)
                .await
                .err()
                .map(|e| {
                    warn!("Upload {id}: confirmation email failed: {e}");
                    e.to_string()
                }),
        };
        if let Some(note) = note {
            self.tracker.add_warning(id, &note).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::extraction::text::{PDF_MIME, TEXT_MIME};
    use crate::intake::models::SubmittedFields;
    use crate::pipeline::testing::*;

    const CV: &[u8] = b"Jane Doe\njane@example.com\n0771234567\n";

    struct Harness {
        store: Arc<RecordingStore>,
        storage: Arc<FakeStorage>,
        sheets: Arc<FakeSheets>,
        notifier: Arc<FakeNotifier>,
        structurer: Arc<StubStructurer>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(RecordingStore::new()),
                storage: Arc::new(FakeStorage::default()),
                sheets: Arc::new(FakeSheets::default()),
                notifier: Arc::new(FakeNotifier::default()),
                structurer: Arc::new(StubStructurer::heuristic()),
            }
        }

        fn pipeline(&self) -> Pipeline {
            Pipeline::new(tracker_for(&self.store), self.structurer.clone())
                .with_storage(self.storage.clone())
                .with_sheets(self.sheets.clone())
                .with_notifier(self.notifier.clone())
                .with_retry(fast_retry())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_visits_every_stage_in_order() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.warnings.is_empty(), "{:?}", done.warnings);
        assert_eq!(done.file_url.as_deref(), Some("https://storage.test/cvs/cv.txt"));
        assert_eq!(
            h.store.committed_stages("u1"),
            vec![
                Stage::ExtractingText,
                Stage::UploadingToCloud,
                Stage::SavingToSheets,
                Stage::SendingEmail,
                Stage::Completed
            ]
        );
        assert!(h.store.progress_is_monotonic("u1"));

        let rows = h.sheets.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Jane Doe");
        assert_eq!(rows[0].file_url, "https://storage.test/cvs/cv.txt");
        assert_eq!(
            h.notifier.sent(),
            vec![("Jane Doe".to_string(), "jane@example.com".to_string(), "cv.txt".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_degrades_to_placeholder() {
        let h = Harness::new();
        h.storage.fail.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert_eq!(done.file_url.as_deref(), Some(PLACEHOLDER_URL));
        assert_eq!(h.storage.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.sheets.rows()[0].file_url, PLACEHOLDER_URL);
        assert_eq!(done.warnings.len(), 1);
        assert!(done.warnings[0].contains("N/A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sheet_failure_is_fatal_and_skips_email() {
        let h = Harness::new();
        h.sheets.fail.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Error);
        assert_eq!(done.progress, 60);
        assert!(done.error.unwrap().contains("spreadsheet"));
        assert_eq!(h.sheets.calls.load(Ordering::SeqCst), 3);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_email_failure_degrades_to_warning() {
        let h = Harness::new();
        h.notifier.fail.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(h.sheets.rows().len(), 1);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(done.warnings.len(), 1);
        assert!(done.warnings[0].contains("domain not verified"), "{:?}", done.warnings);
        assert!(done.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_keeps_parsed_cv_when_a_later_stage_fails() {
        let h = Harness::new();
        h.sheets.fail.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, SubmittedFields::default()).await;

        let outcome = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap();

        assert_eq!(outcome.record.stage, Stage::Error);
        let cv = outcome.cv.unwrap();
        assert_eq!(cv.personal_info.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_structuring_service_failure_is_fatal() {
        let mut h = Harness::new();
        h.structurer = Arc::new(StubStructurer::failing());
        seed(&h.store, "u1", TEXT_MIME, SubmittedFields::default()).await;

        let outcome = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap();
        let done = outcome.record;

        assert_eq!(done.stage, Stage::Error);
        assert_eq!(done.progress, 10);
        assert!(outcome.cv.is_none());
        assert_eq!(h.structurer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.storage.calls.load(Ordering::SeqCst), 0);
        assert!(h.sheets.rows().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_llm_output_is_a_recorded_soft_failure() {
        let mut h = Harness::new();
        h.structurer = Arc::new(StubStructurer::soft_failure("LLM output was not valid JSON"));
        seed(&h.store, "u1", TEXT_MIME, SubmittedFields::default()).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert!(done.warnings.iter().any(|w| w.contains("not valid JSON")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parsed_values_fill_blank_submission() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, SubmittedFields::default()).await;

        h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap();

        let row = &h.sheets.rows()[0];
        assert_eq!(row.name, "Jane Doe");
        assert_eq!(row.email, "jane@example.com");
        assert_eq!(row.phone, "0771234567");
        assert_eq!(h.notifier.sent()[0].1, "jane@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_recipient_skips_email_with_warning() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, SubmittedFields::default()).await;

        let done = h
            .pipeline()
            .run("u1", Bytes::from_static(b"Just some text without contact details"))
            .await
            .unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert!(h.notifier.sent().is_empty());
        assert!(done.warnings.iter().any(|w| w.contains("No applicant email")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_collaborators_degrade() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = Pipeline::new(tracker_for(&h.store), h.structurer.clone())
            .with_retry(fast_retry())
            .run("u1", Bytes::from_static(CV))
            .await
            .unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert_eq!(done.file_url.as_deref(), Some(PLACEHOLDER_URL));
        assert_eq!(done.warnings.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_failure_marks_error() {
        let h = Harness::new();
        seed(&h.store, "u1", PDF_MIME, SubmittedFields::default()).await;

        let done = h
            .pipeline()
            .run("u1", Bytes::from_static(b"%PDF-1.4 not really"))
            .await
            .unwrap().record;

        assert_eq!(done.stage, Stage::Error);
        assert!(done.error.unwrap().contains("PDF"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_record_is_not_reprocessed() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;
        let pipeline = h.pipeline();

        pipeline.run("u1", Bytes::from_static(CV)).await.unwrap();
        let again = pipeline.run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(again.stage, Stage::Completed);
        assert_eq!(h.structurer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.sheets.rows().len(), 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_sheets_reruns_only_remaining_stages() {
        let h = Harness::new();
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;
        let tracker = tracker_for(&h.store);
        tracker.advance("u1", Stage::ExtractingText).await.unwrap();
        tracker.advance("u1", Stage::UploadingToCloud).await.unwrap();
        tracker
            .set_file_url("u1", "https://storage.test/cvs/earlier.txt")
            .await
            .unwrap();
        tracker.advance("u1", Stage::SavingToSheets).await.unwrap();
        h.store.clear_history();

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        // the CV is rebuilt because it is never persisted
        assert_eq!(h.structurer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.storage.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.sheets.rows()[0].file_url, "https://storage.test/cvs/earlier.txt");
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(
            h.store.committed_stages("u1"),
            vec![Stage::SendingEmail, Stage::Completed]
        );
    }

    #[tokio::test]
    async fn test_unknown_upload_is_reported() {
        let h = Harness::new();
        let err = h
            .pipeline()
            .run("ghost", Bytes::from_static(CV))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sheet_retry_recovers_from_transient_failure() {
        let h = Harness::new();
        h.sheets.fail_first.store(2, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let done = h.pipeline().run("u1", Bytes::from_static(CV)).await.unwrap().record;

        assert_eq!(done.stage, Stage::Completed);
        assert_eq!(h.sheets.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.sheets.rows().len(), 1);
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(10))
    }
}
