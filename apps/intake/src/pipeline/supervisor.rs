//! Supervised background runs.
//!
//! Each accepted upload gets one tokio task, registered by upload id. The
//! task runs the pipeline under a deadline, deregisters itself when done and
//! fires the completion hook. A registered task can be cancelled; a record
//! left mid-pipeline (process restart, crash) can be resumed from its payload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use super::runner::{Pipeline, RunOutcome};
use crate::extraction::ParsedCv;
use crate::integrations::CompletionHook;
use crate::intake::models::{Stage, UploadRecord};
use crate::status::{StatusTracker, StoreError};

pub const CANCELLED_MESSAGE: &str = "Processing cancelled";

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Upload {0} not found")]
    NotFound(String),

    #[error("Upload {0} is already being processed")]
    AlreadyRunning(String),

    #[error("Upload {id} has already finished ({stage})")]
    Finished { id: String, stage: Stage },

    #[error("The file for upload {0} is no longer available")]
    PayloadExpired(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Job {
    generation: u64,
    handle: AbortHandle,
}

struct Inner {
    pipeline: Arc<Pipeline>,
    tracker: StatusTracker,
    hook: Option<Arc<dyn CompletionHook>>,
    deadline: Duration,
    jobs: Mutex<HashMap<String, Job>>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<Inner>,
}

impl JobSupervisor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        hook: Option<Arc<dyn CompletionHook>>,
        deadline: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracker: pipeline.tracker().clone(),
                pipeline,
                hook,
                deadline,
                jobs: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        // the map holds no invariants a panicking holder could break
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.jobs().contains_key(id)
    }

    /// Starts a supervised run for `id`.
    pub fn spawn(&self, id: &str, payload: Bytes) -> Result<(), SupervisorError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(id) {
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(supervise(
            self.inner.clone(),
            id.to_string(),
            payload,
            generation,
        ));
        jobs.insert(
            id.to_string(),
            Job {
                generation,
                handle: task.abort_handle(),
            },
        );
        info!("Upload {id}: processing started");
        Ok(())
    }

    /// Stops the run for `id` and marks the record as cancelled.
    ///
    /// Returns `false` when the upload had already reached a terminal stage.
    pub async fn cancel(&self, id: &str) -> Result<bool, SupervisorError> {
        let job = self.jobs().remove(id);
        let was_running = job.is_some();
        if let Some(job) = job {
            job.handle.abort();
        }

        match self.inner.tracker.fail(id, CANCELLED_MESSAGE).await {
            Ok(record) => {
                info!("Upload {id}: cancelled at {}%", record.progress);
                self.inner.fire_hook(&record, None).await;
                Ok(true)
            }
            Err(StoreError::Missing(_)) => Err(SupervisorError::NotFound(id.to_string())),
            Err(StoreError::IllegalTransition { .. }) => {
                // The run finished before the abort landed. Its task was
                // deregistered here, so the hook is ours to fire.
                if was_running {
                    if let Some(record) = self.inner.tracker.get(id).await? {
                        self.inner.fire_hook(&record, None).await;
                    }
                }
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Restarts processing of a record that is stuck mid-pipeline.
    /// Returns the stage the run resumes from.
    pub async fn resume(&self, id: &str) -> Result<Stage, SupervisorError> {
        let record = self
            .inner
            .tracker
            .get(id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        if record.stage.is_terminal() {
            return Err(SupervisorError::Finished {
                id: id.to_string(),
                stage: record.stage,
            });
        }
        if self.is_running(id) {
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }

        let Some(payload) = self.inner.tracker.store().get_payload(id).await? else {
            let message = "Uploaded file expired before processing finished";
            if let Ok(failed) = self.inner.tracker.fail(id, message).await {
                self.inner.fire_hook(&failed, None).await;
            }
            return Err(SupervisorError::PayloadExpired(id.to_string()));
        };

        self.spawn(id, payload)?;
        info!("Upload {id}: resumed at {}", record.stage);
        Ok(record.stage)
    }
}

impl Inner {
    /// Removes the job entry if it still belongs to `generation`. Returns
    /// whether it did; a missing entry means `cancel` took over.
    fn deregister(&self, id: &str, generation: u64) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        match jobs.get(id) {
            Some(job) if job.generation == generation => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    async fn fire_hook(&self, record: &UploadRecord, cv: Option<&ParsedCv>) {
        if let Some(hook) = &self.hook {
            hook.on_terminal(record, cv).await;
        }
    }

    async fn timed_out(&self, id: &str) -> Option<RunOutcome> {
        let stage = match self.tracker.get(id).await {
            Ok(Some(record)) => record.stage,
            Ok(None) => return None,
            Err(e) => {
                error!("Upload {id}: could not read record after timeout: {e}");
                return None;
            }
        };
        let message = format!("Processing timed out during {stage}");
        warn!("Upload {id}: {message}");
        match self.pipeline.record_failure(id, &message).await {
            Ok(record) => Some(RunOutcome { record, cv: None }),
            Err(e) => {
                error!("Upload {id}: could not record timeout: {e}");
                None
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>, id: String, payload: Bytes, generation: u64) {
    let outcome = tokio::time::timeout(inner.deadline, inner.pipeline.run(&id, payload)).await;

    let finished = match outcome {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            error!("Upload {id}: status store failure, run abandoned: {e}");
            None
        }
        Err(_) => inner.timed_out(&id).await,
    };

    if !inner.deregister(&id, generation) {
        return;
    }
    if let Some(outcome) = finished.filter(|o| o.record.stage.is_terminal()) {
        inner.fire_hook(&outcome.record, outcome.cv.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::extraction::text::TEXT_MIME;
    use crate::pipeline::retry::RetryPolicy;
    use crate::pipeline::testing::*;
    use crate::status::UploadStatusStore;

    const CV: &[u8] = b"Jane Doe\njane@example.com\n0771234567\n";

    struct Harness {
        store: Arc<RecordingStore>,
        storage: Arc<FakeStorage>,
        sheets: Arc<FakeSheets>,
        hook: Arc<FakeHook>,
        supervisor: JobSupervisor,
    }

    fn harness(deadline: Duration) -> Harness {
        let store = Arc::new(RecordingStore::new());
        let storage = Arc::new(FakeStorage::default());
        let sheets = Arc::new(FakeSheets::default());
        let hook = Arc::new(FakeHook::default());
        let pipeline = Pipeline::new(tracker_for(&store), Arc::new(StubStructurer::heuristic()))
            .with_storage(storage.clone())
            .with_sheets(sheets.clone())
            .with_notifier(Arc::new(FakeNotifier::default()))
            .with_retry(RetryPolicy::new(Duration::from_millis(10)));
        let supervisor = JobSupervisor::new(
            Arc::new(pipeline),
            Some(hook.clone() as Arc<dyn CompletionHook>),
            deadline,
        );
        Harness {
            store,
            storage,
            sheets,
            hook,
            supervisor,
        }
    }

    async fn wait_until_idle(supervisor: &JobSupervisor, id: &str) {
        while supervisor.is_running(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_run_completes_and_fires_hook_once() {
        let h = harness(Duration::from_secs(60));
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap();
        assert!(h.supervisor.is_running("u1"));
        wait_until_idle(&h.supervisor, "u1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let record = h.store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Completed);
        let seen = h.hook.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].stage, Stage::Completed);

        let cvs = h.hook.cvs();
        let cv = cvs[0].as_ref().expect("completed run carries the parsed CV");
        assert_eq!(cv.personal_info.name.as_deref(), Some("Jane Doe"));
        assert_eq!(cv.personal_info.phone.as_deref(), Some("0771234567"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_spawn_is_rejected() {
        let h = harness(Duration::from_secs(60));
        h.storage.hang.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap();
        let err = h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_record_timed_out() {
        let h = harness(Duration::from_secs(30));
        h.storage.hang.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap();
        wait_until_idle(&h.supervisor, "u1").await;

        let record = h.store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Error);
        assert_eq!(record.progress, 40);
        assert_eq!(
            record.error.as_deref(),
            Some("Processing timed out during uploading_to_cloud")
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(h.hook.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_still_reports_parsed_cv() {
        let h = harness(Duration::from_secs(60));
        h.sheets.fail.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap();
        wait_until_idle(&h.supervisor, "u1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let seen = h.hook.seen();
        assert_eq!(seen[0].stage, Stage::Error);
        let cvs = h.hook.cvs();
        assert_eq!(
            cvs[0].as_ref().and_then(|cv| cv.personal_info.email.as_deref()),
            Some("jane@example.com")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_run_and_marks_record() {
        let h = harness(Duration::from_secs(600));
        h.storage.hang.store(true, Ordering::SeqCst);
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        h.supervisor.spawn("u1", Bytes::from_static(CV)).unwrap();
        while h.storage.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(h.supervisor.cancel("u1").await.unwrap());
        assert!(!h.supervisor.is_running("u1"));

        let record = h.store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Error);
        assert_eq!(record.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(h.sheets.rows().is_empty());
        assert_eq!(h.hook.seen().len(), 1);
        assert!(h.hook.cvs()[0].is_none());

        // a second cancel is a no-op
        assert!(!h.supervisor.cancel("u1").await.unwrap());
        assert_eq!(h.hook.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_upload() {
        let h = harness(Duration::from_secs(60));
        let err = h.supervisor.cancel("ghost").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_continues_stuck_record_from_payload() {
        let h = harness(Duration::from_secs(60));
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;
        h.store.put_payload("u1", CV).await.unwrap();
        let tracker = tracker_for(&h.store);
        tracker.advance("u1", Stage::ExtractingText).await.unwrap();
        tracker.advance("u1", Stage::UploadingToCloud).await.unwrap();
        tracker.set_file_url("u1", "https://storage.test/cvs/cv.txt").await.unwrap();
        tracker.advance("u1", Stage::SavingToSheets).await.unwrap();

        let from = h.supervisor.resume("u1").await.unwrap();
        assert_eq!(from, Stage::SavingToSheets);
        wait_until_idle(&h.supervisor, "u1").await;

        let record = h.store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Completed);
        assert_eq!(h.storage.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.sheets.rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rejects_finished_and_running_records() {
        let h = harness(Duration::from_secs(600));
        seed(&h.store, "done", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;
        tracker_for(&h.store)
            .advance("done", Stage::Completed)
            .await
            .unwrap();
        assert!(matches!(
            h.supervisor.resume("done").await.unwrap_err(),
            SupervisorError::Finished { .. }
        ));

        h.storage.hang.store(true, Ordering::SeqCst);
        seed(&h.store, "busy", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;
        h.supervisor.spawn("busy", Bytes::from_static(CV)).unwrap();
        assert!(matches!(
            h.supervisor.resume("busy").await.unwrap_err(),
            SupervisorError::AlreadyRunning(_)
        ));

        assert!(matches!(
            h.supervisor.resume("ghost").await.unwrap_err(),
            SupervisorError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_resume_without_payload_fails_record() {
        let h = harness(Duration::from_secs(60));
        seed(&h.store, "u1", TEXT_MIME, submitted("Jane Doe", "jane@example.com")).await;

        let err = h.supervisor.resume("u1").await.unwrap_err();
        assert!(matches!(err, SupervisorError::PayloadExpired(_)));
        let record = h.store.get("u1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Error);
        assert_eq!(h.hook.seen().len(), 1);
    }
}
