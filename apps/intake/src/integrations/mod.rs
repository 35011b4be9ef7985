//! Clients for the services a submission fans out to. Each sits behind a
//! trait so the pipeline can run against fakes.

pub mod email;
pub mod google_auth;
pub mod sheets;
pub mod storage;
pub mod webhook;

pub use email::{EmailError, Notifier, ResendNotifier};
pub use sheets::{GoogleSheets, SheetError, SheetRow, SheetSink};
pub use storage::{ObjectStorage, S3ObjectStorage, StorageError, PLACEHOLDER_URL};
pub use webhook::{CompletionHook, WebhookHook};
