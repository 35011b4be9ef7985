use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named checkpoint in the processing pipeline.
///
/// Non-terminal stages are ordered; a record only ever moves forward through
/// them, or jumps to `Error` from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    ExtractingText,
    UploadingToCloud,
    SavingToSheets,
    SendingEmail,
    Completed,
    Error,
}

impl Stage {
    /// Pipeline order of the non-error stages.
    pub const ORDER: [Stage; 6] = [
        Stage::Received,
        Stage::ExtractingText,
        Stage::UploadingToCloud,
        Stage::SavingToSheets,
        Stage::SendingEmail,
        Stage::Completed,
    ];

    /// Progress percentage associated with entering this stage.
    /// `Error` has no checkpoint of its own; it keeps the failing stage's value.
    pub fn checkpoint(self) -> Option<u8> {
        match self {
            Stage::Received => Some(0),
            Stage::ExtractingText => Some(10),
            Stage::UploadingToCloud => Some(40),
            Stage::SavingToSheets => Some(60),
            Stage::SendingEmail => Some(80),
            Stage::Completed => Some(100),
            Stage::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    fn position(self) -> Option<usize> {
        Self::ORDER.iter().position(|s| *s == self)
    }

    /// Whether a record in `self` may be rewritten into `next`.
    ///
    /// Staying in the same non-terminal stage is allowed (e.g. appending a
    /// warning); anything out of a terminal stage is not.
    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Stage::Error {
            return true;
        }
        match (self.position(), next.position()) {
            (Some(from), Some(to)) => to >= from,
            _ => false,
        }
    }

    /// True when `self` lies strictly later in pipeline order than `other`.
    pub fn has_passed(self, other: Stage) -> bool {
        matches!((self.position(), other.position()), (Some(a), Some(b)) if a > b)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ExtractingText => "extracting_text",
            Stage::UploadingToCloud => "uploading_to_cloud",
            Stage::SavingToSheets => "saving_to_sheets",
            Stage::SendingEmail => "sending_email",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: usize,
}

/// Contact fields exactly as submitted on the form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmittedFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Per-upload status object polled by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: String,
    pub stage: Stage,
    pub progress: u8,
    pub file_info: FileInfo,
    pub fields: SubmittedFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl UploadRecord {
    pub fn received(id: String, file_info: FileInfo, fields: SubmittedFields) -> Self {
        let now = Utc::now();
        Self {
            id,
            stage: Stage::Received,
            progress: 0,
            file_info,
            fields,
            error: None,
            file_url: None,
            warnings: Vec::new(),
            start_time: now,
            last_updated: now,
        }
    }

    /// Copy of this record moved into `stage`, progress set from its checkpoint.
    pub fn entering(&self, stage: Stage) -> Self {
        let mut next = self.clone();
        next.stage = stage;
        if let Some(progress) = stage.checkpoint() {
            next.progress = progress.max(self.progress);
        }
        next.last_updated = Utc::now();
        next
    }

    /// Copy of this record moved into `Error` with the given message.
    pub fn failed(&self, message: impl Into<String>) -> Self {
        let mut next = self.entering(Stage::Error);
        next.error = Some(message.into());
        next
    }
}
