use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use super::google_auth::{AuthError, ServiceAccountAuth};
use super::storage::PLACEHOLDER_URL;
use crate::extraction::ParsedCv;
use crate::intake::models::UploadRecord;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const LINK_LABEL: &str = "Download CV";
const MISSING: &str = "N/A";

pub const HEADER: [&str; 12] = [
    "Submitted At",
    "Name",
    "Email",
    "Phone",
    "Filename",
    "Education",
    "Experience",
    "Projects",
    "Address",
    "LinkedIn",
    "GitHub",
    "CV",
];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Sheets request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sheets API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid spreadsheet URL: {0}")]
    Url(String),
}

/// One spreadsheet row describing a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub submitted_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub filename: String,
    pub education: String,
    pub experience: String,
    pub projects: String,
    pub address: String,
    pub linkedin: String,
    pub github: String,
    pub file_url: String,
}

impl SheetRow {
    /// Submitted form values win over parsed ones; anything still blank is `N/A`.
    pub fn for_submission(record: &UploadRecord, cv: &ParsedCv, file_url: &str) -> Self {
        let info = &cv.personal_info;
        let pick = |submitted: &Option<String>, parsed: &Option<String>| {
            first_present(&[submitted.as_deref(), parsed.as_deref()])
        };
        Self {
            submitted_at: record.start_time,
            name: pick(&record.fields.name, &info.name),
            email: pick(&record.fields.email, &info.email),
            phone: pick(&record.fields.phone, &info.phone),
            filename: first_present(&[Some(record.file_info.name.as_str())]),
            education: cv.education_summary(),
            experience: cv.experience_summary(),
            projects: cv.projects_summary(),
            address: first_present(&[info.address.as_deref()]),
            linkedin: first_present(&[info.linkedin.as_deref()]),
            github: first_present(&[info.github.as_deref()]),
            file_url: file_url.to_string(),
        }
    }

    /// Cell values as sent with `valueInputOption=USER_ENTERED`.
    pub fn cells(&self) -> Vec<String> {
        let submitted_at = self.submitted_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let text: [&str; 11] = [
            &submitted_at,
            &self.name,
            &self.email,
            &self.phone,
            &self.filename,
            &self.education,
            &self.experience,
            &self.projects,
            &self.address,
            &self.linkedin,
            &self.github,
        ];
        let mut cells: Vec<String> = text.iter().map(|v| escape_cell(v)).collect();
        cells.push(hyperlink_cell(&self.file_url));
        cells
    }
}

fn first_present(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty() && *v != MISSING)
        .unwrap_or(MISSING)
        .to_string()
}

/// Keeps user-supplied text from being interpreted as a formula.
fn escape_cell(value: &str) -> String {
    match value.chars().next() {
        Some('=' | '+' | '-' | '@') => format!("'{value}"),
        _ => value.to_string(),
    }
}

fn hyperlink_cell(url: &str) -> String {
    if url.is_empty() || url == PLACEHOLDER_URL {
        return PLACEHOLDER_URL.to_string();
    }
    format!(
        "=HYPERLINK(\"{}\",\"{LINK_LABEL}\")",
        url.replace('"', "\"\"")
    )
}

#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn append(&self, row: &SheetRow) -> Result<(), SheetError>;
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// A1 range on `tab`, with the tab name quoted.
fn tab_range(tab: &str, cells: &str) -> String {
    format!("'{}'!{cells}", tab.replace('\'', "''"))
}

/// True when the first row of the tab has no non-blank cell.
fn needs_header(first_rows: &ValueRange) -> bool {
    first_rows.values.first().map_or(true, |row| {
        row.iter().all(|cell| match cell {
            serde_json::Value::String(s) => s.trim().is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        })
    })
}

/// Google Sheets v4 REST client appending to a single tab.
pub struct GoogleSheets {
    client: Client,
    auth: ServiceAccountAuth,
    spreadsheet_id: String,
    tab: String,
    tab_ready: OnceCell<()>,
}

impl GoogleSheets {
    pub fn new(client: Client, auth: ServiceAccountAuth, spreadsheet_id: String, tab: String) -> Self {
        Self {
            client,
            auth,
            spreadsheet_id,
            tab,
            tab_ready: OnceCell::new(),
        }
    }

    /// `SHEETS_API/<first>/<rest..>` with each segment percent-encoded.
    fn url(&self, first: &str, rest: &[&str]) -> Result<Url, SheetError> {
        let mut url = Url::parse(SHEETS_API).map_err(|e| SheetError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::Url(SHEETS_API.to_string()))?
            .push(first)
            .extend(rest);
        Ok(url)
    }

    fn header_range_url(&self) -> Result<Url, SheetError> {
        self.url(&self.spreadsheet_id, &["values", &tab_range(&self.tab, "A1:L1")])
    }

    fn values_append_url(&self) -> Result<Url, SheetError> {
        let range = tab_range(&self.tab, "A:L");
        let mut url = self.url(&self.spreadsheet_id, &["values", &format!("{range}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SheetError> {
        let token = self.auth.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Creates the tab if the spreadsheet does not have it yet, then writes
    /// the header row if row 1 is still blank. A previous attempt that added
    /// the tab but failed on the header is completed here.
    async fn ensure_tab(&self) -> Result<(), SheetError> {
        self.tab_ready
            .get_or_try_init(|| async {
                let mut url = self.url(&self.spreadsheet_id, &[])?;
                url.query_pairs_mut()
                    .append_pair("fields", "sheets.properties.title");
                let meta: SpreadsheetMeta = self.send(self.client.get(url)).await?.json().await?;

                if !meta.sheets.iter().any(|s| s.properties.title == self.tab) {
                    info!("Sheet tab '{}' not found, creating it", self.tab);
                    let batch_url = self.url(&format!("{}:batchUpdate", self.spreadsheet_id), &[])?;
                    self.send(self.client.post(batch_url).json(&json!({
                        "requests": [{ "addSheet": { "properties": { "title": self.tab } } }]
                    })))
                    .await?;
                }

                let first_row: ValueRange = self
                    .send(self.client.get(self.header_range_url()?))
                    .await?
                    .json()
                    .await?;
                if needs_header(&first_row) {
                    info!("Writing header row to sheet '{}'", self.tab);
                    let mut url = self.header_range_url()?;
                    url.query_pairs_mut().append_pair("valueInputOption", "RAW");
                    self.send(self.client.put(url).json(&json!({ "values": [HEADER] })))
                        .await?;
                }
                Ok::<(), SheetError>(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl SheetSink for GoogleSheets {
    async fn append(&self, row: &SheetRow) -> Result<(), SheetError> {
        self.ensure_tab().await?;
        self.send(
            self.client
                .post(self.values_append_url()?)
                .json(&json!({ "values": [row.cells()] })),
        )
        .await?;
        info!("Appended row for '{}' to sheet '{}'", row.filename, self.tab);
        Ok(())
    }
}
