//! Structured CV extraction: turns raw CV text into a `ParsedCv`.
//!
//! Two backends sit behind the `CvStructurer` trait: `LlmStructurer` asks the
//! completion model for JSON and tops up blanks with the heuristics, while
//! `HeuristicStructurer` runs the regex and section scans alone (used when no
//! LLM key is configured). The pipeline holds an `Arc<dyn CvStructurer>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::{heuristics, sections};
use super::prompts::{structuring_prompt, structuring_system_prompt};
use crate::llm_client::{LlmClient, LlmError};

// ────────────────────────────────────────────────────────────────────────────
// Data model
// ────────────────────────────────────────────────────────────────────────────

/// Structured CV content. Every field is optional; models vary in key naming,
/// so the common variants are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCv {
    #[serde(default, alias = "personalInfo", alias = "PersonalInfo", alias = "personal_information")]
    pub personal_info: PersonalInfo,
    #[serde(default, deserialize_with = "lenient_list", alias = "Education")]
    pub education: Vec<EducationEntry>,
    #[serde(
        default,
        deserialize_with = "lenient_list",
        alias = "Experience",
        alias = "qualifications",
        alias = "work_experience",
        alias = "workExperience"
    )]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default, deserialize_with = "lenient_list", alias = "Projects")]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    #[serde(default, deserialize_with = "lenient_text", alias = "Name", alias = "full_name")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Email")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Phone")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Address")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "NIC")]
    pub nic: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "LinkedIn")]
    pub linkedin: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "GitHub")]
    pub github: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    #[serde(default, deserialize_with = "lenient_text", alias = "DegreeType", alias = "degree_type")]
    pub degree: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "FieldOfStudy", alias = "field_of_study")]
    pub field: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Institution")]
    pub institution: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Period")]
    pub period: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Details")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    #[serde(default, deserialize_with = "lenient_text", alias = "JobTitle", alias = "job_title")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Company")]
    pub company: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Period")]
    pub period: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Description")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    #[serde(default, deserialize_with = "lenient_text", alias = "ProjectName", alias = "project_name")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        alias = "Technologies",
        alias = "technology"
    )]
    pub technologies: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Description")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", alias = "Link")]
    pub link: Option<String>,
}

impl ParsedCv {
    /// Comma-joined degrees (institution when the degree is missing), or `-`.
    pub fn education_summary(&self) -> String {
        summarize(
            self.education
                .iter()
                .filter_map(|e| e.degree.as_deref().or(e.institution.as_deref())),
        )
    }

    /// Comma-joined job titles, suffixed with the company when known.
    pub fn experience_summary(&self) -> String {
        let items: Vec<String> = self
            .experience
            .iter()
            .filter_map(|e| match (&e.title, &e.company) {
                (Some(title), Some(company)) => Some(format!("{title} at {company}")),
                (Some(title), None) => Some(title.clone()),
                (None, company) => company.clone(),
            })
            .collect();
        summarize(items.iter().map(String::as_str))
    }

    pub fn projects_summary(&self) -> String {
        summarize(self.projects.iter().filter_map(|p| p.name.as_deref()))
    }
}

fn summarize<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

/// Accepts strings, numbers, booleans and arrays of those. Placeholder values
/// (`""`, `-`, `N/A`) become `None`.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(value_text))
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(&s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Accepts an array of entries, a single object, or null. Entries that do not
/// deserialize are dropped instead of failing the whole document.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let items = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items,
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

// ────────────────────────────────────────────────────────────────────────────
// Structurer trait and backends
// ────────────────────────────────────────────────────────────────────────────

/// Result of a structuring pass. `soft_failure` carries a note when the
/// backend answered but its output could not be used as-is.
#[derive(Debug, Clone, Default)]
pub struct StructuringOutcome {
    pub cv: ParsedCv,
    pub soft_failure: Option<String>,
}

#[derive(Debug, Error)]
pub enum StructuringError {
    #[error("Structured extraction service failed: {0}")]
    Service(#[from] LlmError),
}

#[async_trait]
pub trait CvStructurer: Send + Sync {
    async fn structure(&self, text: &str) -> Result<StructuringOutcome, StructuringError>;

    /// Short backend name, for logs.
    fn backend(&self) -> &'static str;
}

/// Regex-only structurer.
pub struct HeuristicStructurer;

#[async_trait]
impl CvStructurer for HeuristicStructurer {
    async fn structure(&self, text: &str) -> Result<StructuringOutcome, StructuringError> {
        let mut cv = ParsedCv::default();
        heuristics::fill_personal_info(&mut cv.personal_info, text);
        sections::fill_sections(&mut cv, text);
        Ok(StructuringOutcome {
            cv,
            soft_failure: None,
        })
    }

    fn backend(&self) -> &'static str {
        "heuristic"
    }
}

/// LLM-backed structurer with heuristic top-up of blank fields and empty sections.
pub struct LlmStructurer {
    llm: Arc<LlmClient>,
}

impl LlmStructurer {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl CvStructurer for LlmStructurer {
    async fn structure(&self, text: &str) -> Result<StructuringOutcome, StructuringError> {
        let raw = self
            .llm
            .complete(&structuring_prompt(text), &structuring_system_prompt())
            .await?;

        let mut outcome = parse_llm_output(&raw);
        heuristics::fill_personal_info(&mut outcome.cv.personal_info, text);
        sections::fill_sections(&mut outcome.cv, text);

        info!(
            "Structured CV via {}: {} education, {} experience, {} projects",
            self.llm.model(),
            outcome.cv.education.len(),
            outcome.cv.experience.len(),
            outcome.cv.projects.len()
        );
        Ok(outcome)
    }

    fn backend(&self) -> &'static str {
        "llm"
    }
}

/// Parses model output into a `ParsedCv`. Output that is not a JSON object
/// yields an empty CV plus a soft-failure note.
pub fn parse_llm_output(raw: &str) -> StructuringOutcome {
    let body = crate::llm_client::strip_json_fences(raw);
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => match serde_json::from_value::<ParsedCv>(value) {
            Ok(cv) => StructuringOutcome {
                cv,
                soft_failure: None,
            },
            Err(e) => soft_failure(format!("LLM output did not match the CV shape: {e}")),
        },
        Ok(_) => soft_failure("LLM output was JSON but not an object".to_string()),
        Err(e) => soft_failure(format!("LLM output was not valid JSON: {e}")),
    }
}

fn soft_failure(note: String) -> StructuringOutcome {
    warn!("{note}");
    StructuringOutcome {
        cv: ParsedCv::default(),
        soft_failure: Some(note),
    }
}
