//! Regex and line-scan fallback for personal details.
//!
//! Only blank fields are filled; a value that is already present is never
//! overwritten.

use lazy_static::lazy_static;
use regex::Regex;

use super::structured::PersonalInfo;
use crate::intake::models::SubmittedFields;

/// Name and address are only looked for in the header of the document.
const NAME_WINDOW: usize = 5;
const ADDRESS_WINDOW: usize = 15;

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex");
    static ref PHONE_RE: Regex = Regex::new(r"\+?\(?\d[\d\s\-()]{8,}\d").expect("valid regex");
    static ref NIC_RE: Regex = Regex::new(
        r"(?i)^(?:nic(?:\s*(?:no\.?|number))?\s*[:\-]?\s*)?(\d{9}[vx]|\d{12})$"
    )
    .expect("valid regex");
    static ref NAME_WORD_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z.'\-]*$").expect("valid regex");
}

const SECTION_HEADERS: &[&str] = &[
    "curriculum vitae",
    "resume",
    "résumé",
    "contact",
    "profile",
    "summary",
    "objective",
    "education",
    "experience",
    "professional experience",
    "work experience",
    "projects",
    "skills",
    "references",
    "personal details",
    "personal information",
];

/// Fills blank personal-info fields by scanning `text`.
pub fn fill_personal_info(info: &mut PersonalInfo, text: &str) {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    fill_blank(&mut info.email, || find_email(text));
    fill_blank(&mut info.nic, || lines.iter().find_map(|l| nic_in_line(l)));
    fill_blank(&mut info.phone, || find_phone(&lines));
    fill_blank(&mut info.linkedin, || find_profile_link(text, "linkedin.com/"));
    fill_blank(&mut info.github, || find_profile_link(text, "github.com/"));
    fill_blank(&mut info.name, || find_name(&lines));
    fill_blank(&mut info.address, || find_address(&lines));
}

/// Fills blank name, email and phone from what the applicant typed in the form.
pub fn fill_from_submission(info: &mut PersonalInfo, fields: &SubmittedFields) {
    fill_blank(&mut info.name, || fields.name.clone());
    fill_blank(&mut info.email, || fields.email.clone());
    fill_blank(&mut info.phone, || fields.phone.clone());
}

fn fill_blank(slot: &mut Option<String>, find: impl FnOnce() -> Option<String>) {
    if slot.as_deref().map_or(true, |v| v.trim().is_empty()) {
        *slot = find().filter(|v| !v.trim().is_empty());
    }
}

fn find_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

fn nic_in_line(line: &str) -> Option<String> {
    NIC_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// First digit run with 10 to 15 digits, skipping lines that hold an NIC.
fn find_phone(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .filter(|line| nic_in_line(line).is_none())
        .flat_map(|line| PHONE_RE.find_iter(line))
        .map(|m| m.as_str().trim())
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            (10..=15).contains(&digits)
        })
        .map(str::to_string)
}

fn find_profile_link(text: &str, needle: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.to_ascii_lowercase().contains(needle))
        .map(|token| {
            token
                .trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '<' | '>' | '"' | '|'))
                .to_string()
        })
}

fn is_section_header(line: &str) -> bool {
    let lowered = line.trim_end_matches(':').to_lowercase();
    SECTION_HEADERS.contains(&lowered.as_str())
}

fn find_name(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .take(NAME_WINDOW)
        .find(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            (2..=5).contains(&words.len())
                && words.iter().all(|w| NAME_WORD_RE.is_match(w))
                && !is_section_header(line)
        })
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn find_address(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .take(ADDRESS_WINDOW)
        .find(|line| {
            line.contains(',')
                && line.len() > 30
                && !line.contains('@')
                && !line.to_ascii_lowercase().contains("http")
                && !EMAIL_RE.is_match(line)
        })
        .map(|line| line.to_string())
}
