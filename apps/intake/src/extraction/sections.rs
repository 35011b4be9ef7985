//! Line scan for the education, experience and projects sections.
//!
//! Entries are recognised by headings and keyword lines. A list that already
//! holds entries is left alone.

use lazy_static::lazy_static;
use regex::Regex;

use super::structured::{EducationEntry, ExperienceEntry, ParsedCv, ProjectEntry};

/// Upper-case headings may be this long; mixed-case ones one word shorter.
const MAX_HEADING_WORDS: usize = 4;
/// Longer lines are content, never an entry title.
const MAX_TITLE_WORDS: usize = 7;

lazy_static! {
    static ref PERIOD_RE: Regex = Regex::new(
        r"(?i)\b(?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+)?(?:19|20)\d{2}(?:\s*(?:-|–|to)\s*(?:(?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+)?(?:19|20)\d{2}|present|current|now))?\b"
    )
    .expect("valid regex");
    static ref DEGREE_RE: Regex = Regex::new(
        r"(?i)\b(?:b\.?sc|m\.?sc|ph\.?d|bachelor'?s?|masters?|degree|diploma|certificate|certification|course|hnd|a/l|advanced level|g\.c\.e)\b"
    )
    .expect("valid regex");
    static ref INSTITUTION_RE: Regex =
        Regex::new(r"(?i)\b(?:university|institute|college|school|academy|campus)\b")
            .expect("valid regex");
    static ref JOB_TITLE_RE: Regex = Regex::new(
        r"(?i)\b(?:intern|engineer|developer|programmer|manager|analyst|consultant|designer|lead|officer|assistant|architect|administrator|specialist|trainee|associate|executive)\b"
    )
    .expect("valid regex");
    static ref LINK_RE: Regex =
        Regex::new(r"(?i)(?:https?://|www\.|github\.com/)\S+").expect("valid regex");
    static ref TECH_PREFIX_RE: Regex = Regex::new(
        r"(?i)^(?:(?:technologies|technology|tech stack|tech|tools|stack)\s*:\s*|built with\s+)"
    )
    .expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Education,
    Experience,
    Projects,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Heading {
    Enter(Section),
    /// A heading for a section that is not scanned.
    Other,
    /// Nothing after this heading belongs to the applicant.
    End,
}

/// Heading keywords, matched as word prefixes. First match wins.
const HEADINGS: &[(&str, Heading)] = &[
    ("reference", Heading::End),
    ("referee", Heading::End),
    ("education", Heading::Enter(Section::Education)),
    ("academic", Heading::Enter(Section::Education)),
    ("qualification", Heading::Enter(Section::Education)),
    ("certificat", Heading::Enter(Section::Education)),
    ("training", Heading::Enter(Section::Education)),
    ("experience", Heading::Enter(Section::Experience)),
    ("employment", Heading::Enter(Section::Experience)),
    ("project", Heading::Enter(Section::Projects)),
    ("skill", Heading::Other),
    ("profile", Heading::Other),
    ("summary", Heading::Other),
    ("objective", Heading::Other),
    ("contact", Heading::Other),
    ("personal", Heading::Other),
    ("details", Heading::Other),
    ("information", Heading::Other),
    ("language", Heading::Other),
    ("interest", Heading::Other),
    ("hobbies", Heading::Other),
    ("achievement", Heading::Other),
    ("award", Heading::Other),
    ("activit", Heading::Other),
];

/// Fills empty section lists on `cv` by scanning `text`.
pub fn fill_sections(cv: &mut ParsedCv, text: &str) {
    let scan = Scan::run(text);
    if cv.education.is_empty() {
        cv.education = scan.education;
    }
    if cv.experience.is_empty() {
        cv.experience = scan.experience;
    }
    if cv.projects.is_empty() {
        cv.projects = scan.projects;
    }
}

#[derive(Default)]
struct Scan {
    education: Vec<EducationEntry>,
    experience: Vec<ExperienceEntry>,
    projects: Vec<ProjectEntry>,
    /// Set while lines still belong to the last entry of the current section.
    open: bool,
}

impl Scan {
    fn run(text: &str) -> Self {
        let mut scan = Self::default();
        let mut section = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                if section == Some(Section::Projects) {
                    scan.open = false;
                }
                continue;
            }
            if let Some(heading) = heading(line) {
                scan.open = false;
                match heading {
                    Heading::Enter(next) => section = Some(next),
                    Heading::Other => section = None,
                    Heading::End => break,
                }
                continue;
            }

            let (line, bullet) = strip_bullet(line);
            match section {
                Some(Section::Education) => scan.education_line(line, bullet),
                Some(Section::Experience) => scan.experience_line(line, bullet),
                Some(Section::Projects) => scan.project_line(line, bullet),
                None => {}
            }
        }
        scan
    }

    fn education_line(&mut self, line: &str, bullet: bool) {
        let (rest, period) = take_period(line);
        let (institution, other) = if bullet {
            (None, line.to_string())
        } else {
            split_institution(&rest)
        };
        let degree = (!bullet && word_count(&other) <= MAX_TITLE_WORDS && DEGREE_RE.is_match(&other))
            .then(|| other.clone());

        let starts_new = match self.education.last() {
            Some(last) if self.open => {
                (degree.is_some() && last.degree.is_some())
                    || (institution.is_some() && last.institution.is_some())
            }
            _ => degree.is_some() || institution.is_some(),
        };
        if starts_new {
            self.education.push(EducationEntry::default());
            self.open = true;
        } else if !self.open {
            return;
        }
        let Some(entry) = self.education.last_mut() else {
            return;
        };

        match degree {
            Some(degree) => {
                let (degree, field) = split_field(&degree);
                entry.degree = Some(degree);
                entry.field = entry.field.take().or(field);
            }
            None => append(&mut entry.details, &other, "; "),
        }
        entry.institution = entry.institution.take().or(institution);
        if !bullet {
            entry.period = entry.period.take().or(period);
        }
    }

    fn experience_line(&mut self, line: &str, bullet: bool) {
        let (rest, period) = if bullet {
            (line.to_string(), None)
        } else {
            take_period(line)
        };
        let role = (!bullet && word_count(&rest) <= MAX_TITLE_WORDS)
            .then(|| split_role(&rest))
            .flatten();

        if let Some((title, company)) = role {
            self.experience.push(ExperienceEntry {
                title: Some(title),
                company,
                period,
                description: None,
            });
            self.open = true;
            return;
        }
        if !self.open {
            return;
        }
        let Some(entry) = self.experience.last_mut() else {
            return;
        };

        entry.period = entry.period.take().or(period);
        if !bullet && entry.company.is_none() && entry.description.is_none() {
            entry.company = Some(rest).filter(|c| !c.is_empty());
        } else {
            append(&mut entry.description, &rest, " ");
        }
    }

    fn project_line(&mut self, line: &str, bullet: bool) {
        if let Some(link) = LINK_RE.find(line) {
            if let Some(project) = self.open_project() {
                let link = link.as_str().trim_end_matches(['.', ',', ')']);
                project.link.get_or_insert_with(|| link.to_string());
            }
            return;
        }
        if let Some(prefix) = TECH_PREFIX_RE.find(line) {
            if let Some(project) = self.open_project() {
                append(&mut project.technologies, &line[prefix.end()..], ", ");
            }
            return;
        }

        let previous_done = match self.projects.last() {
            Some(last) if self.open => last.description.is_some() || last.link.is_some(),
            _ => true,
        };
        if !bullet && previous_done && looks_like_name(line) {
            let (name, technologies) = match line.split_once('|') {
                Some((name, tech)) => (name.trim(), Some(tech.trim().to_string())),
                None => (line, None),
            };
            self.projects.push(ProjectEntry {
                name: Some(name.to_string()),
                technologies: technologies.filter(|t| !t.is_empty()),
                ..Default::default()
            });
            self.open = true;
        } else if let Some(project) = self.open_project() {
            append(&mut project.description, line, " ");
        }
    }

    fn open_project(&mut self) -> Option<&mut ProjectEntry> {
        if self.open {
            self.projects.last_mut()
        } else {
            None
        }
    }
}

fn heading(line: &str) -> Option<Heading> {
    let normalized = line.trim_end_matches(':').trim().to_lowercase();
    if normalized.chars().any(|c| c.is_ascii_digit() || c == '@') {
        return None;
    }
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let shouting = line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase);
    let limit = if shouting {
        MAX_HEADING_WORDS
    } else {
        MAX_HEADING_WORDS - 1
    };
    if words.is_empty() || words.len() > limit {
        return None;
    }

    // Mixed-case headings name their section in the last word ("Work Experience").
    let candidates = if shouting {
        &words[..]
    } else {
        &words[words.len() - 1..]
    };
    HEADINGS
        .iter()
        .find(|(keyword, _)| candidates.iter().any(|w| w.starts_with(keyword)))
        .map(|(_, heading)| *heading)
}

fn strip_bullet(line: &str) -> (&str, bool) {
    let stripped = line
        .trim_start_matches(['•', '-', '*', '·', '▪', '◦', '●', '–'])
        .trim_start();
    (stripped, stripped.len() != line.len())
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cuts the first date or date range out of `line`.
fn take_period(line: &str) -> (String, Option<String>) {
    match PERIOD_RE.find(line) {
        Some(m) => {
            let rest = format!("{} {}", &line[..m.start()], &line[m.end()..]);
            (tidy(&rest), Some(m.as_str().to_string()))
        }
        None => (line.to_string(), None),
    }
}

/// Collapses whitespace and strips separators left dangling by a cut.
fn tidy(text: &str) -> String {
    text.replace("()", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches([',', '|', '-', '–', ':', ' '])
        .to_string()
}

/// Splits comma or pipe separated parts into (institution, everything else).
fn split_institution(text: &str) -> (Option<String>, String) {
    let (institution, other): (Vec<&str>, Vec<&str>) = text
        .split([',', '|'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .partition(|part| INSTITUTION_RE.is_match(part));
    (
        (!institution.is_empty()).then(|| institution.join(", ")),
        other.join(", "),
    )
}

/// "BSc in Computer Science" becomes ("BSc", "Computer Science").
fn split_field(degree: &str) -> (String, Option<String>) {
    match degree.to_ascii_lowercase().find(" in ") {
        Some(at) => {
            let field = degree[at + 4..].trim();
            (
                degree[..at].trim().to_string(),
                (!field.is_empty()).then(|| field.to_string()),
            )
        }
        None => (degree.to_string(), None),
    }
}

/// Job title plus optional company from "Title at Company" or "Title, Company".
fn split_role(text: &str) -> Option<(String, Option<String>)> {
    if let Some(at) = text.to_ascii_lowercase().find(" at ") {
        let (title, company) = (text[..at].trim(), text[at + 4..].trim());
        if JOB_TITLE_RE.is_match(title) {
            return Some((
                title.to_string(),
                (!company.is_empty()).then(|| company.to_string()),
            ));
        }
    }

    let parts: Vec<&str> = text
        .split([',', '|'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    let title_at = parts.iter().position(|part| JOB_TITLE_RE.is_match(part))?;
    let company = parts
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != title_at)
        .map(|(_, part)| *part)
        .collect::<Vec<_>>()
        .join(", ");
    Some((
        parts[title_at].to_string(),
        (!company.is_empty()).then_some(company),
    ))
}

fn looks_like_name(line: &str) -> bool {
    word_count(line) <= MAX_TITLE_WORDS
        && !line.ends_with('.')
        && !line.starts_with(|c: char| c.is_lowercase())
}

fn append(slot: &mut Option<String>, text: &str, separator: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push_str(separator);
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}
