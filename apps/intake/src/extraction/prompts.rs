// Prompt templates for CV structuring.

use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, NO_INVENTION_INSTRUCTION};

/// Upper bound on CV text sent to the model.
pub const MAX_CV_CHARS: usize = 24_000;

pub fn structuring_system_prompt() -> String {
    format!(
        "{JSON_ONLY_SYSTEM} You extract structured information from resume text. \
         {NO_INVENTION_INSTRUCTION}"
    )
}

pub fn structuring_prompt(cv_text: &str) -> String {
    let text = truncate_chars(cv_text, MAX_CV_CHARS);
    format!(
        r#"Extract the following details from the CV below and return a JSON object with exactly this shape:

{{
  "personal_info": {{
    "name": string|null,
    "email": string|null,
    "phone": string|null,
    "address": string|null,
    "nic": string|null,
    "linkedin": string|null,
    "github": string|null
  }},
  "education": [
    {{ "degree": string|null, "field": string|null, "institution": string|null, "period": string|null, "details": string|null }}
  ],
  "experience": [
    {{ "title": string|null, "company": string|null, "period": string|null, "description": string|null }}
  ],
  "projects": [
    {{ "name": string|null, "technologies": string|null, "description": string|null, "link": string|null }}
  ]
}}

Use empty arrays for sections that are not present.

CV TEXT:
"""
{text}
""""#
    )
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_cv_text() {
        let prompt = structuring_prompt("Jane Doe\njane@example.com");
        assert!(prompt.contains("Jane Doe\njane@example.com"));
        assert!(prompt.contains("\"personal_info\""));
    }

    #[test]
    fn test_long_text_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_CV_CHARS + 10);
        let prompt = structuring_prompt(&long);
        assert_eq!(prompt.matches('é').count(), MAX_CV_CHARS);
    }
}
