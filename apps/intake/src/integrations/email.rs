use std::fmt::{self, Display};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::info;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
pub const CONFIRMATION_SUBJECT: &str = "Your CV Application Confirmation";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email provider rejected the message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, name: &str, email: &str, filename: &str)
        -> Result<(), EmailError>;
}

/// HTML body of the "application received" email.
#[derive(Debug)]
pub struct Confirmation<'a> {
    pub name: &'a str,
    pub filename: &'a str,
}

impl Confirmation<'_> {
    fn greeting_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() || name == "N/A" {
            "Applicant"
        } else {
            name
        }
    }
}

impl Display for Confirmation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #eaeaea; border-radius: 5px;">
  <div style="text-align: center; margin-bottom: 20px;">
    <h1 style="color: #4338ca;">CV Application Received</h1>
  </div>
  <p>Dear {name},</p>
  <p>Thank you for submitting your CV (<strong>{filename}</strong>). Your application has been received and is currently under review.</p>
  <p>Our team will evaluate your qualifications and experience. If your profile matches our requirements, we will contact you about the next steps.</p>
  <div style="background-color: #f8fafc; padding: 15px; border-radius: 5px; margin: 20px 0;">
    <p style="margin: 0;"><strong>Please note:</strong> this email is automatically generated. Please do not reply to this message.</p>
  </div>
  <p>Best regards,</p>
  <p>The Recruitment Team</p>
</div>"#,
            name = escape_html(self.greeting_name()),
            filename = escape_html(self.filename),
        )
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Transactional email through the Resend HTTP API.
pub struct ResendNotifier {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendNotifier {
    pub fn new(client: Client, api_key: String, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_confirmation(
        &self,
        name: &str,
        email: &str,
        filename: &str,
    ) -> Result<(), EmailError> {
        let html = Confirmation { name, filename }.to_string();
        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [email],
                "subject": CONFIRMATION_SUBJECT,
                "html": html,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!("Confirmation email sent to {email}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greets_applicant_when_name_missing() {
        for name in ["", "  ", "N/A"] {
            let html = Confirmation {
                name,
                filename: "cv.pdf",
            }
            .to_string();
            assert!(html.contains("Dear Applicant,"), "name {name:?}");
        }
    }

    #[test]
    fn test_escapes_user_supplied_text() {
        let html = Confirmation {
            name: "<script>alert(1)</script>",
            filename: "a&b.pdf",
        }
        .to_string();
        assert!(html.contains("Dear &lt;script&gt;alert(1)&lt;/script&gt;,"));
        assert!(html.contains("<strong>a&amp;b.pdf</strong>"));
        assert!(html.contains("CV Application Received"));
    }
}
