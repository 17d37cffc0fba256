//! Parsing model output into email sections

use serde::Deserialize;

use crate::MalformedContentError;

/// The JSON document the content prompt asks for
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedEmail {
    pub subject: String,
    #[serde(default)]
    pub preheader: String,
    pub content: GeneratedSections,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedSections {
    #[serde(default)]
    pub hook: String,
    pub body: String,
    #[serde(default)]
    pub cta: String,
    #[serde(default)]
    pub footer: String,
}

/// Strip a surrounding Markdown code fence, if the model added one
fn unfence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the info string (`json`, `JSON`, ...) up to the first newline
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse generated text as an email document
///
/// # Errors
/// [`MalformedContentError`] holding the raw text when it is not valid JSON
/// of the expected shape, or when the subject or body is blank
pub fn parse_content(raw: &str) -> Result<GeneratedEmail, MalformedContentError> {
    let malformed = |reason: String| MalformedContentError {
        reason,
        raw: raw.to_string(),
    };

    let email: GeneratedEmail =
        serde_json::from_str(unfence(raw)).map_err(|err| malformed(err.to_string()))?;

    if email.subject.trim().is_empty() {
        return Err(malformed("subject is empty".into()));
    }

    if email.content.body.trim().is_empty() {
        return Err(malformed("body is empty".into()));
    }

    Ok(email)
}
