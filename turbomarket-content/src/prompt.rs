//! Prompts sent to the content and image models

use std::fmt::Write;

use turbomarket_common::CampaignRequest;

/// Instructions for the text model, ending with the JSON shape it must return
#[must_use]
pub fn content_prompt(request: &CampaignRequest) -> String {
    let mut prompt = format!(
        "Create a compelling marketing email for {} campaign.\n\
         Target audience: {}\n\
         Primary goal: {}\n",
        request.email_type, request.audience_type, request.goal
    );

    if let Some(custom) = request
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|custom| !custom.is_empty())
    {
        let _ = writeln!(prompt, "\nAdditional requirements: {custom}");
    }

    prompt.push_str(
        r#"
Structure the response as JSON with the following format:
{
  "subject": "Email subject line",
  "preheader": "Preview text",
  "content": {
    "hook": "Opening hook",
    "body": "Main email body in HTML format",
    "cta": "Call to action text",
    "footer": "Footer content"
  }
}

Make it engaging, personalized, and optimized for conversions."#,
    );

    prompt
}

#[must_use]
pub fn image_prompt(email_type: &str) -> String {
    format!(
        "Create a professional, modern hero image for a {email_type} email campaign. \
         Style: clean, corporate, engaging, high-quality."
    )
}
