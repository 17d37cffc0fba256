//! Generated campaign content

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CampaignRequest;

/// Provenance stamp recorded when content is generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub generated_at: DateTime<Utc>,
    pub email_type: String,
    pub audience_type: String,
    pub goal: String,
    pub user_id: String,
}

impl ContentMetadata {
    /// Stamp content generated now for `request`
    #[must_use]
    pub fn for_request(request: &CampaignRequest) -> Self {
        Self {
            generated_at: Utc::now(),
            email_type: request.email_type.clone(),
            audience_type: request.audience_type.clone(),
            goal: request.goal.clone(),
            user_id: request.user_id.clone(),
        }
    }
}

/// Email content produced by one generation job.
///
/// Never modified after creation; delivery jobs hold their own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    pub subject: String,
    pub preheader_text: String,
    pub hook: String,
    pub body_html: String,
    pub cta_text: String,
    pub footer_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image_url: Option<String>,
    pub metadata: ContentMetadata,
}
