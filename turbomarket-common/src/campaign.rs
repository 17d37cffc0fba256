//! Campaign configuration produced by the wizard and carried by generation jobs

use serde::{Deserialize, Serialize};

use crate::EmailAddress;

/// A recipient of a campaign send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Merged into template data for templated sends
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub custom_data: serde_json::Map<String, serde_json::Value>,
}

impl Recipient {
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            custom_data: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The recipient as a deliverable address
    #[must_use]
    pub fn address(&self) -> EmailAddress {
        EmailAddress {
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

/// Where generated content should be sent once it exists.
///
/// When present on a [`CampaignRequest`], a successful generation chains a
/// bulk send job carrying the new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    pub from: EmailAddress,
    pub recipients: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_set: Option<String>,
    /// Priority for the chained send job; the queue default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Parameters of a content generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRequest {
    pub email_type: String,
    pub audience_type: String,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryPlan>,
}

impl CampaignRequest {
    #[must_use]
    pub fn new(
        email_type: impl Into<String>,
        audience_type: impl Into<String>,
        goal: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            email_type: email_type.into(),
            audience_type: audience_type.into(),
            goal: goal.into(),
            custom_prompt: None,
            user_id: user_id.into(),
            delivery: None,
        }
    }

    /// Whether this campaign kind gets a generated hero image
    #[must_use]
    pub fn wants_hero_image(&self) -> bool {
        matches!(self.email_type.as_str(), "launch" | "newsletter")
    }
}
