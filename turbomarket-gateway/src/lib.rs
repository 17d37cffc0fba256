//! The outbound side of the pipeline: hand a message to an email provider.
//!
//! [`DeliveryGateway`] is the seam between job handlers and whichever
//! provider actually sends mail. [`DryRunGateway`] logs instead of sending and
//! [`ScriptedGateway`] replays canned answers for tests.

mod dry_run;
mod error;
mod scripted;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use dry_run::DryRunGateway;
pub use error::{GatewayError, TransportError};
pub use scripted::ScriptedGateway;
use serde::{Deserialize, Serialize};
use turbomarket_common::{DeliveryOutcome, Destination, EmailAddress, Envelope, Recipient};

/// Provider acknowledgement of one accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
}

/// The parts of a templated bulk send shared by every destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSend {
    pub from: EmailAddress,
    pub template_name: String,
    #[serde(default)]
    pub default_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_set: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync + std::fmt::Debug {
    /// Send one message
    ///
    /// # Errors
    /// [`GatewayError::Transport`] if the provider could not be reached,
    /// otherwise the provider's refusal
    async fn send_single(&self, envelope: &Envelope) -> Result<SendReceipt, GatewayError>;

    /// Render `template` once per destination.
    ///
    /// Returns exactly one outcome per destination, in the same order.
    ///
    /// # Errors
    /// Only when the request as a whole fails
    async fn send_bulk(
        &self,
        template: &TemplateSend,
        destinations: &[Destination],
    ) -> Result<Vec<DeliveryOutcome>, GatewayError>;
}

/// Check an envelope has somewhere to go and something to say
///
/// # Errors
/// [`GatewayError::InvalidEnvelope`] describing the first problem found
pub fn validate_envelope(envelope: &Envelope) -> Result<(), GatewayError> {
    if envelope.to.is_empty() {
        return Err(GatewayError::InvalidEnvelope("no recipients".into()));
    }

    if let Some(address) = envelope
        .all_recipients()
        .chain(std::iter::once(&envelope.from))
        .find(|address| !address.email.contains('@'))
    {
        return Err(GatewayError::InvalidEnvelope(format!(
            "malformed address: {}",
            address.email
        )));
    }

    if !envelope.has_body() {
        return Err(GatewayError::InvalidEnvelope("no html or text body".into()));
    }

    Ok(())
}

/// A templated destination for one recipient.
///
/// The recipient's name, address and custom data are merged over `defaults`,
/// later keys winning.
#[must_use]
pub fn destination_for(
    recipient: &Recipient,
    defaults: &serde_json::Map<String, serde_json::Value>,
) -> Destination {
    let mut template_data = defaults.clone();
    template_data.insert(
        "recipient_name".into(),
        recipient
            .name
            .clone()
            .map_or(serde_json::Value::Null, serde_json::Value::String),
    );
    template_data.insert(
        "recipient_email".into(),
        serde_json::Value::String(recipient.email.clone()),
    );
    template_data.extend(recipient.custom_data.clone());

    Destination {
        to: vec![recipient.address()],
        cc: Vec::new(),
        bcc: Vec::new(),
        template_data,
        tags: BTreeMap::from([("recipient_id".to_string(), recipient.id.clone())]),
    }
}

/// Pad or trim provider statuses so there is exactly one per destination
#[must_use]
pub fn align_outcomes(mut outcomes: Vec<DeliveryOutcome>, destinations: usize) -> Vec<DeliveryOutcome> {
    outcomes.truncate(destinations);
    while outcomes.len() < destinations {
        outcomes.push(DeliveryOutcome::failure(None, "no status returned by provider"));
    }
    outcomes
}
