use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;
use turbomarket_common::{DeliveryOutcome, Destination, Envelope};

use crate::{DeliveryGateway, GatewayError, SendReceipt, TemplateSend, validate_envelope};

/// Accepts everything and sends nothing.
///
/// Each message is validated and logged, then acknowledged with a generated
/// `dry-run-` message ID.
#[derive(Debug, Default)]
pub struct DryRunGateway {
    sent: AtomicUsize,
}

impl DryRunGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages acknowledged so far
    #[must_use]
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    fn message_id(&self) -> String {
        self.sent.fetch_add(1, Ordering::Relaxed);
        format!("dry-run-{}", ulid::Ulid::new())
    }
}

#[async_trait]
impl DeliveryGateway for DryRunGateway {
    async fn send_single(&self, envelope: &Envelope) -> Result<SendReceipt, GatewayError> {
        validate_envelope(envelope)?;

        let message_id = self.message_id();
        info!(
            %message_id,
            from = %envelope.from,
            recipients = envelope.all_recipients().count(),
            subject = %envelope.subject,
            "Dry run: message not sent"
        );

        Ok(SendReceipt { message_id })
    }

    async fn send_bulk(
        &self,
        template: &TemplateSend,
        destinations: &[Destination],
    ) -> Result<Vec<DeliveryOutcome>, GatewayError> {
        info!(
            template = %template.template_name,
            from = %template.from,
            destinations = destinations.len(),
            "Dry run: bulk send not sent"
        );

        Ok(destinations
            .iter()
            .map(|destination| {
                if destination.to.is_empty() {
                    DeliveryOutcome::failure(None, "destination has no recipients")
                } else {
                    DeliveryOutcome::success(None, self.message_id())
                }
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use turbomarket_common::EmailAddress;

    use super::*;

    #[tokio::test]
    async fn test_dry_run_acknowledges_valid_messages() {
        let gateway = DryRunGateway::new();
        let envelope = Envelope::new(
            EmailAddress::new("news@turbomarket.io"),
            vec![EmailAddress::new("ada@example.com")],
            "Hi",
        )
        .with_html("<p>Hi</p>");

        let receipt = gateway.send_single(&envelope).await.unwrap();
        assert!(receipt.message_id.starts_with("dry-run-"));
        assert_eq!(gateway.sent(), 1);

        let empty = Envelope::new(EmailAddress::new("news@turbomarket.io"), Vec::new(), "Hi");
        assert!(gateway.send_single(&empty).await.is_err());
        assert_eq!(gateway.sent(), 1);
    }
}
