use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use turbomarket_common::{DeliveryOutcome, Destination, Envelope};

use crate::{
    DeliveryGateway, GatewayError, SendReceipt, TemplateSend, TransportError, validate_envelope,
};

#[derive(Debug, Clone)]
enum Scripted {
    Pass,
    Transport(String),
    Rejected(String),
}

#[derive(Debug, Default)]
struct Script {
    upcoming: VecDeque<Scripted>,
    rejected_addresses: HashSet<String>,
    sent: Vec<Envelope>,
    bulk_calls: Vec<(TemplateSend, Vec<Destination>)>,
    next_id: u64,
}

/// Gateway that replays queued outcomes, then succeeds
///
/// Each call first consumes the next scripted failure, if any. Addresses
/// registered with [`ScriptedGateway::reject_address`] are refused by the
/// provider on every send.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next call through before any later scripted failure
    #[must_use]
    pub fn then_success(self) -> Self {
        self.script.lock().upcoming.push_back(Scripted::Pass);
        self
    }

    /// Fail the next call with a transport error
    #[must_use]
    pub fn then_transport_error(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .upcoming
            .push_back(Scripted::Transport(message.into()));
        self
    }

    /// Fail the next call with a provider rejection
    #[must_use]
    pub fn then_rejection(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .upcoming
            .push_back(Scripted::Rejected(message.into()));
        self
    }

    /// Refuse every message to `email`
    #[must_use]
    pub fn reject_address(self, email: impl Into<String>) -> Self {
        self.script.lock().rejected_addresses.insert(email.into());
        self
    }

    /// Envelopes accepted so far
    #[must_use]
    pub fn sent(&self) -> Vec<Envelope> {
        self.script.lock().sent.clone()
    }

    /// Every bulk request received, successful or not
    #[must_use]
    pub fn bulk_calls(&self) -> Vec<(TemplateSend, Vec<Destination>)> {
        self.script.lock().bulk_calls.clone()
    }

    fn next_failure(script: &mut Script) -> Result<(), GatewayError> {
        match script.upcoming.pop_front() {
            Some(Scripted::Transport(message)) => {
                Err(TransportError::ServiceUnavailable(message).into())
            }
            Some(Scripted::Rejected(message)) => Err(GatewayError::Rejected(message)),
            Some(Scripted::Pass) | None => Ok(()),
        }
    }

    fn message_id(script: &mut Script) -> String {
        script.next_id += 1;
        format!("scripted-{}", script.next_id)
    }
}

#[async_trait]
impl DeliveryGateway for ScriptedGateway {
    async fn send_single(&self, envelope: &Envelope) -> Result<SendReceipt, GatewayError> {
        validate_envelope(envelope)?;

        let mut script = self.script.lock();
        Self::next_failure(&mut script)?;

        if let Some(address) = envelope
            .all_recipients()
            .find(|address| script.rejected_addresses.contains(&address.email))
        {
            return Err(GatewayError::Rejected(format!(
                "mailbox unavailable: {}",
                address.email
            )));
        }

        let message_id = Self::message_id(&mut script);
        script.sent.push(envelope.clone());
        Ok(SendReceipt { message_id })
    }

    async fn send_bulk(
        &self,
        template: &TemplateSend,
        destinations: &[Destination],
    ) -> Result<Vec<DeliveryOutcome>, GatewayError> {
        let mut script = self.script.lock();
        script
            .bulk_calls
            .push((template.clone(), destinations.to_vec()));
        Self::next_failure(&mut script)?;

        Ok(destinations
            .iter()
            .map(|destination| {
                match destination
                    .to
                    .iter()
                    .find(|address| script.rejected_addresses.contains(&address.email))
                {
                    Some(address) => DeliveryOutcome::failure(
                        None,
                        format!("mailbox unavailable: {}", address.email),
                    ),
                    None => DeliveryOutcome::success(None, Self::message_id(&mut script)),
                }
            })
            .collect())
    }
}
